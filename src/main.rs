use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use logsleuth::config::EngineConfig;
use logsleuth::evidence::{export_report, summary};
use logsleuth::gateway::sqlite::SqliteLogStore;
use logsleuth::gateway::{LogEvent, LogFilter, LogLevel, TimeRange};
use logsleuth::pipeline::InvestigationRequest;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "logsleuth",
    about = "Incident correlation and root-cause ranking over production logs",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $LOGSLEUTH_CONFIG, then ./logsleuth.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate an incident from a free-text description
    Investigate {
        /// What went wrong, e.g. "connection pool exhausted"
        query: String,

        /// Start of the window (RFC 3339), defaults to the configured lookback
        #[arg(long, value_parser = parse_time)]
        start: Option<DateTime<Utc>>,

        /// End of the window (RFC 3339), defaults to now
        #[arg(long, value_parser = parse_time)]
        end: Option<DateTime<Utc>>,

        /// Restrict the seed query to one service
        #[arg(long)]
        service: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Save the result to the incident corpus under this summary
        #[arg(long)]
        save: Option<String>,

        /// Resolution stored with --save
        #[arg(long, default_value = "", requires = "save")]
        resolution: String,
    },

    /// Query the log store directly
    Search {
        #[arg(long)]
        service: Option<String>,

        /// Minimum level: debug, info, warn, error, fatal
        #[arg(long)]
        level: Option<LogLevel>,

        /// Case-insensitive substring of the message or error type
        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        trace_id: Option<String>,

        #[arg(long, value_parser = parse_time)]
        start: Option<DateTime<Utc>>,

        #[arg(long, value_parser = parse_time)]
        end: Option<DateTime<Utc>>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Load newline-delimited JSON log events into the SQLite store
    Ingest {
        /// File with one LogEvent per line
        file: PathBuf,
    },

    /// Inspect the historical incident corpus
    Incidents {
        #[command(subcommand)]
        action: IncidentAction,
    },

    /// Start the HTTP API
    Serve {
        /// Bind address, defaults to api.bind from the config
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand)]
enum IncidentAction {
    /// List saved incidents, newest first
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn window(config: &EngineConfig, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> TimeRange {
    let end = end.unwrap_or_else(Utc::now);
    let start = start
        .unwrap_or_else(|| end - chrono::Duration::minutes(config.pipeline.default_lookback_minutes));
    TimeRange::new(start, end)
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(),
    };
    let config = Arc::new(config);

    match cli.command {
        Commands::Investigate {
            query,
            start,
            end,
            service,
            json,
            output,
            save,
            resolution,
        } => {
            let investigator = logsleuth::build_investigator(config.clone())?;
            let mut request = InvestigationRequest::new(query);
            if start.is_some() || end.is_some() {
                request = request.time_range(window(&config, start, end));
            }
            if let Some(s) = service {
                request = request.service(s);
            }

            tracing::info!(query = %request.query, "Starting investigation");
            let report = investigator.investigate(request).await?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", summary::render(&report));
            }
            if let Some(path) = output {
                export_report(&report, &path).await?;
            }
            if let Some(summary_text) = save {
                let incident = investigator.save(&report, &summary_text, &resolution).await?;
                println!("Saved as incident {}", incident.id);
            }
        }
        Commands::Search {
            service,
            level,
            text,
            trace_id,
            start,
            end,
            limit,
            json,
        } => {
            let investigator = logsleuth::build_investigator(config.clone())?;
            let mut filter = LogFilter::new(window(&config, start, end));
            if let Some(s) = service {
                filter = filter.service(s);
            }
            if let Some(l) = level {
                filter = filter.min_level(l);
            }
            if let Some(t) = text {
                filter = filter.text(t);
            }
            if let Some(t) = trace_id {
                filter = filter.trace_id(t);
            }

            let events = investigator.search(filter, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No matching events.");
            } else {
                for e in &events {
                    println!(
                        "{} {:<5} {:<20} {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                        e.level,
                        e.service,
                        e.message
                    );
                }
            }
        }
        Commands::Ingest { file } => {
            let pool = logsleuth::storage::open_pool(&config.store.sqlite_path)?;
            let store = SqliteLogStore::new(pool);
            let reader = std::io::BufReader::new(
                std::fs::File::open(&file).with_context(|| format!("failed to open {}", file.display()))?,
            );

            let mut batch: Vec<LogEvent> = Vec::with_capacity(1_000);
            let (mut stored, mut skipped) = (0usize, 0usize);
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEvent>(&line) {
                    Ok(event) => batch.push(event),
                    Err(e) => {
                        tracing::warn!(line = n + 1, error = %e, "skipping unreadable event");
                        skipped += 1;
                    }
                }
                if batch.len() == 1_000 {
                    stored += store.insert_events(&batch)?;
                    batch.clear();
                }
            }
            stored += store.insert_events(&batch)?;
            println!("Ingested {stored} events ({skipped} skipped).");
        }
        Commands::Incidents { action } => match action {
            IncidentAction::List { limit } => {
                let corpus = logsleuth::open_corpus(&config)?;
                let incidents = corpus.recent(limit).await?;
                if incidents.is_empty() {
                    println!("No incidents saved.");
                } else {
                    println!("{:<36} | {:<20} | {:<30} | Summary", "ID", "Created", "Services");
                    println!("{:-<36}-|-{:-<20}-|-{:-<30}-|-{:-<30}", "", "", "", "");
                    for i in incidents {
                        println!(
                            "{:<36} | {:<20} | {:<30} | {}",
                            i.id,
                            i.created_at.format("%Y-%m-%d %H:%M:%S"),
                            i.affected_services.join(","),
                            i.summary
                        );
                    }
                }
            }
        },
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.api.bind.clone());
            tracing::info!(%bind, "Starting logsleuth API");
            logsleuth::serve(config, &bind).await?;
        }
    }

    Ok(())
}
