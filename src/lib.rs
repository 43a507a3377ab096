//! logsleuth -- incident correlation and root-cause ranking over production logs.
//!
//! This crate turns a free-text error description into a structured,
//! evidence-backed incident report: correlated event groups, ranked root-cause
//! candidates, anomalous error rates and similar past incidents.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod evidence;
pub mod gateway;
pub mod pipeline;
pub mod storage;

use anyhow::{Context, Result};
use config::{EngineConfig, StoreBackend};
use detect::incident::{IncidentCorpus, SqliteIncidentCorpus};
use gateway::elastic::ElasticsearchGateway;
use gateway::sqlite::SqliteLogStore;
use gateway::LogQueryGateway;
use pipeline::Investigator;
use std::sync::Arc;
use std::time::Duration;

/// Adapter for the configured log store.
pub fn open_gateway(config: &EngineConfig) -> Result<Arc<dyn LogQueryGateway>> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            let pool = storage::open_pool(&config.store.sqlite_path)?;
            Ok(Arc::new(SqliteLogStore::new(pool)))
        }
        StoreBackend::Elasticsearch => {
            let gateway = ElasticsearchGateway::new(
                &config.store.elastic_url,
                &config.store.elastic_index,
                config.store.api_key(),
                Duration::from_millis(config.gateway.query_timeout_ms),
            )?;
            Ok(Arc::new(gateway))
        }
    }
}

/// The historical incident corpus at `store.corpus_path`.
pub fn open_corpus(config: &EngineConfig) -> Result<Arc<dyn IncidentCorpus>> {
    let pool = storage::open_pool(&config.store.corpus_path)?;
    Ok(Arc::new(SqliteIncidentCorpus::new(pool)))
}

pub fn build_investigator(config: Arc<EngineConfig>) -> Result<Investigator> {
    let gateway = open_gateway(&config)?;
    let corpus = open_corpus(&config)?;
    tracing::info!(
        store = gateway.name(),
        window_minutes = config.correlation.window_minutes,
        "investigator ready"
    );
    Investigator::new(config, gateway, corpus)
}

/// Start the HTTP API.
pub async fn serve(config: Arc<EngineConfig>, bind: &str) -> Result<()> {
    let investigator = Arc::new(build_investigator(config)?);
    let app = api::router(api::state::AppState::new(investigator));

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {bind}"))?;
    tracing::info!(%addr, "logsleuth listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
