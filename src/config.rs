//! TOML configuration for the investigation engine.
//!
//! One [`EngineConfig`] is built per process, validated, wrapped in an `Arc`
//! and handed down to every stage. Every section is optional in the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::gateway::LogLevel;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub frequency: FrequencyConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Try, in order:
    /// 1. The path in `LOGSLEUTH_CONFIG`.
    /// 2. `./logsleuth.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("LOGSLEUTH_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LOGSLEUTH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new("logsleuth.toml");
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.max_results == 0 {
            bail!("gateway.max_results must be positive");
        }
        if self.gateway.concurrency == 0 {
            bail!("gateway.concurrency must be positive");
        }
        if self.gateway.max_attempts == 0 {
            bail!("gateway.max_attempts must be positive");
        }
        if self.gateway.query_timeout_ms == 0 {
            bail!("gateway.query_timeout_ms must be positive");
        }
        if self.correlation.window_minutes <= 0 {
            bail!("correlation.window_minutes must be positive");
        }
        if self.frequency.window_minutes <= 0 || self.frequency.history_minutes <= 0 {
            bail!("frequency windows must be positive");
        }
        if self.frequency.history_minutes / self.frequency.window_minutes
            < self.frequency.min_baseline_windows as i64
        {
            bail!(
                "frequency.history_minutes must cover at least {} windows",
                self.frequency.min_baseline_windows
            );
        }
        if !(self.frequency.z_threshold > 0.0) || !(self.frequency.ratio_threshold > 0.0) {
            bail!("frequency thresholds must be positive");
        }
        self.ranking.weights.check()?;
        if !(0.0..=1.0).contains(&self.matcher.min_similarity) {
            bail!("matcher.min_similarity must lie in [0, 1]");
        }
        if self.matcher.dimensions == 0 {
            bail!("matcher.dimensions must be positive");
        }
        if self.pipeline.default_lookback_minutes <= 0 {
            bail!("pipeline.default_lookback_minutes must be positive");
        }
        if self.pipeline.time_budget_ms == 0 {
            bail!("pipeline.time_budget_ms must be positive");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Elasticsearch,
}

/// Where log events and past incidents live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database holding `log_events` (sqlite backend only).
    pub sqlite_path: PathBuf,
    /// Base URL of the Elasticsearch cluster.
    pub elastic_url: String,
    /// Index or data stream pattern to search.
    pub elastic_index: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// SQLite database holding the historical incident corpus.
    pub corpus_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from("data/logsleuth.db"),
            elastic_url: "http://localhost:9200".to_string(),
            elastic_index: "logs-*".to_string(),
            api_key_env: "LOGSLEUTH_ES_API_KEY".to_string(),
            corpus_path: PathBuf::from("data/logsleuth.db"),
        }
    }
}

impl StoreConfig {
    /// The Elasticsearch API key, if the configured variable is set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upper bound on events returned by one query.
    pub max_results: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub query_timeout_ms: u64,
    /// Gateway calls allowed in flight at once.
    pub concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_results: 10_000,
            max_attempts: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 5_000,
            query_timeout_ms: 10_000,
            concurrency: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Correlation window epsilon.
    pub window_minutes: i64,
    /// One-hop expansions performed per group.
    pub max_hops: u32,
    /// Attribute names whose equal values join two events.
    pub join_attributes: Vec<String>,
    /// Events pulled in by expansion must be at least this severe.
    pub min_expansion_level: LogLevel,
    pub max_group_events: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            max_hops: 2,
            join_attributes: vec![
                "request_id".to_string(),
                "session_id".to_string(),
                "correlation_id".to_string(),
            ],
            min_expansion_level: LogLevel::Warn,
            max_group_events: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    /// Size of each non-overlapping baseline window.
    pub window_minutes: i64,
    /// Trailing history before the investigation window.
    pub history_minutes: i64,
    /// `k` in `observed > mean + k * stddev`.
    pub z_threshold: f64,
    pub ratio_threshold: f64,
    pub min_baseline_windows: usize,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            history_minutes: 120,
            z_threshold: 2.5,
            ratio_threshold: 3.0,
            min_baseline_windows: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub temporal: f64,
    pub fan_out: f64,
    pub signature: f64,
    pub graph: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            temporal: 0.4,
            fan_out: 0.2,
            signature: 0.3,
            graph: 0.1,
        }
    }
}

impl RankingWeights {
    pub fn sum(&self) -> f64 {
        self.temporal + self.fan_out + self.signature + self.graph
    }

    fn check(&self) -> Result<()> {
        let all = [self.temporal, self.fan_out, self.signature, self.graph];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            bail!("ranking weights must be finite and non-negative");
        }
        if self.sum() <= 0.0 {
            bail!("ranking weights must not all be zero");
        }
        Ok(())
    }

    /// Scale so the weights sum to 1.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            temporal: self.temporal / sum,
            fan_out: self.fan_out / sum,
            signature: self.signature / sum,
            graph: self.graph / sum,
        }
    }
}

/// Extra failure pattern appended to the built-in library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub remediation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub weights: RankingWeights,
    /// `service = [services it calls]`. Empty means no graph is available.
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub patterns: Vec<PatternConfig>,
    /// Events below this level are only ranked when nothing else is eligible.
    pub min_candidate_level: LogLevel,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            dependencies: BTreeMap::new(),
            patterns: Vec::new(),
            min_candidate_level: LogLevel::Warn,
        }
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub top_k: usize,
    /// Matches must score strictly above this.
    pub min_similarity: f64,
    /// Weight of the Jaccard overlap of affected services.
    pub service_overlap_boost: f64,
    /// Embedding dimension. Changing it invalidates stored signatures.
    pub dimensions: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_similarity: 0.5,
            service_overlap_boost: 0.15,
            dimensions: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_lookback_minutes: i64,
    /// Overall budget for one investigation.
    pub time_budget_ms: u64,
    pub ambiguity_ratio: f64,
    pub min_ambiguous_group_size: usize,
    pub max_ranked_groups: usize,
    /// Keywords queried in parallel when the verbatim seed finds nothing.
    pub max_seed_keywords: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_lookback_minutes: 120,
            time_budget_ms: 30_000,
            ambiguity_ratio: 0.8,
            min_ambiguous_group_size: 3,
            max_ranked_groups: 3,
            max_seed_keywords: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// Cap on `limit` accepted by `GET /logs`.
    pub max_search_results: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_search_results: 1_000,
        }
    }
}
