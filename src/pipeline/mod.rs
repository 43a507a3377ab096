//! The investigation pipeline.
//!
//! [`Investigator::investigate`] turns a free-text description into an
//! [`IncidentReport`]:
//!
//! 1. seed query (verbatim text, then keyword fallback) and frequency
//!    analysis run concurrently;
//! 2. the seed events are grouped and expanded one hop at a time;
//! 3. the largest group (every comparable group when the result is
//!    ambiguous) is ranked;
//! 4. the incident corpus is searched for similar past incidents;
//! 5. everything is merged and validated by the [`ReportAssembler`].
//!
//! The whole run shares one time budget. When it runs out the in-flight
//! gateway calls are cancelled and the report is marked partial.

pub mod seed;

use crate::analysis::correlation::{self, CorrelationEngine, CorrelationGroup};
use crate::analysis::patterns::{FailurePatternLibrary, RegexPatternLibrary};
use crate::analysis::topology::{self, DependencyGraph};
use crate::analysis::{IncidentMatcher, RootCauseCandidate, RootCauseRanker, Signature, SimilarIncident};
use crate::config::EngineConfig;
use crate::detect::incident::{CorpusError, HistoricalIncident, IncidentCorpus};
use crate::detect::{FrequencyAnalyzer, FrequencyReport};
use crate::evidence::{AssemblyError, IncidentReport, ReportAssembler, ReportParts, Stage};
use crate::gateway::{
    LogEvent, LogFilter, LogLevel, LogQueryGateway, QueryPool, ResilientGateway, RetryExhausted,
    RetryPolicy, TimeRange,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum InvestigationError {
    #[error("invalid investigation request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestigationRequest {
    pub query: String,
    /// Defaults to the trailing lookback ending now.
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    /// Restricts the seed query to one service.
    #[serde(default)]
    pub service: Option<String>,
}

impl InvestigationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            time_range: None,
            service: None,
        }
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

/// Output of one pipeline stage plus whether it finished.
struct StageOutcome<T> {
    value: T,
    complete: bool,
    errors: Vec<String>,
}

struct Correlated {
    groups: Vec<CorrelationGroup>,
    seed_complete: bool,
}

/// The signature a report is matched and saved under: the root cause message
/// (the query when nothing was ranked), the affected services and the time of
/// the root cause event.
pub fn incident_signature(
    query: &str,
    root: Option<&LogEvent>,
    services: &[String],
    fallback: DateTime<Utc>,
) -> Signature {
    let services = services.iter().map(String::as_str);
    match root {
        Some(event) => Signature::new(&event.message, services, event.timestamp),
        None => Signature::new(query, services, fallback),
    }
}

pub fn report_signature(report: &IncidentReport) -> Signature {
    incident_signature(
        report.query(),
        report.root_cause().map(|c| &c.event),
        report.affected_services(),
        report.time_range().end,
    )
}

pub struct Investigator {
    config: Arc<EngineConfig>,
    gateway: Arc<ResilientGateway>,
    corpus: Arc<dyn IncidentCorpus>,
    engine: CorrelationEngine,
    analyzer: FrequencyAnalyzer,
    ranker: RootCauseRanker,
    matcher: IncidentMatcher,
    assembler: ReportAssembler,
}

impl Investigator {
    /// Build an investigator with the regex pattern library and the
    /// dependency graph described by `config`.
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn LogQueryGateway>,
        corpus: Arc<dyn IncidentCorpus>,
    ) -> anyhow::Result<Self> {
        let patterns: Arc<dyn FailurePatternLibrary> =
            Arc::new(RegexPatternLibrary::with_extra(&config.ranking.patterns)?);
        let graph = topology::from_config(&config.ranking.dependencies);
        Ok(Self::with_strategies(config, store, corpus, patterns, graph))
    }

    pub fn with_strategies(
        config: Arc<EngineConfig>,
        store: Arc<dyn LogQueryGateway>,
        corpus: Arc<dyn IncidentCorpus>,
        patterns: Arc<dyn FailurePatternLibrary>,
        graph: Arc<dyn DependencyGraph>,
    ) -> Self {
        let gateway = Arc::new(ResilientGateway::new(
            store,
            RetryPolicy::from(&config.gateway),
            config.gateway.max_results,
        ));
        let engine = CorrelationEngine::new(config.correlation.clone()).with_dependency_graph(graph.as_ref());
        Self {
            gateway,
            corpus,
            engine,
            analyzer: FrequencyAnalyzer::new(config.frequency.clone()),
            ranker: RootCauseRanker::new(&config.ranking, patterns, graph),
            matcher: IncidentMatcher::new(config.matcher.clone()),
            assembler: ReportAssembler::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn corpus(&self) -> &Arc<dyn IncidentCorpus> {
        &self.corpus
    }

    pub fn matcher(&self) -> &IncidentMatcher {
        &self.matcher
    }

    fn resolve_range(&self, request: &InvestigationRequest, now: DateTime<Utc>) -> Result<TimeRange, InvestigationError> {
        if request.query.trim().is_empty() {
            return Err(InvestigationError::InvalidRequest("query must not be empty".into()));
        }
        if matches!(&request.service, Some(s) if s.trim().is_empty()) {
            return Err(InvestigationError::InvalidRequest("service hint must not be empty".into()));
        }
        let range = request.time_range.unwrap_or_else(|| {
            TimeRange::trailing(now, chrono::Duration::minutes(self.config.pipeline.default_lookback_minutes))
        });
        if !range.is_valid() {
            return Err(InvestigationError::InvalidRequest(format!(
                "time range start {} is not before end {}",
                range.start, range.end
            )));
        }
        Ok(range)
    }

    /// Run one investigation.
    ///
    /// Store failures and an exhausted time budget degrade the report to
    /// partial. Only a report that fails its own evidence checks is an error.
    #[instrument(skip_all, fields(query = %request.query))]
    pub async fn investigate(&self, request: InvestigationRequest) -> Result<IncidentReport, InvestigationError> {
        let now = Utc::now();
        let range = self.resolve_range(&request, now)?;

        let cancel = CancellationToken::new();
        let budget = Duration::from_millis(self.config.pipeline.time_budget_ms);
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(budget).await;
                warn!(budget_ms = budget.as_millis() as u64, "investigation time budget exhausted");
                cancel.cancel();
            }
        });
        let pool = QueryPool::new(self.gateway.clone(), self.config.gateway.concurrency, cancel.clone());

        let (correlated, frequency) = tokio::join!(
            self.correlate(&request, range, &pool),
            self.frequency(range, &pool),
        );

        let mut incomplete = Vec::new();
        let mut errors = Vec::new();
        if !correlated.value.seed_complete {
            incomplete.push(Stage::Seed);
        }
        if !correlated.complete {
            incomplete.push(Stage::Correlation);
        }
        errors.extend(correlated.errors);
        if !frequency.complete {
            incomplete.push(Stage::Frequency);
        }
        errors.extend(frequency.errors);

        let groups = correlated.value.groups;
        let pipeline = &self.config.pipeline;
        let ambiguous = correlation::is_ambiguous(&groups, pipeline.ambiguity_ratio, pipeline.min_ambiguous_group_size);
        let ranked_groups: Vec<&CorrelationGroup> = match groups.first() {
            Some(largest) if ambiguous => {
                let floor = largest.len() as f64 * pipeline.ambiguity_ratio;
                groups
                    .iter()
                    .filter(|g| g.len() as f64 >= floor)
                    .take(pipeline.max_ranked_groups.max(1))
                    .collect()
            }
            _ => groups.iter().take(1).collect(),
        };
        let ranked_causes: Vec<RootCauseCandidate> =
            ranked_groups.iter().flat_map(|g| self.ranker.rank(g)).collect();

        let mut affected: Vec<String> = Vec::new();
        for g in &ranked_groups {
            for s in g.services() {
                if !affected.contains(s) {
                    affected.push(s.clone());
                }
            }
        }

        let signature = incident_signature(
            &request.query,
            ranked_causes.first().map(|c| &c.event),
            &affected,
            range.end,
        );
        let similar = self.match_similar(&signature, &cancel).await;
        if !similar.complete {
            incomplete.push(Stage::Matching);
        }
        errors.extend(similar.errors);

        let budget_exceeded = cancel.is_cancelled();
        timer.abort();
        if budget_exceeded {
            errors.push(format!(
                "investigation exceeded its time budget of {}ms",
                self.config.pipeline.time_budget_ms
            ));
        }

        let mut evidence: Vec<String> = ranked_causes.iter().map(|c| c.event.id.clone()).collect();
        evidence.extend(groups.iter().filter_map(|g| g.first_event()).map(|e| e.id.clone()));

        let explanation = if groups.is_empty() {
            Some(if correlated.value.seed_complete {
                format!(
                    "No log events matched \"{}\" between {} and {}.",
                    request.query.trim(),
                    range.start.to_rfc3339(),
                    range.end.to_rfc3339()
                )
            } else {
                "No log events could be retrieved; the log store did not answer.".to_string()
            })
        } else if ambiguous {
            Some(format!(
                "{} correlation groups of comparable size were found; each is ranked separately.",
                ranked_groups.len()
            ))
        } else {
            None
        };

        let FrequencyReport {
            anomalies, breakdown, ..
        } = frequency.value;
        let report = self.assembler.assemble(
            ReportParts {
                query: request.query.clone(),
                time_range: Some(range),
                groups,
                anomalies,
                error_breakdown: breakdown,
                ranked_causes,
                similar_incidents: similar.value,
                evidence,
                ambiguous,
                incomplete_stages: incomplete,
                errors,
                explanation,
            },
            now,
        )?;

        info!(
            id = %report.id(),
            groups = report.correlation_groups().len(),
            anomalies = report.anomalies().len(),
            root = report.root_cause().map(|c| c.event.service.as_str()).unwrap_or("-"),
            partial = report.is_partial(),
            "investigation complete"
        );
        Ok(report)
    }

    /// Seed, group and expand.
    #[instrument(skip_all)]
    async fn correlate(&self, request: &InvestigationRequest, range: TimeRange, pool: &QueryPool) -> StageOutcome<Correlated> {
        let seeded = self.seed(request, range, pool).await;
        let mut errors = seeded.errors;
        let groups = self.engine.group(seeded.value);
        info!(groups = groups.len(), "seed events grouped");

        let expansion = self.engine.expand(groups, pool).await;
        errors.extend(expansion.errors);
        StageOutcome {
            value: Correlated {
                groups: expansion.groups,
                seed_complete: seeded.complete,
            },
            complete: expansion.complete,
            errors,
        }
    }

    fn seed_filter(&self, request: &InvestigationRequest, text: &str, range: TimeRange) -> LogFilter {
        let filter = LogFilter::new(range)
            .text(text)
            .min_level(self.config.correlation.min_expansion_level);
        match &request.service {
            Some(s) => filter.service(s.clone()),
            None => filter,
        }
    }

    /// Query the verbatim text. A timeout is retried once over the most
    /// recent half of the range. When nothing matches, recognised keywords
    /// are queried in parallel and their union is the seed.
    async fn seed(&self, request: &InvestigationRequest, range: TimeRange, pool: &QueryPool) -> StageOutcome<Vec<LogEvent>> {
        let text = request.query.trim();
        let mut errors = Vec::new();

        let first = match pool.run(self.seed_filter(request, text, range)).await {
            Err(e) if e.is_timeout() => {
                let narrowed = range.recent_half();
                warn!(
                    start = %narrowed.start,
                    end = %narrowed.end,
                    "seed query timed out, retrying over the recent half of the range"
                );
                errors.push(format!("seed query timed out, narrowed range to start at {}", narrowed.start));
                pool.run(self.seed_filter(request, text, narrowed)).await
            }
            other => other,
        };

        let events = match first {
            Ok(events) => events,
            Err(e) => {
                record_failure("seed query", &e, &mut errors);
                return StageOutcome {
                    value: e.partial.unwrap_or_default(),
                    complete: false,
                    errors,
                };
            }
        };
        if !events.is_empty() {
            return StageOutcome {
                value: events,
                complete: true,
                errors,
            };
        }

        let words = seed::keywords(text, self.config.pipeline.max_seed_keywords);
        info!(keywords = ?words, "verbatim seed matched nothing, falling back to keywords");
        let filters = words.iter().map(|w| self.seed_filter(request, w, range)).collect();

        let mut complete = true;
        let mut union = Vec::new();
        for (filter, result) in pool.run_all(filters).await {
            match result {
                Ok(found) => union.extend(found),
                Err(e) => {
                    complete = false;
                    let what = format!("seed keyword '{}'", filter.text.as_deref().unwrap_or_default());
                    record_failure(&what, &e, &mut errors);
                    union.extend(e.partial.unwrap_or_default());
                }
            }
        }
        StageOutcome {
            value: union,
            complete,
            errors,
        }
    }

    /// Error-level events inside `range` and in the trailing history, one
    /// query per baseline window. A query that comes back at the result
    /// limit leaves the stage incomplete, since its counts are truncated.
    #[instrument(skip_all)]
    async fn frequency(&self, range: TimeRange, pool: &QueryPool) -> StageOutcome<FrequencyReport> {
        let mut filters = vec![LogFilter::new(range).min_level(LogLevel::Error)];
        filters.extend(
            self.analyzer
                .history_windows(&range)
                .into_iter()
                .map(|w| LogFilter::new(w).min_level(LogLevel::Error)),
        );

        let limit = self.gateway.max_results();
        let mut complete = true;
        let mut errors = Vec::new();
        let mut current = Vec::new();
        let mut history = Vec::new();
        let mut seen = HashSet::new();
        for (i, (filter, result)) in pool.run_all(filters).await.into_iter().enumerate() {
            let what = if i == 0 {
                "current window".to_string()
            } else {
                format!("baseline window from {}", filter.start.to_rfc3339())
            };
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    complete = false;
                    record_failure(&format!("frequency query for {what}"), &e, &mut errors);
                    e.partial.unwrap_or_default()
                }
            };
            if events.len() >= limit {
                complete = false;
                warn!(limit, "frequency query for {what} hit the result limit");
                errors.push(format!(
                    "frequency query for {what} returned the {limit}-event limit; error counts are truncated"
                ));
            }
            if i == 0 {
                current = events;
            } else {
                // Adjacent windows share a boundary instant.
                history.extend(events.into_iter().filter(|e| seen.insert(e.id.clone())));
            }
        }

        match self.analyzer.analyze(&range, &history, &current) {
            Ok(report) => {
                info!(anomalies = report.anomalies.len(), "frequency analysis complete");
                StageOutcome {
                    value: report,
                    complete,
                    errors,
                }
            }
            Err(e) => {
                warn!(error = %e, "frequency analysis failed");
                errors.push(format!("frequency analysis failed: {e}"));
                StageOutcome {
                    value: FrequencyReport::default(),
                    complete: false,
                    errors,
                }
            }
        }
    }

    async fn match_similar(&self, signature: &Signature, cancel: &CancellationToken) -> StageOutcome<Vec<SimilarIncident>> {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err("similar-incident search cancelled by the time budget".to_string()),
            res = self.corpus.find_similar(&self.matcher, signature) => res.map_err(|e| {
                warn!(error = %e, "similar-incident search failed");
                format!("similar-incident search failed: {e}")
            }),
        };
        match outcome {
            Ok(value) => StageOutcome {
                value,
                complete: true,
                errors: Vec::new(),
            },
            Err(message) => StageOutcome {
                value: Vec::new(),
                complete: false,
                errors: vec![message],
            },
        }
    }

    /// Pass-through query for ad-hoc inspection.
    pub async fn search(&self, filter: LogFilter, limit: usize) -> Result<Vec<LogEvent>, RetryExhausted> {
        let mut events = self.gateway.fetch(&filter, &CancellationToken::new()).await?;
        events.truncate(limit);
        Ok(events)
    }

    /// Store a confirmed investigation in the corpus. The only write the
    /// engine performs.
    #[instrument(skip_all, fields(report = %report.id()))]
    pub async fn save(
        &self,
        report: &IncidentReport,
        summary: &str,
        resolution: &str,
    ) -> Result<HistoricalIncident, InvestigationError> {
        if summary.trim().is_empty() {
            return Err(InvestigationError::InvalidRequest("summary must not be empty".into()));
        }
        let signature = report_signature(report);
        let incident = HistoricalIncident {
            id: uuid::Uuid::new_v4().to_string(),
            summary: summary.trim().to_string(),
            signature_vector: self.matcher.embed(&signature),
            affected_services: report.affected_services().to_vec(),
            resolution_text: resolution.trim().to_string(),
            created_at: Utc::now(),
            report_id: Some(report.id().to_string()),
        };
        self.corpus.append(incident.clone()).await?;
        info!(incident = %incident.id, "investigation saved to corpus");
        Ok(incident)
    }
}

fn record_failure(what: &str, e: &RetryExhausted, errors: &mut Vec<String>) {
    if e.is_cancelled() {
        return;
    }
    warn!(error = %e, "{what} failed");
    errors.push(format!("{what} failed: {e}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::incident::MemoryIncidentCorpus;
    use crate::gateway::memory::MemoryLogStore;
    use crate::gateway::test_support::*;
    use crate::gateway::GatewayError;

    fn investigator(events: Vec<LogEvent>) -> Investigator {
        Investigator::new(
            Arc::new(EngineConfig::default()),
            Arc::new(MemoryLogStore::new(events)),
            Arc::new(MemoryIncidentCorpus::new()),
        )
        .unwrap()
    }

    fn window() -> TimeRange {
        TimeRange::new(at(0), at(120))
    }

    #[tokio::test]
    async fn test_rejects_empty_query_and_inverted_range() {
        let inv = investigator(Vec::new());
        assert!(matches!(
            inv.investigate(InvestigationRequest::new("  ")).await,
            Err(InvestigationError::InvalidRequest(_))
        ));
        let inverted = TimeRange::new(at(10), at(0));
        assert!(matches!(
            inv.investigate(InvestigationRequest::new("x").time_range(inverted)).await,
            Err(InvestigationError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_no_events_is_an_empty_report() {
        let inv = investigator(Vec::new());
        let report = inv
            .investigate(InvestigationRequest::new("disk full").time_range(window()))
            .await
            .unwrap();
        assert!(report.correlation_groups().is_empty());
        assert!(report.ranked_causes().is_empty());
        assert!(!report.is_partial());
        assert!(report.explanation().unwrap().contains("No log events matched"));
    }

    #[tokio::test]
    async fn test_keyword_fallback_seeds_the_investigation() {
        let inv = investigator(vec![event(
            "e1",
            30,
            "search-service",
            LogLevel::Error,
            "Request timeout after 3000ms",
        )]);
        let report = inv
            .investigate(InvestigationRequest::new("why is everything timeout-ing").time_range(window()))
            .await
            .unwrap();
        assert_eq!(report.correlation_groups().len(), 1);
        assert_eq!(report.evidence(), &["e1"]);
    }

    #[tokio::test]
    async fn test_service_hint_restricts_seed() {
        let inv = investigator(vec![
            event("a", 10, "svc-a", LogLevel::Error, "boom"),
            event("b", 100, "svc-b", LogLevel::Error, "boom"),
        ]);
        let report = inv
            .investigate(InvestigationRequest::new("boom").time_range(window()).service("svc-b"))
            .await
            .unwrap();
        assert_eq!(report.affected_services(), &["svc-b"]);
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl LogQueryGateway for Unreachable {
        async fn query(&self, _filter: &LogFilter, _limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
            Err(GatewayError::Connectivity("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_gives_partial_report() {
        let mut config = EngineConfig::default();
        config.gateway.max_attempts = 1;
        let inv = Investigator::new(
            Arc::new(config),
            Arc::new(Unreachable),
            Arc::new(MemoryIncidentCorpus::new()),
        )
        .unwrap();
        let report = inv
            .investigate(InvestigationRequest::new("pool exhausted").time_range(window()))
            .await
            .unwrap();
        assert!(report.is_partial());
        assert!(report.incomplete_stages().contains(&Stage::Seed));
        assert!(report.incomplete_stages().contains(&Stage::Frequency));
        assert!(report.errors().iter().any(|e| e.contains("connection refused")));
    }

    /// Never answers.
    struct Hanging;

    #[async_trait::async_trait]
    impl LogQueryGateway for Hanging {
        async fn query(&self, _filter: &LogFilter, _limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_time_budget_cancels_in_flight_queries() {
        let mut config = EngineConfig::default();
        config.pipeline.time_budget_ms = 50;
        let inv = Investigator::new(
            Arc::new(config),
            Arc::new(Hanging),
            Arc::new(MemoryIncidentCorpus::new()),
        )
        .unwrap();
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            inv.investigate(InvestigationRequest::new("pool exhausted").time_range(window())),
        )
        .await
        .expect("investigation must not block past its budget")
        .unwrap();
        assert!(report.is_partial());
        assert!(report.errors().iter().any(|e| e.contains("time budget")));
    }

    fn capped(limit: usize, events: Vec<LogEvent>) -> Investigator {
        let mut config = EngineConfig::default();
        config.gateway.max_results = limit;
        Investigator::new(
            Arc::new(config),
            Arc::new(MemoryLogStore::new(events)),
            Arc::new(MemoryIncidentCorpus::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_truncated_frequency_query_marks_stage_incomplete() {
        let burst = (0..8)
            .map(|i| event(&format!("h{i}"), -10, "svc-a", LogLevel::Error, "boom"))
            .collect();
        let report = capped(5, burst)
            .investigate(InvestigationRequest::new("boom").time_range(window()))
            .await
            .unwrap();
        assert!(report.incomplete_stages().contains(&Stage::Frequency));
        assert!(report.errors().iter().any(|e| e.contains("5-event limit")));
    }

    #[tokio::test]
    async fn test_history_is_fetched_per_baseline_window() {
        // Eight errors in total but never more than four per window.
        let history = (0..8)
            .map(|i| {
                let minute = if i < 4 { -10 } else { -40 };
                event(&format!("h{i}"), minute, "svc-a", LogLevel::Error, "boom")
            })
            .collect();
        let report = capped(5, history)
            .investigate(InvestigationRequest::new("boom").time_range(window()))
            .await
            .unwrap();
        assert!(!report.incomplete_stages().contains(&Stage::Frequency));
        assert!(!report.errors().iter().any(|e| e.contains("limit")));
    }

    /// Times out on any query wider than 90 minutes.
    struct SlowOnWideRanges(MemoryLogStore);

    #[async_trait::async_trait]
    impl LogQueryGateway for SlowOnWideRanges {
        async fn query(&self, filter: &LogFilter, limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
            if filter.end - filter.start > chrono::Duration::minutes(90) {
                return Err(GatewayError::QueryTimeout { deadline_ms: 10 });
            }
            self.0.query(filter, limit).await
        }

        fn name(&self) -> &'static str {
            "slow-on-wide-ranges"
        }
    }

    #[tokio::test]
    async fn test_seed_timeout_retries_over_recent_half() {
        let mut config = EngineConfig::default();
        config.gateway.max_attempts = 1;
        let store = MemoryLogStore::new(vec![event(
            "late",
            90,
            "payment-service",
            LogLevel::Error,
            "Connection pool exhausted",
        )]);
        let inv = Investigator::new(
            Arc::new(config),
            Arc::new(SlowOnWideRanges(store)),
            Arc::new(MemoryIncidentCorpus::new()),
        )
        .unwrap();

        let report = inv
            .investigate(InvestigationRequest::new("connection pool exhausted").time_range(window()))
            .await
            .unwrap();
        assert!(!report.incomplete_stages().contains(&Stage::Seed));
        assert_eq!(report.correlation_groups().len(), 1);
        assert!(report.correlation_groups()[0].contains_event("late"));
        assert!(report
            .errors()
            .iter()
            .any(|e| e.contains("narrowed range") && e.contains(&at(60).to_string())));
    }

    #[tokio::test]
    async fn test_search_passes_through() {
        let inv = investigator(vec![
            event("a", 10, "svc-a", LogLevel::Error, "boom"),
            event("b", 11, "svc-a", LogLevel::Info, "fine"),
        ]);
        let found = inv
            .search(LogFilter::new(window()).min_level(LogLevel::Warn), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }
}
