//! Incident report assembly and export.
//!
//! [`ReportAssembler`] is the last stage of an investigation. It merges the
//! stage outputs into one [`IncidentReport`] and refuses to produce a report
//! whose evidence does not check out.

pub mod summary;

use crate::analysis::{CorrelationGroup, RootCauseCandidate, SimilarIncident};
use crate::detect::frequency::ErrorCount;
use crate::detect::AnomalyFlag;
use crate::gateway::TimeRange;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Pipeline stages that can fail to finish inside the time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Seed,
    Correlation,
    Frequency,
    Matching,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Seed => "seed",
            Stage::Correlation => "correlation",
            Stage::Frequency => "frequency",
            Stage::Matching => "matching",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("evidence event {event_id} is not in any correlation group")]
    UnknownEvidence { event_id: String },

    #[error("ranked cause {event_id} does not belong to group {group_key}")]
    OrphanCause { event_id: String, group_key: String },

    #[error("ranked cause {event_id} has score {score} outside [0, 1]")]
    ScoreOutOfRange { event_id: String, score: f64 },

    #[error("two correlation groups share key {key}")]
    DuplicateGroupKey { key: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssemblyError {
    #[error("report invariant violated: {0}")]
    InvariantViolation(#[from] Violation),
}

/// Everything the pipeline hands to the assembler.
#[derive(Debug, Clone, Default)]
pub struct ReportParts {
    pub query: String,
    pub time_range: Option<TimeRange>,
    /// Largest first.
    pub groups: Vec<CorrelationGroup>,
    pub anomalies: Vec<AnomalyFlag>,
    pub error_breakdown: Vec<ErrorCount>,
    /// Causes of each ranked group, groups in report order.
    pub ranked_causes: Vec<RootCauseCandidate>,
    pub similar_incidents: Vec<SimilarIncident>,
    pub evidence: Vec<String>,
    pub ambiguous: bool,
    pub incomplete_stages: Vec<Stage>,
    pub errors: Vec<String>,
    pub explanation: Option<String>,
}

/// The sole exported artifact of an investigation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentReport {
    id: String,
    query: String,
    created_at: DateTime<Utc>,
    time_range: TimeRange,
    status: ReportStatus,
    correlation_groups: Vec<CorrelationGroup>,
    anomalies: Vec<AnomalyFlag>,
    error_breakdown: Vec<ErrorCount>,
    ranked_causes: Vec<RootCauseCandidate>,
    affected_services: Vec<String>,
    similar_incidents: Vec<SimilarIncident>,
    evidence: Vec<String>,
    ambiguous: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    incomplete_stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
}

impl IncidentReport {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn status(&self) -> ReportStatus {
        self.status
    }

    pub fn is_partial(&self) -> bool {
        self.status == ReportStatus::Partial
    }

    pub fn correlation_groups(&self) -> &[CorrelationGroup] {
        &self.correlation_groups
    }

    pub fn anomalies(&self) -> &[AnomalyFlag] {
        &self.anomalies
    }

    pub fn error_breakdown(&self) -> &[ErrorCount] {
        &self.error_breakdown
    }

    pub fn ranked_causes(&self) -> &[RootCauseCandidate] {
        &self.ranked_causes
    }

    pub fn root_cause(&self) -> Option<&RootCauseCandidate> {
        self.ranked_causes.first()
    }

    pub fn affected_services(&self) -> &[String] {
        &self.affected_services
    }

    pub fn similar_incidents(&self) -> &[SimilarIncident] {
        &self.similar_incidents
    }

    pub fn evidence(&self) -> &[String] {
        &self.evidence
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    pub fn incomplete_stages(&self) -> &[Stage] {
        &self.incomplete_stages
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialise report")
    }
}

/// Validates and freezes a report.
#[derive(Debug, Default)]
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Build the report, or reject it when any cited evidence or ranked cause
    /// cannot be traced back to a correlation group.
    pub fn assemble(&self, parts: ReportParts, now: DateTime<Utc>) -> Result<IncidentReport, AssemblyError> {
        let mut by_key: HashMap<&str, &CorrelationGroup> = HashMap::new();
        for g in &parts.groups {
            if by_key.insert(g.key(), g).is_some() {
                return Err(Violation::DuplicateGroupKey {
                    key: g.key().to_string(),
                }
                .into());
            }
        }

        for id in &parts.evidence {
            if !parts.groups.iter().any(|g| g.contains_event(id)) {
                return Err(Violation::UnknownEvidence {
                    event_id: id.clone(),
                }
                .into());
            }
        }

        for cause in &parts.ranked_causes {
            let owned = by_key
                .get(cause.group_key.as_str())
                .map(|g| g.contains_event(&cause.event.id))
                .unwrap_or(false);
            if !owned {
                return Err(Violation::OrphanCause {
                    event_id: cause.event.id.clone(),
                    group_key: cause.group_key.clone(),
                }
                .into());
            }
            if !(0.0..=1.0).contains(&cause.score) {
                return Err(Violation::ScoreOutOfRange {
                    event_id: cause.event.id.clone(),
                    score: cause.score,
                }
                .into());
            }
        }

        // Services of the ranked groups (the largest group when nothing was
        // ranked), in propagation order.
        let ranked_keys: BTreeSet<&str> = parts
            .ranked_causes
            .iter()
            .map(|c| c.group_key.as_str())
            .collect();
        let mut affected_services: Vec<String> = Vec::new();
        let sources: Vec<&CorrelationGroup> = if ranked_keys.is_empty() {
            parts.groups.iter().take(1).collect()
        } else {
            parts
                .groups
                .iter()
                .filter(|g| ranked_keys.contains(g.key()))
                .collect()
        };
        for g in sources {
            for s in g.services() {
                if !affected_services.contains(s) {
                    affected_services.push(s.clone());
                }
            }
        }

        let mut evidence: Vec<String> = Vec::with_capacity(parts.evidence.len());
        for id in parts.evidence {
            if !evidence.contains(&id) {
                evidence.push(id);
            }
        }

        let status = if parts.incomplete_stages.is_empty() {
            ReportStatus::Complete
        } else {
            ReportStatus::Partial
        };
        let time_range = parts.time_range.unwrap_or_else(|| TimeRange::new(now, now));

        let report = IncidentReport {
            id: uuid::Uuid::new_v4().to_string(),
            query: parts.query,
            created_at: now,
            time_range,
            status,
            correlation_groups: parts.groups,
            anomalies: parts.anomalies,
            error_breakdown: parts.error_breakdown,
            ranked_causes: parts.ranked_causes,
            affected_services,
            similar_incidents: parts.similar_incidents,
            evidence,
            ambiguous: parts.ambiguous,
            incomplete_stages: parts.incomplete_stages,
            errors: parts.errors,
            explanation: parts.explanation,
        };
        debug!(id = %report.id, groups = report.correlation_groups.len(), "report assembled");
        Ok(report)
    }
}

/// Write `report` as pretty JSON to `output`.
pub async fn export_report(report: &IncidentReport, output: &Path) -> Result<()> {
    let json = report.to_json()?;
    tokio::fs::write(output, json)
        .await
        .with_context(|| format!("failed to write report to {}", output.display()))?;
    info!(id = %report.id(), path = %output.display(), "report exported");
    Ok(())
}
