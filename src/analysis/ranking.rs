//! Scores the events of one correlation group as root-cause candidates.
//!
//! score = w_t * temporal + w_f * fan_out + w_s * signature + w_g * graph,
//! with every factor in [0, 1] and the weights normalised to sum to 1.

use super::correlation::CorrelationGroup;
use super::patterns::FailurePatternLibrary;
use super::topology::{self, DependencyGraph};
use crate::config::{RankingConfig, RankingWeights};
use crate::gateway::{LogEvent, LogLevel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Temporal,
    FanOut,
    Signature,
    Graph,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RationaleFactor {
    pub factor: Factor,
    /// Factor value before weighting, in [0, 1].
    pub raw: f64,
    pub weight: f64,
    pub contribution: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootCauseCandidate {
    pub group_key: String,
    pub event: LogEvent,
    pub score: f64,
    /// Largest contribution first.
    pub rationale: Vec<RationaleFactor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

pub struct RootCauseRanker {
    weights: RankingWeights,
    min_level: LogLevel,
    patterns: Arc<dyn FailurePatternLibrary>,
    graph: Arc<dyn DependencyGraph>,
}

impl RootCauseRanker {
    pub fn new(
        config: &RankingConfig,
        patterns: Arc<dyn FailurePatternLibrary>,
        graph: Arc<dyn DependencyGraph>,
    ) -> Self {
        Self {
            weights: config.weights.normalized(),
            min_level: config.min_candidate_level,
            patterns,
            graph,
        }
    }

    /// Candidates for `group`, best first. Only the best event of each service
    /// is kept. Identical input always yields identical output.
    #[instrument(skip_all, fields(group = group.key(), events = group.len()))]
    pub fn rank(&self, group: &CorrelationGroup) -> Vec<RootCauseCandidate> {
        let mut eligible: Vec<&LogEvent> = group
            .events()
            .iter()
            .filter(|e| e.level >= self.min_level)
            .collect();
        if eligible.is_empty() {
            eligible = group.events().iter().collect();
        }
        if eligible.is_empty() {
            return Vec::new();
        }

        let n = eligible.len();
        let services = group.services();
        let first_seen: BTreeMap<&str, chrono::DateTime<chrono::Utc>> = {
            let mut m = BTreeMap::new();
            for e in group.events() {
                m.entry(e.service.as_str()).or_insert(e.timestamp);
            }
            m
        };

        let mut best: BTreeMap<&str, RootCauseCandidate> = BTreeMap::new();
        for event in &eligible {
            // Events are timestamp-ordered, so ties share the lowest rank.
            let rank = eligible
                .iter()
                .position(|e| e.timestamp == event.timestamp)
                .unwrap_or(0);
            let temporal = 1.0 - rank as f64 / n as f64;

            let downstream: Vec<&str> = services
                .iter()
                .map(String::as_str)
                .filter(|s| *s != event.service)
                .filter(|s| first_seen.get(s).map(|t| *t > event.timestamp).unwrap_or(false))
                .filter(|s| {
                    topology::depends_on(self.graph.as_ref(), s, &event.service).unwrap_or(true)
                })
                .collect();
            let fan_out = if services.len() > 1 {
                downstream.len() as f64 / (services.len() - 1) as f64
            } else {
                0.0
            };

            let pattern = self.patterns.match_event(event);
            let signature = if pattern.is_some() { 1.0 } else { 0.0 };

            let distance = topology::distance_to_root(self.graph.as_ref(), &event.service, services);
            let graph = distance.map(|d| 1.0 / (1.0 + d as f64)).unwrap_or(0.5);

            let w = &self.weights;
            let mut rationale = vec![
                RationaleFactor {
                    factor: Factor::Temporal,
                    raw: temporal,
                    weight: w.temporal,
                    contribution: w.temporal * temporal,
                    detail: format!("position {} of {} by time", rank + 1, n),
                },
                RationaleFactor {
                    factor: Factor::FanOut,
                    raw: fan_out,
                    weight: w.fan_out,
                    contribution: w.fan_out * fan_out,
                    detail: if downstream.is_empty() {
                        "no services affected after it".to_string()
                    } else {
                        format!("followed by {}", downstream.join(", "))
                    },
                },
                RationaleFactor {
                    factor: Factor::Signature,
                    raw: signature,
                    weight: w.signature,
                    contribution: w.signature * signature,
                    detail: match &pattern {
                        Some(p) => format!("matches known failure '{}'", p.name),
                        None => "no known failure pattern".to_string(),
                    },
                },
                RationaleFactor {
                    factor: Factor::Graph,
                    raw: graph,
                    weight: w.graph,
                    contribution: w.graph * graph,
                    detail: match distance {
                        Some(0) => "root of the dependency graph".to_string(),
                        Some(d) => format!("{d} hop(s) from the dependency root"),
                        None => "dependency graph unavailable for this service".to_string(),
                    },
                },
            ];
            rationale.sort_by(|a, b| {
                b.contribution
                    .total_cmp(&a.contribution)
                    .then_with(|| a.factor.cmp(&b.factor))
            });

            let score = rationale
                .iter()
                .map(|r| r.contribution)
                .sum::<f64>()
                .clamp(0.0, 1.0);
            let candidate = RootCauseCandidate {
                group_key: group.key().to_string(),
                event: (*event).clone(),
                score,
                rationale,
                matched_pattern: pattern.as_ref().map(|p| p.name.clone()),
                remediation: pattern.map(|p| p.remediation),
            };

            match best.get(event.service.as_str()) {
                Some(current) if !outranks(&candidate, current) => {}
                _ => {
                    best.insert(event.service.as_str(), candidate);
                }
            }
        }

        let mut ranked: Vec<RootCauseCandidate> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            if outranks(a, b) {
                std::cmp::Ordering::Less
            } else if outranks(b, a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        debug!(
            candidates = ranked.len(),
            top = ranked.first().map(|c| c.event.service.as_str()).unwrap_or("-"),
            "group ranked"
        );
        ranked
    }
}

/// Higher score, then earlier timestamp, then service name, then event id.
fn outranks(a: &RootCauseCandidate, b: &RootCauseCandidate) -> bool {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.event.timestamp.cmp(&b.event.timestamp))
        .then_with(|| a.event.service.cmp(&b.event.service))
        .then_with(|| a.event.id.cmp(&b.event.id))
        .is_lt()
}
