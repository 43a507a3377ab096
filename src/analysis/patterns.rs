//! Known failure signatures used by the ranker's signature factor.

use crate::config::PatternConfig;
use crate::gateway::LogEvent;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The library entry an event matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub name: String,
    pub remediation: String,
}

/// Pluggable lookup of known failure signatures.
pub trait FailurePatternLibrary: Send + Sync {
    /// First entry matching the event's message or error type.
    fn match_event(&self, event: &LogEvent) -> Option<PatternMatch>;
}

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        "connection_pool_exhaustion",
        r"(?i)(connection|conn)[ _-]?pool.*(exhaust|depleted|timeout|no available)|pool ?exhausted|too many (connections|clients)",
        "Check connection pool sizing and leaked connections; add a circuit breaker on the pool's callers.",
    ),
    (
        "database_failover",
        r"(?i)fail[ -]?over|primary (is )?(down|unavailable)|replica promot|read[ -]only (mode|transaction)",
        "Confirm the new primary is healthy and clients have reconnected; review failover timing.",
    ),
    (
        "timeout_cascade",
        r"(?i)(upstream|downstream|gateway|request|read|call(ing)?) .*timed? ?out|deadline exceeded|timeout (waiting|calling|after)",
        "Review timeout budgets along the call chain and look for a slow dependency upstream.",
    ),
    (
        "connection_refused",
        r"(?i)connection refused|econnrefused|connect(ion)? reset|no route to host",
        "Verify the target service is running and reachable; check recent deploys and network policy.",
    ),
    (
        "out_of_memory",
        r"(?i)out ?of ?memory|oom[- ]?kill|java\.lang\.OutOfMemoryError|heap space|cannot allocate memory",
        "Check memory limits and recent allocation growth; scale out or raise limits.",
    ),
    (
        "circuit_breaker_open",
        r"(?i)circuit[ _-]?breaker.*(open|tripped)|breaker (is )?open",
        "Find what tripped the breaker; it is protecting a failing dependency.",
    ),
    (
        "disk_full",
        r"(?i)no space left on device|disk (is )?full|enospc|quota exceeded",
        "Free disk space or expand the volume; check log rotation and retention.",
    ),
    (
        "deadlock",
        r"(?i)deadlock|lock wait timeout",
        "Inspect lock ordering in the conflicting transactions.",
    ),
];

struct FailurePattern {
    name: String,
    regex: Regex,
    remediation: String,
}

/// Regex-backed library, checked in declaration order.
pub struct RegexPatternLibrary {
    patterns: Vec<FailurePattern>,
}

impl RegexPatternLibrary {
    pub fn builtin() -> Result<Self> {
        Self::with_extra(&[])
    }

    /// Built-in entries followed by `extra`.
    pub fn with_extra(extra: &[PatternConfig]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(BUILTIN.len() + extra.len());
        for (name, pattern, remediation) in BUILTIN {
            patterns.push(FailurePattern {
                name: name.to_string(),
                regex: Regex::new(pattern)
                    .with_context(|| format!("invalid built-in pattern {name}"))?,
                remediation: remediation.to_string(),
            });
        }
        for p in extra {
            patterns.push(FailurePattern {
                name: p.name.clone(),
                regex: Regex::new(&p.regex)
                    .with_context(|| format!("invalid pattern {}", p.name))?,
                remediation: p.remediation.clone(),
            });
        }
        Ok(Self { patterns })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.name.as_str())
    }
}

impl FailurePatternLibrary for RegexPatternLibrary {
    fn match_event(&self, event: &LogEvent) -> Option<PatternMatch> {
        self.patterns
            .iter()
            .find(|p| {
                p.regex.is_match(&event.message)
                    || event
                        .error_type
                        .as_deref()
                        .map(|t| p.regex.is_match(t))
                        .unwrap_or(false)
            })
            .map(|p| PatternMatch {
                name: p.name.clone(),
                remediation: p.remediation.clone(),
            })
    }
}
