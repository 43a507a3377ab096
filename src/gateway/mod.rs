//! Read-only access to the external log store.
//!
//! Every backing store is reached through [`LogQueryGateway`]. Callers above
//! this layer never talk to a store directly: they go through
//! [`ResilientGateway`] (deadlines, retry with backoff, partial-result cache)
//! and, inside an investigation, through the bounded [`QueryPool`].

pub mod elastic;
pub mod memory;
pub mod pool;
pub mod resilient;
pub mod sqlite;

pub use self::pool::QueryPool;
pub use self::resilient::{ResilientGateway, RetryPolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("log store unreachable: {0}")]
    Connectivity(String),

    #[error("query exceeded deadline of {deadline_ms}ms")]
    QueryTimeout { deadline_ms: u64 },

    #[error("malformed response from log store: {0}")]
    Malformed(String),

    #[error("query cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Connectivity failures and timeouts may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Connectivity(_) | GatewayError::QueryTimeout { .. }
        )
    }
}

/// Raised once a query has used up its retry budget.
#[derive(Debug, Clone, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryExhausted {
    pub error: GatewayError,
    pub attempts: u32,
    /// Last good result for the same filter, if an earlier call produced one.
    pub partial: Option<Vec<LogEvent>>,
}

impl RetryExhausted {
    pub fn cancelled() -> Self {
        Self {
            error: GatewayError::Cancelled,
            attempts: 0,
            partial: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error == GatewayError::Cancelled
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.error, GatewayError::QueryTimeout { .. })
    }
}

/// Log severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn rank(self) -> i64 {
        self as i64
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(String);

impl std::str::FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "err" => Ok(LogLevel::Error),
            "fatal" | "critical" => Ok(LogLevel::Fatal),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// A single log line as served by the store. Never modified after retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl LogEvent {
    /// Error type used as the frequency key.
    pub fn error_kind(&self) -> &str {
        self.error_type.as_deref().unwrap_or("unclassified")
    }
}

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `lookback` preceding `end`.
    pub fn trailing(end: DateTime<Utc>, lookback: chrono::Duration) -> Self {
        Self {
            start: end - lookback,
            end,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Keep the most recent half; used to degrade a query that keeps timing out.
    pub fn recent_half(&self) -> Self {
        Self {
            start: self.start + self.duration() / 2,
            end: self.end,
        }
    }
}

/// Query filter understood by every gateway.
///
/// `level` is a minimum: `Some(Warn)` matches warn, error and fatal.
/// `text` is a case-insensitive substring match over the message and the
/// error type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LogFilter {
    pub fn new(range: TimeRange) -> Self {
        Self {
            service: None,
            level: None,
            text: None,
            trace_id: None,
            start: range.start,
            end: range.end,
        }
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.start = range.start;
        self.end = range.end;
        self
    }

    /// In-process evaluation of the filter, shared by the adapters that do
    /// not push predicates down to a query language.
    pub fn matches(&self, event: &LogEvent) -> bool {
        if event.timestamp < self.start || event.timestamp > self.end {
            return false;
        }
        if let Some(service) = &self.service {
            if &event.service != service {
                return false;
            }
        }
        if let Some(level) = self.level {
            if event.level < level {
                return false;
            }
        }
        if let Some(trace_id) = &self.trace_id {
            if event.trace_id.as_ref() != Some(trace_id) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let in_message = event.message.to_lowercase().contains(&needle);
            let in_type = event
                .error_type
                .as_deref()
                .map(|t| t.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_message && !in_type {
                return false;
            }
        }
        true
    }
}

/// Uniform, read-only query interface over one backing log store.
///
/// Implementations return events in ascending timestamp order and never more
/// than `limit` of them. Calls are idempotent and safe to retry.
#[async_trait::async_trait]
pub trait LogQueryGateway: Send + Sync {
    async fn query(&self, filter: &LogFilter, limit: usize) -> Result<Vec<LogEvent>, GatewayError>;

    /// Short adapter name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 9, 0, 0).unwrap()
            + chrono::Duration::minutes(minute)
    }

    pub fn event(id: &str, minute: i64, service: &str, level: LogLevel, message: &str) -> LogEvent {
        LogEvent {
            id: id.to_string(),
            timestamp: at(minute),
            service: service.to_string(),
            level,
            message: message.to_string(),
            error_type: None,
            trace_id: None,
            span_id: None,
            attributes: BTreeMap::new(),
        }
    }
}
