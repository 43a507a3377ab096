//! Error-rate anomaly detection and the historical incident corpus.

pub mod anomaly;
pub mod frequency;
pub mod incident;

pub use self::anomaly::AnomalyFlag;
pub use self::frequency::{FrequencyAnalyzer, FrequencyReport};

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("insufficient baseline data: need {needed} windows, have {have}")]
    InsufficientBaseline { needed: usize, have: usize },

    #[error("window starting {start} closes before the previous window ending {previous_end}")]
    WindowOutOfOrder {
        start: DateTime<Utc>,
        previous_end: DateTime<Utc>,
    },

    #[error("window ending {window_end} overlaps the analysed range starting {horizon}")]
    Lookahead {
        window_end: DateTime<Utc>,
        horizon: DateTime<Utc>,
    },
}

/// Severity of an anomaly flag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}
