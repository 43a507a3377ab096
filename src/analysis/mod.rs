//! Correlation, root-cause ranking and incident similarity.

pub mod correlation;
pub mod patterns;
pub mod ranking;
pub mod similarity;
pub mod stats;
pub mod topology;

pub use self::correlation::{CorrelationEngine, CorrelationGroup};
pub use self::ranking::{RootCauseCandidate, RootCauseRanker};
pub use self::similarity::{IncidentMatcher, Signature, SimilarIncident};
