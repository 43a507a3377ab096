use crate::analysis::stats::Baseline;
use crate::detect::Severity;
use serde::{Deserialize, Serialize};

/// Score reported when the baseline has no spread (or a zero mean) but the
/// observed rate is above it.
pub const SATURATED: f64 = 1000.0;

/// An error rate judged anomalous against its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub service: String,
    pub error_type: String,
    /// Events per minute inside the analysed range.
    pub observed_rate: f64,
    pub observed_count: u64,
    pub baseline: Baseline,
    pub ratio: f64,
    pub z_score: f64,
    pub severity: Severity,
    /// Larger of the two threshold margins; 1.0 sits exactly on a threshold.
    pub severity_score: f64,
}

/// Thresholds for [`evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub z: f64,
    pub ratio: f64,
}

pub fn z_score(observed: f64, baseline: &Baseline) -> f64 {
    if baseline.stddev > 0.0 {
        (observed - baseline.mean_rate) / baseline.stddev
    } else if observed > baseline.mean_rate {
        SATURATED
    } else {
        0.0
    }
}

pub fn ratio(observed: f64, baseline: &Baseline) -> f64 {
    if baseline.mean_rate > 0.0 {
        observed / baseline.mean_rate
    } else if observed > 0.0 {
        SATURATED
    } else {
        0.0
    }
}

fn severity_for(margin: f64) -> Severity {
    if margin >= 3.0 {
        Severity::Critical
    } else if margin >= 1.5 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Flag `observed` iff `ratio > thresholds.ratio` or `z > thresholds.z`.
/// Both comparisons are strict.
pub fn evaluate(
    observed: f64,
    observed_count: u64,
    baseline: &Baseline,
    thresholds: Thresholds,
) -> Option<AnomalyFlag> {
    let z = z_score(observed, baseline);
    let r = ratio(observed, baseline);
    if !(r > thresholds.ratio || z > thresholds.z) {
        return None;
    }

    let margin = (z / thresholds.z).max(r / thresholds.ratio);
    Some(AnomalyFlag {
        service: baseline.service.clone(),
        error_type: baseline.error_type.clone(),
        observed_rate: observed,
        observed_count,
        baseline: baseline.clone(),
        ratio: r,
        z_score: z,
        severity: severity_for(margin),
        severity_score: margin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(mean: f64, std: f64) -> Baseline {
        Baseline {
            service: "payment-service".into(),
            error_type: "PoolExhaustedError".into(),
            window_minutes: 5,
            mean_rate: mean,
            stddev: std,
            windows: 24,
        }
    }

    const T: Thresholds = Thresholds { z: 2.5, ratio: 3.0 };

    #[test]
    fn test_ratio_exactly_three_does_not_flag() {
        // ratio = 3.0, z = 2.0: neither strictly exceeds its threshold.
        assert!(evaluate(3.0, 3, &baseline(1.0, 1.0), T).is_none());
    }

    #[test]
    fn test_ratio_alone_flags() {
        // ratio = 3.2 > 3, z = 0.55 < 2.5
        let flag = evaluate(3.2, 3, &baseline(1.0, 4.0), T).unwrap();
        assert!(flag.ratio > 3.0);
        assert!(flag.z_score < 2.5);
    }

    #[test]
    fn test_z_alone_flags() {
        // ratio = 1.3 < 3, z = 3.0 > 2.5
        let flag = evaluate(13.0, 13, &baseline(10.0, 1.0), T).unwrap();
        assert!(flag.ratio < 3.0);
        assert!((flag.z_score - 3.0).abs() < 1e-9);
        assert_eq!(flag.severity, Severity::Info);
    }

    #[test]
    fn test_unseen_error_saturates() {
        let flag = evaluate(0.5, 2, &baseline(0.0, 0.0), T).unwrap();
        assert_eq!(flag.ratio, SATURATED);
        assert_eq!(flag.z_score, SATURATED);
        assert_eq!(flag.severity, Severity::Critical);
    }

    #[test]
    fn test_quiet_baseline_quiet_window() {
        assert!(evaluate(0.0, 0, &baseline(0.0, 0.0), T).is_none());
    }

    #[test]
    fn test_severity_grows_with_margin() {
        let low = evaluate(3.5, 3, &baseline(1.0, 10.0), T).unwrap();
        let high = evaluate(12.0, 12, &baseline(1.0, 10.0), T).unwrap();
        assert!(high.severity > low.severity);
        assert!(high.severity_score > low.severity_score);
    }
}
