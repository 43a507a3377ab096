use crate::analysis::stats::{Baseline, BaselineStore};
use crate::config::FrequencyConfig;
use crate::detect::anomaly::{self, AnomalyFlag, Thresholds};
use crate::detect::DetectError;
use crate::gateway::{LogEvent, TimeRange};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// Error count for one (service, error type) inside the analysed range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub service: String,
    pub error_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrequencyReport {
    pub baselines: Vec<Baseline>,
    /// Most severe first.
    pub anomalies: Vec<AnomalyFlag>,
    /// Largest count first.
    pub breakdown: Vec<ErrorCount>,
}

pub struct FrequencyAnalyzer {
    config: FrequencyConfig,
}

type Key = (String, String);

fn key_of(e: &LogEvent) -> Key {
    (e.service.clone(), e.error_kind().to_string())
}

impl FrequencyAnalyzer {
    pub fn new(config: FrequencyConfig) -> Self {
        Self { config }
    }

    fn window(&self) -> Duration {
        Duration::minutes(self.config.window_minutes)
    }

    fn window_count(&self) -> i64 {
        self.config.history_minutes / self.config.window_minutes
    }

    /// The trailing history the baselines are built from. It ends where `range`
    /// starts; events at or after `range.start` are never folded in.
    pub fn history_range(&self, range: &TimeRange) -> TimeRange {
        let span = self.window() * self.window_count() as i32;
        TimeRange::new(range.start - span, range.start)
    }

    /// [`Self::history_range`] cut into the baseline windows, oldest first.
    /// Adjacent windows share their boundary instant.
    pub fn history_windows(&self, range: &TimeRange) -> Vec<TimeRange> {
        let hist = self.history_range(range);
        let window = self.window();
        (0..self.window_count().max(0))
            .map(|i| {
                let start = hist.start + window * i as i32;
                TimeRange::new(start, start + window)
            })
            .collect()
    }

    /// Compare the error rates inside `range` with baselines built from
    /// `history`. Windows without events count as zero.
    #[instrument(skip_all, fields(history = history.len(), current = current.len()))]
    pub fn analyze(
        &self,
        range: &TimeRange,
        history: &[LogEvent],
        current: &[LogEvent],
    ) -> Result<FrequencyReport, DetectError> {
        let hist = self.history_range(range);
        let window = self.window();
        let window_ms = window.num_milliseconds().max(1);
        let n = self.window_count().max(0) as usize;

        let mut per_window: BTreeMap<Key, Vec<u64>> = BTreeMap::new();
        for e in history {
            if e.timestamp < hist.start || e.timestamp >= hist.end {
                continue;
            }
            let idx = ((e.timestamp - hist.start).num_milliseconds() / window_ms) as usize;
            if idx >= n {
                continue;
            }
            per_window.entry(key_of(e)).or_insert_with(|| vec![0; n])[idx] += 1;
        }

        let mut observed: BTreeMap<Key, u64> = BTreeMap::new();
        for e in current.iter().filter(|e| range.contains(e.timestamp)) {
            *observed.entry(key_of(e)).or_default() += 1;
        }

        let keys: BTreeSet<Key> = per_window.keys().chain(observed.keys()).cloned().collect();
        let mut store = BaselineStore::new(window, hist.end, self.config.min_baseline_windows);
        for key in &keys {
            let counts = per_window.get(key);
            for i in 0..n {
                let start = hist.start + window * i as i32;
                let c = counts.map(|c| c[i]).unwrap_or(0);
                store.close_window(&key.0, &key.1, start, c)?;
            }
        }

        let minutes = (range.duration().num_seconds() as f64 / 60.0).max(1.0);
        let thresholds = Thresholds {
            z: self.config.z_threshold,
            ratio: self.config.ratio_threshold,
        };

        let mut anomalies = Vec::new();
        for (key, count) in &observed {
            let baseline = store.get(&key.0, &key.1)?;
            let rate = *count as f64 / minutes;
            if let Some(flag) = anomaly::evaluate(rate, *count, &baseline, thresholds) {
                debug!(
                    service = %flag.service,
                    error_type = %flag.error_type,
                    ratio = flag.ratio,
                    z = flag.z_score,
                    "anomalous error rate"
                );
                anomalies.push(flag);
            }
        }
        anomalies.sort_by(|a, b| {
            b.severity_score
                .total_cmp(&a.severity_score)
                .then_with(|| a.service.cmp(&b.service))
                .then_with(|| a.error_type.cmp(&b.error_type))
        });

        let mut breakdown: Vec<ErrorCount> = observed
            .into_iter()
            .map(|((service, error_type), count)| ErrorCount {
                service,
                error_type,
                count,
            })
            .collect();
        breakdown.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.service.cmp(&b.service)));

        Ok(FrequencyReport {
            baselines: store.baselines(),
            anomalies,
            breakdown,
        })
    }
}
