//! Rolling error-rate baselines.
//!
//! A baseline is built from consecutive, non-overlapping windows that all close
//! before the analysed range begins. Windows are folded in one at a time with
//! Welford's update, so a closed window is never revisited.

use crate::detect::DetectError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Expected error rate (events per minute) for one (service, error type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub service: String,
    pub error_type: String,
    pub window_minutes: i64,
    pub mean_rate: f64,
    /// Population standard deviation of the per-window rates.
    pub stddev: f64,
    pub windows: u64,
}

/// Welford accumulator for one baseline key.
#[derive(Debug, Clone)]
pub struct BaselineAccumulator {
    service: String,
    error_type: String,
    window: Duration,
    horizon: DateTime<Utc>,
    last_end: Option<DateTime<Utc>>,
    count: u64,
    mean: f64,
    m2: f64,
}

impl BaselineAccumulator {
    /// `horizon` is the start of the analysed range; no window may close after it.
    pub fn new(
        service: impl Into<String>,
        error_type: impl Into<String>,
        window: Duration,
        horizon: DateTime<Utc>,
    ) -> Self {
        Self {
            service: service.into(),
            error_type: error_type.into(),
            window,
            horizon,
            last_end: None,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Fold in a closed window holding `events` occurrences.
    pub fn close_window(&mut self, start: DateTime<Utc>, events: u64) -> Result<(), DetectError> {
        let end = start + self.window;
        if end > self.horizon {
            return Err(DetectError::Lookahead {
                window_end: end,
                horizon: self.horizon,
            });
        }
        if let Some(previous_end) = self.last_end {
            if start < previous_end {
                return Err(DetectError::WindowOutOfOrder {
                    start,
                    previous_end,
                });
            }
        }

        let minutes = (self.window.num_seconds() as f64 / 60.0).max(f64::MIN_POSITIVE);
        let rate = events as f64 / minutes;
        self.count += 1;
        let delta = rate - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (rate - self.mean);
        self.last_end = Some(end);
        Ok(())
    }

    pub fn windows(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&self) -> Baseline {
        let variance = if self.count > 0 {
            (self.m2 / self.count as f64).max(0.0)
        } else {
            0.0
        };
        Baseline {
            service: self.service.clone(),
            error_type: self.error_type.clone(),
            window_minutes: self.window.num_minutes(),
            mean_rate: self.mean,
            stddev: variance.sqrt(),
            windows: self.count,
        }
    }
}

/// Owns every accumulator for one analysis run. Only the owner writes.
#[derive(Debug)]
pub struct BaselineStore {
    window: Duration,
    horizon: DateTime<Utc>,
    min_windows: usize,
    entries: BTreeMap<(String, String), BaselineAccumulator>,
}

impl BaselineStore {
    pub fn new(window: Duration, horizon: DateTime<Utc>, min_windows: usize) -> Self {
        Self {
            window,
            horizon,
            min_windows,
            entries: BTreeMap::new(),
        }
    }

    pub fn close_window(
        &mut self,
        service: &str,
        error_type: &str,
        start: DateTime<Utc>,
        events: u64,
    ) -> Result<(), DetectError> {
        let (window, horizon) = (self.window, self.horizon);
        self.entries
            .entry((service.to_string(), error_type.to_string()))
            .or_insert_with(|| BaselineAccumulator::new(service, error_type, window, horizon))
            .close_window(start, events)
    }

    pub fn get(&self, service: &str, error_type: &str) -> Result<Baseline, DetectError> {
        let key = (service.to_string(), error_type.to_string());
        let acc = self.entries.get(&key).ok_or(DetectError::InsufficientBaseline {
            needed: self.min_windows,
            have: 0,
        })?;
        if (acc.windows() as usize) < self.min_windows {
            return Err(DetectError::InsufficientBaseline {
                needed: self.min_windows,
                have: acc.windows() as usize,
            });
        }
        Ok(acc.snapshot())
    }

    /// All baselines, ordered by key.
    pub fn baselines(&self) -> Vec<Baseline> {
        self.entries.values().map(BaselineAccumulator::snapshot).collect()
    }
}
