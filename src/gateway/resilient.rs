use super::{GatewayError, LogEvent, LogFilter, LogQueryGateway, RetryExhausted};
use crate::config::GatewayConfig;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Filters remembered for partial results before the cache is reset.
const CACHE_ENTRIES: usize = 256;

/// Deadline and retry budget applied to every gateway call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub query_timeout: Duration,
}

impl RetryPolicy {
    /// Exponential backoff before retry number `attempt + 1`, with up to 10%
    /// jitter so parallel callers do not retry in lockstep.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let exp = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = (exp.as_millis() as u64) / 10;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }
}

impl From<&GatewayConfig> for RetryPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            query_timeout: Duration::from_millis(config.query_timeout_ms),
        }
    }
}

/// Wraps an adapter with per-query deadlines, bounded retries and a cache of
/// the last good result per filter.
pub struct ResilientGateway {
    inner: Arc<dyn LogQueryGateway>,
    policy: RetryPolicy,
    max_results: usize,
    last_good: Mutex<HashMap<LogFilter, Vec<LogEvent>>>,
}

impl ResilientGateway {
    pub fn new(inner: Arc<dyn LogQueryGateway>, policy: RetryPolicy, max_results: usize) -> Self {
        Self {
            inner,
            policy,
            max_results: max_results.max(1),
            last_good: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Run `filter` until it succeeds, fails permanently, is cancelled, or
    /// runs out of attempts.
    pub async fn fetch(
        &self,
        filter: &LogFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<LogEvent>, RetryExhausted> {
        let deadline_ms = self.policy.query_timeout.as_millis() as u64;
        let mut last_error = GatewayError::Cancelled;
        let mut attempts = 0;

        while attempts < self.policy.max_attempts {
            if cancel.is_cancelled() {
                last_error = GatewayError::Cancelled;
                break;
            }
            attempts += 1;

            let call = tokio::time::timeout(
                self.policy.query_timeout,
                self.inner.query(filter, self.max_results),
            );
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GatewayError::Cancelled),
                res = call => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(GatewayError::QueryTimeout { deadline_ms }),
                },
            };

            match outcome {
                Ok(mut events) => {
                    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
                    events.truncate(self.max_results);
                    debug!(
                        store = self.inner.name(),
                        attempts,
                        returned = events.len(),
                        "query complete"
                    );
                    let mut cache = self.last_good.lock().await;
                    if cache.len() >= CACHE_ENTRIES && !cache.contains_key(filter) {
                        cache.clear();
                    }
                    cache.insert(filter.clone(), events.clone());
                    return Ok(events);
                }
                Err(e) if e.is_transient() && attempts < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempts - 1);
                    warn!(
                        store = self.inner.name(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient query failure, backing off"
                    );
                    last_error = e;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            last_error = GatewayError::Cancelled;
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    last_error = e;
                    break;
                }
            }
        }

        if last_error != GatewayError::Cancelled {
            error!(store = self.inner.name(), attempts, error = %last_error, "query failed");
        }
        let partial = self.last_good.lock().await.get(filter).cloned();
        Err(RetryExhausted {
            error: last_error,
            attempts,
            partial,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::*;
    use crate::gateway::{LogLevel, TimeRange};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers with one event.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: GatewayError,
    }

    #[async_trait::async_trait]
    impl LogQueryGateway for Flaky {
        async fn query(&self, _filter: &LogFilter, _limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(vec![event("e1", 1, "payment-service", LogLevel::Error, "boom")])
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            query_timeout: Duration::from_millis(200),
        }
    }

    fn filter() -> LogFilter {
        LogFilter::new(TimeRange::new(at(0), at(10)))
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: GatewayError::Connectivity("refused".into()),
        });
        let gw = ResilientGateway::new(flaky.clone(), policy(3), 100);
        let events = gw.fetch(&filter(), &CancellationToken::new()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: GatewayError::Malformed("garbage".into()),
        });
        let gw = ResilientGateway::new(flaky.clone(), policy(5), 100);
        let err = gw.fetch(&filter(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(err.partial.is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_returns_cached_partial() {
        let flaky = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
            error: GatewayError::Connectivity("refused".into()),
        });
        let gw = ResilientGateway::new(flaky.clone(), policy(2), 100);
        gw.fetch(&filter(), &CancellationToken::new()).await.unwrap();

        // Every later call fails.
        let broken = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            error: GatewayError::Connectivity("refused".into()),
        });
        let gw2 = ResilientGateway {
            inner: broken,
            policy: policy(2),
            max_results: 100,
            last_good: Mutex::new(gw.last_good.lock().await.clone()),
        };
        let err = gw2.fetch(&filter(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.partial.map(|p| p.len()), Some(1));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let flaky = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
            error: GatewayError::Connectivity("refused".into()),
        });
        let gw = ResilientGateway::new(flaky.clone(), policy(3), 100);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gw.fetch(&filter(), &cancel).await.unwrap_err();
        assert_eq!(err.error, GatewayError::Cancelled);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            query_timeout: Duration::from_secs(1),
        };
        assert!(p.backoff(0) >= Duration::from_millis(100));
        assert!(p.backoff(2) >= Duration::from_millis(400));
        assert!(p.backoff(10) <= Duration::from_millis(1100));
    }
}
