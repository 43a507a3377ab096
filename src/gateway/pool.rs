use super::{LogEvent, LogFilter, ResilientGateway, RetryExhausted};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Bounded worker pool for gateway calls made during one investigation.
///
/// At most `limit` queries are in flight at once. Every call observes the
/// investigation's cancellation token, both while waiting for a permit and
/// while the query runs.
#[derive(Clone)]
pub struct QueryPool {
    gateway: Arc<ResilientGateway>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl QueryPool {
    pub fn new(gateway: Arc<ResilientGateway>, limit: usize, cancel: CancellationToken) -> Self {
        Self {
            gateway,
            permits: Arc::new(Semaphore::new(limit.max(1))),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn run(&self, filter: LogFilter) -> Result<Vec<LogEvent>, RetryExhausted> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RetryExhausted::cancelled()),
            permit = self.permits.acquire() => match permit {
                Ok(p) => p,
                Err(_) => return Err(RetryExhausted::cancelled()),
            },
        };
        self.gateway.fetch(&filter, &self.cancel).await
    }

    /// Run every filter through the pool and return the outcomes in input order.
    pub async fn run_all(
        &self,
        filters: Vec<LogFilter>,
    ) -> Vec<(LogFilter, Result<Vec<LogEvent>, RetryExhausted>)> {
        let calls = filters.into_iter().map(|filter| async move {
            let result = self.run(filter.clone()).await;
            (filter, result)
        });
        futures::future::join_all(calls).await
    }
}
