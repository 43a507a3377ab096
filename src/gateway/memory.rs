use super::{GatewayError, LogEvent, LogFilter, LogQueryGateway};
use std::sync::RwLock;

/// Log store held entirely in process memory.
pub struct MemoryLogStore {
    events: RwLock<Vec<LogEvent>>,
}

impl MemoryLogStore {
    pub fn new(mut events: Vec<LogEvent>) -> Self {
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self {
            events: RwLock::new(events),
        }
    }

    pub fn push(&self, event: LogEvent) -> Result<(), GatewayError> {
        let mut events = self
            .events
            .write()
            .map_err(|_| GatewayError::Connectivity("memory store poisoned".into()))?;
        let pos = events.partition_point(|e| e.timestamp <= event.timestamp);
        events.insert(pos, event);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl LogQueryGateway for MemoryLogStore {
    async fn query(&self, filter: &LogFilter, limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
        let events = self
            .events
            .read()
            .map_err(|_| GatewayError::Connectivity("memory store poisoned".into()))?;
        Ok(events
            .iter()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
