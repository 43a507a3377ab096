//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use logsleuth::config::EngineConfig;
use logsleuth::detect::incident::{IncidentCorpus, MemoryIncidentCorpus};
use logsleuth::gateway::memory::MemoryLogStore;
use logsleuth::gateway::{LogEvent, LogLevel, TimeRange};
use logsleuth::pipeline::Investigator;
use std::sync::Arc;

/// T+`minute` from 2024-03-14 09:00 UTC.
pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 9, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn window() -> TimeRange {
    TimeRange::new(at(0), at(120))
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
        attributes: Default::default(),
    }
}

/// Background chatter plus a payment database failure at T+60 that drags
/// down checkout and the API gateway.
pub fn database_cascade() -> Vec<LogEvent> {
    let mut events = vec![
        event("inf-1", 5, "payment-service", LogLevel::Info, "Processed payment for order 1001"),
        event("inf-2", 20, "checkout-service", LogLevel::Info, "Cart checked out"),
        event("inf-3", 45, "api-gateway", LogLevel::Info, "GET /api/orders 200"),
        event("hist-1", -50, "checkout-service", LogLevel::Error, "Invalid coupon code"),
        event("hist-2", -20, "checkout-service", LogLevel::Error, "Invalid coupon code"),
    ];
    let mut pool = event(
        "pay-1",
        60,
        "payment-service",
        LogLevel::Error,
        "Connection pool exhausted: no available connections after 30000ms",
    );
    pool.error_type = Some("ConnectionPoolExhausted".into());
    events.push(pool);
    events.push(event(
        "chk-1",
        61,
        "checkout-service",
        LogLevel::Error,
        "Timeout calling payment-service after 5000ms",
    ));
    events.push(event(
        "gw-1",
        63,
        "api-gateway",
        LogLevel::Error,
        "Upstream checkout-service request timed out (504)",
    ));
    events
}

/// Slow inventory responses under load at T+30 with order-service timing
/// out on them, plus one unrelated timeout much later. No trace ids.
pub fn timeout_cascade() -> Vec<LogEvent> {
    vec![
        event("inf-1", 10, "inventory-service", LogLevel::Info, "Stock level refreshed"),
        event(
            "inv-1",
            30,
            "inventory-service",
            LogLevel::Warn,
            "Slow response under load: stock query timeout after 4200ms",
        ),
        event("ord-1", 32, "order-service", LogLevel::Error, "Call to inventory-service failed: timeout after 5000ms"),
        event("ord-2", 33, "order-service", LogLevel::Error, "Call to inventory-service failed: timeout after 5000ms"),
        event("srch-1", 100, "search-service", LogLevel::Error, "Cache lookup timeout after 200ms"),
    ]
}

/// Inventory slowing down at T+30 with checkout timing out on it and the
/// gateway failing on checkout. Dependencies are spelled out in words and
/// named again in an `upstream_service` label. No trace ids.
pub fn upstream_timeouts() -> Vec<LogEvent> {
    let mut slow = event(
        "inv-1",
        30,
        "inventory-service",
        LogLevel::Warn,
        "Slow query detected - inventory check took 4200ms",
    );
    slow.attributes.insert("slow_query".into(), "true".into());

    let timeout = |id: &str, minute: i64| {
        let mut e = event(
            id,
            minute,
            "checkout-service",
            LogLevel::Error,
            "Timeout waiting for inventory service response",
        );
        e.error_type = Some("TimeoutException".into());
        e.attributes.insert("upstream_service".into(), "inventory-service".into());
        e.attributes.insert("timeout_ms".into(), "5000".into());
        e
    };

    let mut unavailable = event(
        "gw-1",
        33,
        "api-gateway",
        LogLevel::Error,
        "Request failed - checkout service unavailable",
    );
    unavailable.error_type = Some("ServiceUnavailableException".into());
    unavailable.attributes.insert("upstream_service".into(), "checkout-service".into());

    vec![
        event("inf-1", 10, "inventory-service", LogLevel::Info, "Stock level refreshed"),
        slow,
        timeout("chk-1", 31),
        timeout("chk-2", 32),
        unavailable,
    ]
}

pub fn investigator_with_config(config: EngineConfig, events: Vec<LogEvent>) -> Investigator {
    Investigator::new(
        Arc::new(config),
        Arc::new(MemoryLogStore::new(events)),
        Arc::new(MemoryIncidentCorpus::new()),
    )
    .unwrap()
}

pub fn investigator_with(events: Vec<LogEvent>, corpus: Arc<dyn IncidentCorpus>) -> Investigator {
    Investigator::new(
        Arc::new(EngineConfig::default()),
        Arc::new(MemoryLogStore::new(events)),
        corpus,
    )
    .unwrap()
}

pub fn investigator(events: Vec<LogEvent>) -> Investigator {
    investigator_with(events, Arc::new(MemoryIncidentCorpus::new()))
}
