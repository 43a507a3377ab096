//! End-to-end investigations against the in-memory adapters.

mod common;

use common::*;
use logsleuth::config::EngineConfig;
use logsleuth::detect::incident::{IncidentCorpus, MemoryIncidentCorpus};
use logsleuth::evidence::summary;
use logsleuth::gateway::LogLevel;
use logsleuth::pipeline::InvestigationRequest;
use std::sync::Arc;

#[tokio::test]
async fn test_database_failure_cascade() {
    let inv = investigator(database_cascade());
    let report = inv
        .investigate(InvestigationRequest::new("connection pool exhausted").time_range(window()))
        .await
        .unwrap();

    assert!(!report.is_partial(), "errors: {:?}", report.errors());
    assert!(!report.is_ambiguous());

    let group = &report.correlation_groups()[0];
    assert_eq!(group.len(), 3);
    assert_eq!(
        group.services(),
        &["payment-service", "checkout-service", "api-gateway"]
    );

    let root = report.root_cause().unwrap();
    assert_eq!(root.event.id, "pay-1");
    assert_eq!(root.matched_pattern.as_deref(), Some("connection_pool_exhaustion"));
    assert!((root.score - 0.95).abs() < 1e-9);

    assert_eq!(
        report.affected_services(),
        &["payment-service", "checkout-service", "api-gateway"]
    );
    assert!(report.evidence().iter().any(|id| id == "pay-1"));
    assert!(report
        .anomalies()
        .iter()
        .any(|a| a.service == "payment-service" && a.error_type == "ConnectionPoolExhausted"));

    let text = summary::render(&report);
    assert!(text.contains("payment-service -> checkout-service -> api-gateway"));
}

#[tokio::test]
async fn test_timeout_cascade_without_trace_ids() {
    let inv = investigator(timeout_cascade());
    let report = inv
        .investigate(InvestigationRequest::new("timeout").time_range(window()))
        .await
        .unwrap();

    let groups = report.correlation_groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].services(), &["inventory-service", "order-service"]);
    assert!(groups[0].contains_event("inv-1"));
    assert!(groups[0].contains_event("ord-1"));
    assert!(groups[0].contains_event("ord-2"));
    assert!(groups[1].contains_event("srch-1"));

    assert_eq!(report.root_cause().unwrap().event.service, "inventory-service");
    assert_eq!(report.affected_services(), &["inventory-service", "order-service"]);
    // First event of every group is cited.
    assert!(report.evidence().iter().any(|id| id == "srch-1"));
}

#[tokio::test]
async fn test_timeout_cascade_with_spelled_out_dependencies() {
    let report = investigator(upstream_timeouts())
        .investigate(InvestigationRequest::new("slow query").time_range(window()))
        .await
        .unwrap();

    assert!(!report.is_partial(), "errors: {:?}", report.errors());
    let groups = report.correlation_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(
        groups[0].services(),
        &["inventory-service", "checkout-service", "api-gateway"]
    );
    for id in ["inv-1", "chk-1", "chk-2", "gw-1"] {
        assert!(groups[0].contains_event(id), "missing {id}");
    }
    assert_eq!(
        report.affected_services(),
        &["inventory-service", "checkout-service", "api-gateway"]
    );
}

#[tokio::test]
async fn test_dependency_graph_pulls_in_silent_callers() {
    let events = || {
        vec![
            event("inv-1", 30, "inventory-service", LogLevel::Warn, "Slow query detected - inventory check took 4200ms"),
            event("chk-1", 31, "checkout-service", LogLevel::Error, "Read timed out after 5000ms"),
        ]
    };
    let request = InvestigationRequest::new("slow query").time_range(window());

    let report = investigator(events()).investigate(request.clone()).await.unwrap();
    assert_eq!(report.affected_services(), &["inventory-service"]);

    let mut config = EngineConfig::default();
    config
        .ranking
        .dependencies
        .insert("checkout-service".into(), vec!["inventory-service".into()]);
    let report = investigator_with_config(config, events())
        .investigate(request)
        .await
        .unwrap();
    assert_eq!(report.correlation_groups().len(), 1);
    assert_eq!(report.affected_services(), &["inventory-service", "checkout-service"]);
}

#[tokio::test]
async fn test_comparable_groups_are_ranked_separately() {
    let events = vec![
        event("a1", 10, "svc-a", LogLevel::Error, "Disk write failed"),
        event("a2", 11, "svc-b", LogLevel::Error, "Call to svc-a failed"),
        event("a3", 12, "svc-c", LogLevel::Error, "Call to svc-b failed"),
        event("b1", 80, "svc-x", LogLevel::Error, "Queue publish failed"),
        event("b2", 81, "svc-y", LogLevel::Error, "Call to svc-x failed"),
        event("b3", 82, "svc-z", LogLevel::Error, "Call to svc-y failed"),
    ];
    let report = investigator(events)
        .investigate(InvestigationRequest::new("failed").time_range(window()))
        .await
        .unwrap();

    assert!(report.is_ambiguous());
    assert!(report.explanation().unwrap().contains("comparable"));
    let mut keys: Vec<&str> = report.ranked_causes().iter().map(|c| c.group_key.as_str()).collect();
    keys.dedup();
    assert_eq!(keys.len(), 2);
    assert_eq!(report.affected_services().len(), 6);
}

#[tokio::test]
async fn test_saved_incident_is_found_again() {
    let corpus: Arc<dyn IncidentCorpus> = Arc::new(MemoryIncidentCorpus::new());
    let inv = investigator_with(database_cascade(), corpus.clone());
    let request = InvestigationRequest::new("connection pool exhausted").time_range(window());

    let first = inv.investigate(request.clone()).await.unwrap();
    assert!(first.similar_incidents().is_empty());

    let saved = inv
        .save(&first, "Payment DB pool exhaustion", "Raised pool size to 50")
        .await
        .unwrap();
    assert_eq!(corpus.load_all().await.unwrap().len(), 1);

    let second = inv.investigate(request).await.unwrap();
    let best = &second.similar_incidents()[0];
    assert_eq!(best.incident_id, saved.id);
    assert_eq!(best.similarity, 1.0);
    assert!(summary::render(&second).contains("Raised pool size to 50"));
}
