//! Investigations backed by SQLite for both the log store and the corpus.

mod common;

use common::*;
use logsleuth::config::EngineConfig;
use logsleuth::detect::incident::{IncidentCorpus, SqliteIncidentCorpus};
use logsleuth::gateway::sqlite::SqliteLogStore;
use logsleuth::gateway::{LogFilter, LogLevel};
use logsleuth::pipeline::{InvestigationRequest, Investigator};
use std::sync::Arc;

fn setup(dir: &std::path::Path) -> (Investigator, Arc<SqliteIncidentCorpus>) {
    let pool = logsleuth::storage::open_pool(&dir.join("logsleuth.db")).unwrap();
    let store = SqliteLogStore::new(pool.clone());
    assert_eq!(store.insert_events(&database_cascade()).unwrap(), 8);
    let corpus = Arc::new(SqliteIncidentCorpus::new(pool));
    let inv = Investigator::new(Arc::new(EngineConfig::default()), Arc::new(store), corpus.clone()).unwrap();
    (inv, corpus)
}

#[tokio::test]
async fn test_cascade_over_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let (inv, corpus) = setup(dir.path());

    let report = inv
        .investigate(InvestigationRequest::new("Connection Pool Exhausted").time_range(window()))
        .await
        .unwrap();
    assert_eq!(report.root_cause().unwrap().event.id, "pay-1");
    assert_eq!(
        report.affected_services(),
        &["payment-service", "checkout-service", "api-gateway"]
    );

    inv.save(&report, "payment pool exhaustion", "raised pool size")
        .await
        .unwrap();
    let saved = corpus.recent(10).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].report_id.as_deref(), Some(report.id()));
}

#[tokio::test]
async fn test_search_filters_pushed_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let (inv, _) = setup(dir.path());

    let errors = inv
        .search(LogFilter::new(window()).min_level(LogLevel::Error), 100)
        .await
        .unwrap();
    let ids: Vec<&str> = errors.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["pay-1", "chk-1", "gw-1"]);

    let limited = inv.search(LogFilter::new(window()), 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, "inf-1");
}
