use crate::evidence::IncidentReport;
use crate::pipeline::Investigator;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Reports kept so that an operator can save one after reviewing it.
const RECENT_REPORTS: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub investigator: Arc<Investigator>,
    reports: Arc<Mutex<VecDeque<Arc<IncidentReport>>>>,
}

impl AppState {
    pub fn new(investigator: Arc<Investigator>) -> Self {
        Self {
            investigator,
            reports: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_REPORTS))),
        }
    }

    pub async fn remember(&self, report: IncidentReport) -> Arc<IncidentReport> {
        let report = Arc::new(report);
        let mut reports = self.reports.lock().await;
        if reports.len() == RECENT_REPORTS {
            reports.pop_front();
        }
        reports.push_back(report.clone());
        report
    }

    pub async fn report(&self, id: &str) -> Option<Arc<IncidentReport>> {
        self.reports
            .lock()
            .await
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }
}
