//! The historical incident corpus: append-only, read for similarity search.

use crate::analysis::similarity::{IncidentMatcher, Signature, SimilarIncident};
use crate::storage::Pool;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("incident corpus unavailable: {0}")]
    Unavailable(String),

    #[error("incident corpus storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("incident record could not be (de)serialised: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A saved, confirmed investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalIncident {
    pub id: String,
    pub summary: String,
    pub signature_vector: Vec<f64>,
    pub affected_services: Vec<String>,
    pub resolution_text: String,
    pub created_at: DateTime<Utc>,
    /// Report the incident was saved from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

#[async_trait::async_trait]
pub trait IncidentCorpus: Send + Sync {
    async fn load_all(&self) -> Result<Vec<HistoricalIncident>, CorpusError>;

    /// Store a new entry. Existing entries are never rewritten.
    async fn append(&self, incident: HistoricalIncident) -> Result<(), CorpusError>;

    /// Newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<HistoricalIncident>, CorpusError> {
        let mut all = self.load_all().await?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        all.truncate(limit);
        Ok(all)
    }

    async fn find_similar(
        &self,
        matcher: &IncidentMatcher,
        signature: &Signature,
    ) -> Result<Vec<SimilarIncident>, CorpusError> {
        let all = self.load_all().await?;
        Ok(matcher.rank(signature, &all))
    }
}

/// Corpus kept in process memory.
#[derive(Default)]
pub struct MemoryIncidentCorpus {
    incidents: RwLock<Vec<HistoricalIncident>>,
}

impl MemoryIncidentCorpus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IncidentCorpus for MemoryIncidentCorpus {
    async fn load_all(&self) -> Result<Vec<HistoricalIncident>, CorpusError> {
        self.incidents
            .read()
            .map(|v| v.clone())
            .map_err(|_| CorpusError::Unavailable("memory corpus poisoned".into()))
    }

    async fn append(&self, incident: HistoricalIncident) -> Result<(), CorpusError> {
        self.incidents
            .write()
            .map_err(|_| CorpusError::Unavailable("memory corpus poisoned".into()))?
            .push(incident);
        Ok(())
    }
}

/// Corpus stored in the `incidents` table.
#[derive(Clone)]
pub struct SqliteIncidentCorpus {
    pool: Pool,
}

impl SqliteIncidentCorpus {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn insert(pool: &Pool, incident: &HistoricalIncident) -> Result<(), CorpusError> {
        let conn = pool
            .get()
            .map_err(|e| CorpusError::Unavailable(e.to_string()))?;
        conn.execute(
            "INSERT INTO incidents (id, summary, signature_json, services_json, resolution, created_at, report_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                incident.id,
                incident.summary,
                serde_json::to_string(&incident.signature_vector)?,
                serde_json::to_string(&incident.affected_services)?,
                incident.resolution_text,
                incident.created_at.to_rfc3339(),
                incident.report_id,
            ],
        )?;
        Ok(())
    }

    fn select_all(pool: &Pool) -> Result<Vec<HistoricalIncident>, CorpusError> {
        let conn = pool
            .get()
            .map_err(|e| CorpusError::Unavailable(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT id, summary, signature_json, services_json, resolution, created_at, report_id
             FROM incidents ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut incidents = Vec::new();
        for r in rows {
            let (id, summary, signature_json, services_json, resolution_text, created_at, report_id) = r?;
            let created_at = match DateTime::parse_from_rfc3339(&created_at) {
                Ok(t) => t.with_timezone(&Utc),
                Err(e) => {
                    warn!(%id, error = %e, "skipping incident with unreadable timestamp");
                    continue;
                }
            };
            incidents.push(HistoricalIncident {
                id,
                summary,
                signature_vector: serde_json::from_str(&signature_json)?,
                affected_services: serde_json::from_str(&services_json)?,
                resolution_text,
                created_at,
                report_id,
            });
        }
        Ok(incidents)
    }
}

#[async_trait::async_trait]
impl IncidentCorpus for SqliteIncidentCorpus {
    async fn load_all(&self) -> Result<Vec<HistoricalIncident>, CorpusError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || Self::select_all(&pool))
            .await
            .map_err(|e| CorpusError::Unavailable(format!("corpus task failed: {e}")))?
    }

    async fn append(&self, incident: HistoricalIncident) -> Result<(), CorpusError> {
        let pool = self.pool.clone();
        let id = incident.id.clone();
        tokio::task::spawn_blocking(move || Self::insert(&pool, &incident))
            .await
            .map_err(|e| CorpusError::Unavailable(format!("corpus task failed: {e}")))??;
        info!(%id, "incident appended to corpus");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::gateway::test_support::at;

    fn sample(id: &str, minute: i64, matcher: &IncidentMatcher) -> (HistoricalIncident, Signature) {
        let sig = Signature::new("connection pool exhausted", ["payment-service"], at(minute));
        (
            HistoricalIncident {
                id: id.to_string(),
                summary: "payment pool exhaustion".to_string(),
                signature_vector: matcher.embed(&sig),
                affected_services: sig.services.clone(),
                resolution_text: "raised max pool size".to_string(),
                created_at: at(minute),
                report_id: Some("r-1".to_string()),
            },
            sig,
        )
    }

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_match() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::storage::open_pool(&dir.path().join("corpus.db")).unwrap();
        let corpus = SqliteIncidentCorpus::new(pool);
        let matcher = IncidentMatcher::new(MatcherConfig::default());

        let (first, sig) = sample("a", 0, &matcher);
        let (second, _) = sample("b", 30, &matcher);
        corpus.append(first.clone()).await.unwrap();
        corpus.append(second).await.unwrap();

        let all = corpus.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], first);

        let recent = corpus.recent(1).await.unwrap();
        assert_eq!(recent[0].id, "b");

        let similar = corpus.find_similar(&matcher, &sig).await.unwrap();
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].similarity, 1.0);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::storage::open_pool(&dir.path().join("corpus.db")).unwrap();
        let corpus = SqliteIncidentCorpus::new(pool);
        let matcher = IncidentMatcher::new(MatcherConfig::default());
        let (inc, _) = sample("a", 0, &matcher);
        corpus.append(inc.clone()).await.unwrap();
        assert!(matches!(corpus.append(inc).await, Err(CorpusError::Storage(_))));
    }

    #[tokio::test]
    async fn test_memory_corpus() {
        let corpus = MemoryIncidentCorpus::new();
        let matcher = IncidentMatcher::new(MatcherConfig::default());
        assert!(corpus.find_similar(&matcher, &Signature::new("x", ["y"], at(0))).await.unwrap().is_empty());
        let (inc, sig) = sample("a", 0, &matcher);
        corpus.append(inc).await.unwrap();
        let found = corpus.find_similar(&matcher, &sig).await.unwrap();
        assert_eq!(found[0].incident_id, "a");
    }
}
