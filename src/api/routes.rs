//! API route definitions.

use super::state::AppState;
use crate::gateway::{LogFilter, LogLevel, TimeRange};
use crate::pipeline::{InvestigationError, InvestigationRequest};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/investigations", post(create_investigation))
        .route("/investigations/{id}", get(get_investigation))
        .route("/logs", get(search_logs))
        .route("/incidents", get(list_incidents).post(save_incident))
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = json!({
            "error": { "code": status.as_u16(), "message": self.to_string() },
            "meta": meta(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<InvestigationError> for ApiError {
    fn from(e: InvestigationError) -> Self {
        match e {
            InvestigationError::InvalidRequest(m) => ApiError::BadRequest(m),
            InvestigationError::Assembly(e) => ApiError::Internal(e.to_string()),
            InvestigationError::Corpus(e) => ApiError::Upstream(e.to_string()),
        }
    }
}

fn meta() -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn create_investigation(
    State(state): State<AppState>,
    Json(request): Json<InvestigationRequest>,
) -> Result<Json<Value>, ApiError> {
    let report = state.investigator.investigate(request).await?;
    let report = state.remember(report).await;
    info!(id = %report.id(), "investigation served");
    Ok(Json(json!({
        "data": report.as_ref(),
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "partial": report.is_partial(),
            "ambiguous": report.is_ambiguous()
        }
    })))
}

async fn get_investigation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = state
        .report(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no recent investigation with id {id}")))?;
    Ok(Json(json!({ "data": report.as_ref(), "meta": meta() })))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    service: Option<String>,
    level: Option<String>,
    text: Option<String>,
    trace_id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

async fn search_logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let config = state.investigator.config();
    let end = q.end.unwrap_or_else(Utc::now);
    let start = q
        .start
        .unwrap_or_else(|| end - chrono::Duration::minutes(config.pipeline.default_lookback_minutes));
    let range = TimeRange::new(start, end);
    if !range.is_valid() {
        return Err(ApiError::BadRequest("start must be before end".into()));
    }

    let mut filter = LogFilter::new(range);
    if let Some(s) = q.service {
        filter = filter.service(s);
    }
    if let Some(level) = q.level {
        let level: LogLevel = level.parse().map_err(|e| ApiError::BadRequest(format!("{e}")))?;
        filter = filter.min_level(level);
    }
    if let Some(t) = q.text {
        filter = filter.text(t);
    }
    if let Some(t) = q.trace_id {
        filter = filter.trace_id(t);
    }
    let limit = q
        .limit
        .unwrap_or(config.api.max_search_results)
        .min(config.api.max_search_results);

    let events = state
        .investigator
        .search(filter, limit)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    let total = events.len();
    Ok(Json(json!({ "data": events, "meta": { "total": total, "limit": limit } })))
}

#[derive(Debug, Deserialize)]
struct IncidentsQuery {
    limit: Option<usize>,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(q): Query<IncidentsQuery>,
) -> Result<Json<Value>, ApiError> {
    let incidents = state
        .investigator
        .corpus()
        .recent(q.limit.unwrap_or(20))
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    let total = incidents.len();
    Ok(Json(json!({ "data": incidents, "meta": { "total": total } })))
}

#[derive(Debug, Deserialize)]
struct SaveIncident {
    report_id: String,
    summary: String,
    #[serde(default)]
    resolution: String,
}

async fn save_incident(
    State(state): State<AppState>,
    Json(body): Json<SaveIncident>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let report = state
        .report(&body.report_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no recent investigation with id {}", body.report_id)))?;
    let incident = state
        .investigator
        .save(&report, &body.summary, &body.resolution)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": incident, "meta": meta() })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::config::EngineConfig;
    use crate::detect::incident::MemoryIncidentCorpus;
    use crate::gateway::memory::MemoryLogStore;
    use crate::gateway::test_support::*;
    use crate::pipeline::Investigator;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let store = MemoryLogStore::new(vec![
            event("p", 60, "payment-service", LogLevel::Error, "Connection pool exhausted"),
            event("c", 61, "checkout-service", LogLevel::Error, "Timeout calling payment-service"),
        ]);
        let investigator = Investigator::new(
            Arc::new(EngineConfig::default()),
            Arc::new(store),
            Arc::new(MemoryIncidentCorpus::new()),
        )
        .unwrap();
        router(AppState::new(Arc::new(investigator)))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_investigate_then_save() {
        let app = app();
        let request = json!({
            "query": "connection pool exhausted",
            "time_range": { "start": at(0).to_rfc3339(), "end": at(120).to_rfc3339() }
        });
        let (status, body) = call(&app, "POST", "/api/v1/investigations", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ranked_causes"][0]["event"]["service"], "payment-service");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "GET", &format!("/api/v1/investigations/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);

        let save = json!({ "report_id": id, "summary": "payment pool", "resolution": "raised pool size" });
        let (status, body) = call(&app, "POST", "/api/v1/incidents", Some(save)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["resolution_text"], "raised pool size");

        let (_, body) = call(&app, "GET", "/api/v1/incidents", None).await;
        assert_eq!(body["meta"]["total"], 1);
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let (status, body) = call(&app(), "POST", "/api/v1/investigations", Some(json!({ "query": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], 400);
    }

    #[tokio::test]
    async fn test_logs_search_and_bad_level() {
        let app = app();
        let uri = format!(
            "/api/v1/logs?service=payment-service&start={}&end={}",
            at(0).to_rfc3339().replace('+', "%2B"),
            at(120).to_rfc3339().replace('+', "%2B")
        );
        let (status, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["total"], 1);

        let (status, _) = call(&app, "GET", "/api/v1/logs?level=loud", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_unknown_report_is_not_found() {
        let save = json!({ "report_id": "nope", "summary": "s" });
        let (status, _) = call(&app(), "POST", "/api/v1/incidents", Some(save)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
