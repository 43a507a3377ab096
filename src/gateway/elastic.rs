//! Elasticsearch adapter over an ECS-shaped log index.

use super::{GatewayError, LogEvent, LogFilter, LogLevel, LogQueryGateway};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Elasticsearch caps `size` at `index.max_result_window` (10k by default).
const MAX_WINDOW: usize = 10_000;

pub struct ElasticsearchGateway {
    base_url: String,
    index: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ElasticsearchGateway {
    pub fn new(
        base_url: &str,
        index: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            api_key,
            client,
        })
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `_search` body for `filter`, sorted ascending by `@timestamp`.
pub fn search_body(filter: &LogFilter, limit: usize) -> Value {
    let mut must = vec![json!({
        "range": {
            "@timestamp": { "gte": rfc3339(filter.start), "lte": rfc3339(filter.end) }
        }
    })];
    if let Some(service) = &filter.service {
        must.push(json!({ "term": { "service.name": service } }));
    }
    if let Some(min) = filter.level {
        let levels: Vec<String> = [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
            LogLevel::Fatal,
        ]
        .into_iter()
        .filter(|l| *l >= min)
        .map(|l| l.to_string())
        .collect();
        must.push(json!({ "terms": { "log.level": levels } }));
    }
    if let Some(trace_id) = &filter.trace_id {
        must.push(json!({ "term": { "trace.id": trace_id } }));
    }

    let mut bool_query = json!({ "filter": must });
    if let Some(text) = &filter.text {
        let wildcard = format!("*{}*", text.to_lowercase());
        bool_query["should"] = json!([
            { "match_phrase": { "message": text } },
            { "match_phrase": { "error.message": text } },
            { "wildcard": { "message.keyword": { "value": wildcard, "case_insensitive": true } } },
            { "wildcard": { "error.type": { "value": wildcard, "case_insensitive": true } } }
        ]);
        bool_query["minimum_should_match"] = json!(1);
    }

    json!({
        "size": limit.min(MAX_WINDOW),
        "sort": [ { "@timestamp": { "order": "asc" } } ],
        "query": { "bool": bool_query }
    })
}

fn str_at<'a>(v: &'a Value, path: &str) -> Option<&'a str> {
    path.split('.')
        .try_fold(v, |cur, key| cur.get(key))
        .and_then(Value::as_str)
}

/// Turn a `_search` response into events.
pub fn parse_hits(body: &Value) -> Result<Vec<LogEvent>, GatewayError> {
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Malformed("response has no hits.hits array".into()))?;

    let mut events = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = hit
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Malformed("hit without _id".into()))?;
        let src = hit
            .get("_source")
            .ok_or_else(|| GatewayError::Malformed(format!("hit {id} without _source")))?;

        let timestamp = src
            .get("@timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| GatewayError::Malformed(format!("hit {id} has no valid @timestamp")))?;

        let level = match str_at(src, "log.level") {
            Some(raw) => raw.parse::<LogLevel>().unwrap_or_else(|_| {
                warn!(id, level = raw, "unknown log level, treating as info");
                LogLevel::Info
            }),
            None => LogLevel::Info,
        };

        let message = src
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| str_at(src, "error.message"))
            .unwrap_or_default()
            .to_string();

        let mut attributes = BTreeMap::new();
        if let Some(labels) = src.get("labels").and_then(Value::as_object) {
            for (k, v) in labels {
                if let Some(s) = v.as_str() {
                    attributes.insert(k.clone(), s.to_string());
                }
            }
        }
        if let Some(tx) = str_at(src, "transaction.id") {
            attributes.insert("transaction_id".to_string(), tx.to_string());
        }
        if let Some(host) = str_at(src, "host.name") {
            attributes.insert("host".to_string(), host.to_string());
        }

        events.push(LogEvent {
            id: id.to_string(),
            timestamp,
            service: str_at(src, "service.name").unwrap_or("unknown").to_string(),
            level,
            message,
            error_type: str_at(src, "error.type").map(str::to_string),
            trace_id: str_at(src, "trace.id").map(str::to_string),
            span_id: str_at(src, "span.id").map(str::to_string),
            attributes,
        });
    }
    Ok(events)
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::QueryTimeout { deadline_ms: 0 }
    } else if e.is_decode() || e.is_body() {
        GatewayError::Malformed(e.to_string())
    } else {
        GatewayError::Connectivity(e.to_string())
    }
}

#[async_trait::async_trait]
impl LogQueryGateway for ElasticsearchGateway {
    #[instrument(skip(self, filter), fields(index = %self.index))]
    async fn query(&self, filter: &LogFilter, limit: usize) -> Result<Vec<LogEvent>, GatewayError> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let mut req = self.client.post(&url).json(&search_body(filter, limit));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("ApiKey {key}"));
        }

        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        match status.as_u16() {
            200 => {}
            401 | 403 => {
                return Err(GatewayError::Connectivity(format!(
                    "authentication rejected ({status})"
                )))
            }
            404 => return Err(GatewayError::Malformed(format!("index {} not found", self.index))),
            429 | 502 | 503 | 504 => {
                return Err(GatewayError::Connectivity(format!("store busy ({status})")))
            }
            _ => return Err(GatewayError::Malformed(format!("unexpected status {status}"))),
        }

        let body: Value = response.json().await.map_err(transport_error)?;
        let events = parse_hits(&body)?;
        debug!(returned = events.len(), "elasticsearch query");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "elasticsearch"
    }
}
