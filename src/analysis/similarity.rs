//! Incident signatures and similarity search over past incidents.
//!
//! A signature is embedded by feature hashing: every normalised text token,
//! every affected service and the time-of-day bucket is hashed with SHA-256
//! into one of `dimensions` signed buckets, and the vector is L2-normalised.

use crate::config::MatcherConfig;
use crate::detect::incident::HistoricalIncident;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// What the matcher compares: normalised error text, affected services and
/// when it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub text: String,
    /// Sorted and deduplicated.
    pub services: Vec<String>,
    /// Hour of day / 4, so 0..=5.
    pub time_bucket: u8,
}

impl Signature {
    pub fn new<I, S>(text: &str, services: I, at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let services: BTreeSet<String> = services.into_iter().map(Into::into).collect();
        Self {
            text: normalize(text),
            services: services.into_iter().collect(),
            time_bucket: time_bucket(at),
        }
    }
}

pub fn time_bucket(at: DateTime<Utc>) -> u8 {
    (at.hour() / 4) as u8
}

fn is_uuid(token: &str) -> bool {
    let parts: Vec<&str> = token.split('-').collect();
    parts.len() == 5
        && parts
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(p, len)| p.len() == len && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn normalize_token(token: &str) -> String {
    if is_uuid(token) {
        return "<uuid>".to_string();
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return "<num>".to_string();
    }
    if token.len() >= 8
        && token.chars().all(|c| c.is_ascii_hexdigit())
        && token.chars().any(|c| c.is_ascii_digit())
    {
        return "<hex>".to_string();
    }
    // Collapse digit runs inside mixed tokens: "5000ms" -> "#ms".
    let mut out = String::with_capacity(token.len());
    let mut in_digits = false;
    for c in token.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                out.push('#');
            }
            in_digits = true;
        } else {
            out.push(c);
            in_digits = false;
        }
    }
    out
}

/// Lowercase, split into word tokens and replace numbers, hex ids and UUIDs
/// with placeholders so that two occurrences of the same failure compare equal.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|t| t.trim_matches(|c| c == '-' || c == '_'))
        .filter(|t| !t.is_empty())
        .map(normalize_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn hash_feature(feature: &str, dimensions: usize) -> (usize, f64) {
    let digest = Sha256::digest(feature.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let index = (u64::from_le_bytes(head) % dimensions as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    (index, sign)
}

/// L2-normalised embedding of `signature`. All zeros when it has no features.
pub fn embed(signature: &Signature, dimensions: usize) -> Vec<f64> {
    let dimensions = dimensions.max(1);
    let mut v = vec![0.0; dimensions];
    let features = signature
        .text
        .split_whitespace()
        .map(|t| format!("tok:{t}"))
        .chain(signature.services.iter().map(|s| format!("svc:{s}")))
        .chain(std::iter::once(format!("tod:{}", signature.time_bucket)));
    for f in features {
        let (i, sign) = hash_feature(&f, dimensions);
        v[i] += sign;
    }
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// A past incident that resembles the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarIncident {
    pub incident_id: String,
    pub summary: String,
    pub resolution: String,
    pub affected_services: Vec<String>,
    pub similarity: f64,
    pub cosine: f64,
    pub service_overlap: f64,
}

pub struct IncidentMatcher {
    config: MatcherConfig,
}

impl IncidentMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn embed(&self, signature: &Signature) -> Vec<f64> {
        embed(signature, self.config.dimensions)
    }

    /// `min(1, max(0, cosine) + boost * jaccard(services))`.
    pub fn similarity(&self, signature: &Signature, vector: &[f64], incident: &HistoricalIncident) -> (f64, f64, f64) {
        let cos = cosine(vector, &incident.signature_vector).max(0.0);
        let overlap = jaccard(&signature.services, &incident.affected_services);
        let total = (cos + self.config.service_overlap_boost * overlap).min(1.0);
        (total, cos, overlap)
    }

    /// Top-K incidents whose similarity reaches the configured floor, best
    /// first. An empty corpus gives an empty list.
    pub fn rank(&self, signature: &Signature, corpus: &[HistoricalIncident]) -> Vec<SimilarIncident> {
        let vector = self.embed(signature);
        let mut matches: Vec<SimilarIncident> = corpus
            .iter()
            .filter(|incident| {
                let fits = incident.signature_vector.len() == vector.len();
                if !fits {
                    warn!(
                        incident = %incident.id,
                        stored = incident.signature_vector.len(),
                        expected = vector.len(),
                        "skipping incident with mismatched signature dimension"
                    );
                }
                fits
            })
            .filter_map(|incident| {
                let (similarity, cosine, service_overlap) = self.similarity(signature, &vector, incident);
                (similarity > self.config.min_similarity).then(|| SimilarIncident {
                    incident_id: incident.id.clone(),
                    summary: incident.summary.clone(),
                    resolution: incident.resolution_text.clone(),
                    affected_services: incident.affected_services.clone(),
                    similarity,
                    cosine,
                    service_overlap,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.incident_id.cmp(&b.incident_id))
        });
        matches.truncate(self.config.top_k);
        debug!(corpus = corpus.len(), matches = matches.len(), "similar incidents ranked");
        matches
    }
}
