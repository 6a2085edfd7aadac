//! Query path: readiness gate, query embedding, ranking and truncation.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchConfig;
use crate::records::Record;

use super::errors::{EmbeddingError, SearchError};
use super::index::VectorIndex;
use super::provider::EmbeddingProvider;
use super::ranker;

/// Incoming search request.
///
/// Fields are kept as raw JSON so that a wrong type can be told apart from a
/// missing value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<Value>,

    #[serde(default, rename = "topK")]
    pub top_k: Option<Value>,
}

impl SearchRequest {
    pub fn new(query: &str, top_k: Option<i64>) -> Self {
        Self {
            query: Some(Value::from(query)),
            top_k: top_k.map(Value::from),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    #[serde(rename = "topK")]
    pub top_k: usize,
    pub results: Vec<ScoredResult>,
}

/// A record's public fields plus its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    #[serde(flatten)]
    pub record: Record,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub indexed: usize,
}

pub struct SearchService {
    index: Arc<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
    query_timeout: Duration,
}

impl SearchService {
    pub fn new(
        index: Arc<VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
        query_timeout: Duration,
    ) -> Self {
        Self {
            index,
            provider,
            config,
            query_timeout,
        }
    }

    /// Never waits on a rebuild.
    pub fn readiness(&self) -> Readiness {
        let snapshot = self.index.snapshot();
        Readiness {
            ready: snapshot.ready,
            indexed: if snapshot.ready {
                snapshot.entries.len()
            } else {
                0
            },
        }
    }

    /// Rank indexed records against `request.query`.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        if !self.index.is_ready() {
            return Err(SearchError::NotReady);
        }

        let query = validate_query(request.query.as_ref())?;
        let top_k = self.resolve_top_k(request.top_k.as_ref());

        log::debug!("search query={query:?} top_k={top_k}");

        let query_embedding =
            match tokio::time::timeout(self.query_timeout, self.provider.embed_one(&query)).await
            {
                Ok(result) => result,
                Err(_) => Err(EmbeddingError::Timeout(self.query_timeout)),
            }
            .map_err(|err| {
                log::warn!("query embedding via {} failed: {err}", self.provider.name());
                SearchError::from(err)
            })?;

        // a rebuild may have started while the query was in flight
        let snapshot = self.index.snapshot();
        if !snapshot.ready {
            return Err(SearchError::NotReady);
        }

        let mut scored = ranker::score(&query_embedding, &snapshot.entries).map_err(|err| {
            log::error!("index corrupted, {err} (provider {})", self.provider.name());
            SearchError::from(err)
        })?;

        // stable: equal scores keep insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);

        let results = scored
            .into_iter()
            .map(|(record, similarity)| ScoredResult {
                record: record.clone(),
                similarity,
            })
            .collect::<Vec<_>>();

        log::info!(
            "search {query:?} returned {} of {} records",
            results.len(),
            snapshot.entries.len()
        );

        Ok(SearchResponse {
            query,
            top_k,
            results,
        })
    }

    /// Clamp the requested result count to `[1, max_top_k]`.
    ///
    /// Missing, non-numeric and values below 1 all fall back to the default.
    pub fn resolve_top_k(&self, top_k: Option<&Value>) -> usize {
        let max = self.config.max_top_k;
        let default = self.config.default_top_k.min(max);

        match top_k.and_then(parse_int) {
            Some(k) if k >= 1 => (k as u64).min(max as u64) as usize,
            _ => default,
        }
    }
}

fn validate_query(query: Option<&Value>) -> Result<String, SearchError> {
    match query {
        Some(Value::String(query)) if !query.is_empty() => Ok(query.clone()),
        Some(Value::String(_)) => Err(SearchError::InvalidArgument(
            "query string must not be empty".to_string(),
        )),
        Some(_) => Err(SearchError::InvalidArgument(
            "query must be a string".to_string(),
        )),
        None => Err(SearchError::InvalidArgument(
            "query string required".to_string(),
        )),
    }
}

/// Read an integer the way a lenient form parser would: numbers truncate toward
/// zero, strings contribute their leading signed digits ("12abc" is 12).
fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            let digits = &digits[..end];
            if digits.is_empty() {
                return None;
            }
            // overflowing digit runs are still "large"
            Some(digits.parse::<i64>().map(|n| sign * n).unwrap_or(sign * i64::MAX))
        }
        _ => None,
    }
}
