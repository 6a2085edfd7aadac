//! Crate-level tests and shared test doubles.


use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::semantic::{EmbeddingError, EmbeddingProvider};

/// Deterministic embedding provider.
///
/// Known texts map to fixed vectors, anything else gets a vector of ones. Every
/// call is counted, failing calls included.
pub struct StubEmbedder {
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    /// Calls numbered below this fail.
    fail_first: usize,
    /// Calls numbered at or above this fail.
    fail_from: usize,
    drop_last: bool,
    delay: Option<Duration>,
}

impl StubEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: HashMap::new(),
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(vec![]),
            fail_first: 0,
            fail_from: usize::MAX,
            drop_last: false,
            delay: None,
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Every call fails.
    pub fn failing(self) -> Self {
        self.failing_after(0)
    }

    /// The first `n` calls fail with a transient error.
    pub fn failing_times(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// The first `n` calls succeed, every later one fails.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_from = n;
        self
    }

    /// Return one embedding fewer than requested.
    pub fn dropping_last(mut self) -> Self {
        self.drop_last = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![1.0; self.dimensions])
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn name(&self) -> &str {
        "stub"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(texts.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if call < self.fail_first || call >= self.fail_from {
            return Err(EmbeddingError::Status {
                status: 503,
                body: "stub unavailable".to_string(),
            });
        }

        let mut embeddings: Vec<_> = texts.iter().map(|t| self.vector_for(t)).collect();
        if self.drop_last {
            embeddings.pop();
        }

        Ok(embeddings)
    }
}
