//! One-shot load-and-embed pipeline that (re)populates the vector index.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::EmbeddingConfig;
use crate::records::RecordSource;

use super::errors::{BuildError, EmbeddingError};
use super::index::{IndexedEntry, VectorIndex};
use super::provider::EmbeddingProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Loading,
    Embedding,
    Ready,
    Failed,
}

/// Timeout and retry policy for the batch embedding call.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub batch_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

impl From<&EmbeddingConfig> for BuildOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

pub struct IndexBuilder {
    source: Arc<dyn RecordSource>,
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    options: BuildOptions,
    phase: Mutex<BuildPhase>,
    /// Held for the whole build so rebuilds never overlap.
    running: Arc<tokio::sync::Mutex<()>>,
}

impl IndexBuilder {
    pub fn new(
        source: Arc<dyn RecordSource>,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        options: BuildOptions,
    ) -> Self {
        Self {
            source,
            provider,
            index,
            options,
            phase: Mutex::new(BuildPhase::Idle),
            running: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn phase(&self) -> BuildPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: BuildPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Load every record, embed them in one batch and publish the result.
    ///
    /// Queries see the index as not ready until this returns. On failure the index
    /// goes back to its previous state and the error is returned.
    pub async fn build(&self) -> Result<(), BuildError> {
        let _running = self.running.lock().await;
        self.build_locked().await
    }

    /// Start a background build unless one is already running.
    ///
    /// Returns `None` when a build is in flight; the trigger is folded into it.
    pub fn try_spawn(self: &Arc<Self>) -> Option<JoinHandle<Result<(), BuildError>>> {
        let running = self.running.clone().try_lock_owned().ok()?;
        let builder = self.clone();

        Some(tokio::spawn(async move {
            let _running = running;
            builder.build_locked().await
        }))
    }

    async fn build_locked(&self) -> Result<(), BuildError> {
        let now = Instant::now();
        self.index.begin_rebuild();

        match self.run().await {
            Ok(()) => {
                self.set_phase(BuildPhase::Ready);
                log::info!(
                    "embedded {} customer profiles ({:?} dimensions) in {}ms",
                    self.index.len(),
                    self.index.dimensions(),
                    now.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                self.index.abort_rebuild();
                self.set_phase(BuildPhase::Failed);
                match err.kind() {
                    Some(kind) => log::error!("index build failed ({kind:?}): {err}"),
                    None => log::error!("index build failed: {err}"),
                }
                Err(err)
            }
        }
    }

    async fn run(&self) -> Result<(), BuildError> {
        self.set_phase(BuildPhase::Loading);
        log::info!("loading records from {}", self.source.describe());

        let source = self.source.clone();
        let records = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|e| BuildError::Internal(e.to_string()))??;

        self.set_phase(BuildPhase::Embedding);
        let texts: Vec<String> = records.iter().map(|r| r.profile_text.clone()).collect();

        let embeddings = if texts.is_empty() {
            log::warn!("record source is empty, publishing an empty index");
            vec![]
        } else {
            self.embed_with_retry(&texts).await?
        };

        if embeddings.len() != records.len() {
            return Err(BuildError::EmbeddingCountMismatch {
                expected: records.len(),
                got: embeddings.len(),
            });
        }

        let entries: Vec<IndexedEntry> = records
            .into_iter()
            .zip(embeddings)
            .map(|(record, embedding)| IndexedEntry { record, embedding })
            .collect();

        self.index.replace(entries)?;

        Ok(())
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0;
        loop {
            log::info!(
                "embedding {} profiles with {} (attempt {})",
                texts.len(),
                self.provider.name(),
                attempt + 1
            );

            let result = match tokio::time::timeout(
                self.options.batch_timeout,
                self.provider.embed_batch(texts),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(EmbeddingError::Timeout(self.options.batch_timeout)),
            };

            match result {
                Err(err) if err.is_transient() && attempt < self.options.max_retries => {
                    let backoff = self.options.retry_backoff * 2u32.saturating_pow(attempt);
                    log::warn!("batch embedding failed: {err}, retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{MemoryRecordSource, Record};
    use crate::semantic::errors::ErrorKind;
    use crate::tests::StubEmbedder;

    fn records() -> Vec<Record> {
        vec![
            Record::new("1", "young parent").with_field("age", "29"),
            Record::new("2", "retired traveller").with_field("age", "67"),
            Record::new("3", "student").with_field("age", "21"),
        ]
    }

    fn stub() -> StubEmbedder {
        StubEmbedder::new(2)
            .with("young parent", vec![1.0, 0.0])
            .with("retired traveller", vec![0.0, 1.0])
            .with("student", vec![1.0, 1.0])
    }

    fn options() -> BuildOptions {
        BuildOptions {
            batch_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn builder(
        provider: Arc<StubEmbedder>,
        records: Vec<Record>,
    ) -> (IndexBuilder, Arc<VectorIndex>) {
        let index = Arc::new(VectorIndex::new());
        let builder = IndexBuilder::new(
            Arc::new(MemoryRecordSource::new(records)),
            provider,
            index.clone(),
            options(),
        );
        (builder, index)
    }

    #[tokio::test]
    async fn test_build_populates_index_in_order() {
        let provider = Arc::new(stub());
        let (builder, index) = builder(provider.clone(), records());
        assert_eq!(builder.phase(), BuildPhase::Idle);

        builder.build().await.unwrap();

        assert_eq!(builder.phase(), BuildPhase::Ready);
        let snapshot = index.snapshot();
        assert!(snapshot.ready);
        let ids: Vec<_> = snapshot
            .entries
            .iter()
            .map(|e| e.record.profile_id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(snapshot.entries[1].embedding, vec![0.0, 1.0]);

        // one batch call for the whole build
        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn test_count_mismatch_aborts() {
        let provider = Arc::new(stub().dropping_last());
        let (builder, index) = builder(provider, records());

        let err = builder.build().await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::EmbeddingCountMismatch { expected: 3, got: 2 }
        ));
        assert_eq!(err.kind(), Some(ErrorKind::EmbeddingCountMismatch));
        assert_eq!(builder.phase(), BuildPhase::Failed);
        assert!(!index.is_ready());
        assert_eq!(index.len(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_not_ready() {
        let provider = Arc::new(stub().failing());
        let (builder, index) = builder(provider, records());

        let err = builder.build().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::UpstreamFailure));
        assert!(!index.is_ready());
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_last_good_set() {
        let provider = Arc::new(stub());
        let index = Arc::new(VectorIndex::new());
        IndexBuilder::new(
            Arc::new(MemoryRecordSource::new(records())),
            provider,
            index.clone(),
            options(),
        )
        .build()
        .await
        .unwrap();

        let broken = IndexBuilder::new(
            Arc::new(MemoryRecordSource::new(records())),
            Arc::new(stub().failing()),
            index.clone(),
            options(),
        );
        assert!(broken.build().await.is_err());

        let snapshot = index.snapshot();
        assert!(snapshot.ready);
        assert_eq!(snapshot.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_entries() {
        let provider = Arc::new(stub());
        let (builder, index) = builder(provider.clone(), records());
        builder.build().await.unwrap();
        builder.build().await.unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let provider = Arc::new(stub().failing_times(2));
        let index = Arc::new(VectorIndex::new());
        let builder = IndexBuilder::new(
            Arc::new(MemoryRecordSource::new(records())),
            provider.clone(),
            index.clone(),
            BuildOptions {
                max_retries: 2,
                ..options()
            },
        );

        builder.build().await.unwrap();
        assert!(index.is_ready());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let provider = Arc::new(stub().failing_times(5));
        let (builder, index) = {
            let index = Arc::new(VectorIndex::new());
            let builder = IndexBuilder::new(
                Arc::new(MemoryRecordSource::new(records())),
                provider.clone(),
                index.clone(),
                BuildOptions {
                    max_retries: 1,
                    ..options()
                },
            );
            (builder, index)
        };

        assert!(builder.build().await.is_err());
        assert!(!index.is_ready());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_batch_timeout_aborts() {
        let provider = Arc::new(stub().with_delay(Duration::from_millis(500)));
        let index = Arc::new(VectorIndex::new());
        let builder = IndexBuilder::new(
            Arc::new(MemoryRecordSource::new(records())),
            provider,
            index.clone(),
            BuildOptions {
                batch_timeout: Duration::from_millis(20),
                ..options()
            },
        );

        let err = builder.build().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::UpstreamTimeout));
        assert!(!index.is_ready());
    }

    #[tokio::test]
    async fn test_empty_source_skips_provider() {
        let provider = Arc::new(stub());
        let (builder, index) = builder(provider.clone(), vec![]);

        builder.build().await.unwrap();
        assert!(index.is_ready());
        assert_eq!(index.len(), 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_triggers_during_build_are_merged() {
        let provider = Arc::new(stub().with_delay(Duration::from_millis(100)));
        let (builder, index) = builder(provider.clone(), records());
        let builder = Arc::new(builder);

        let running = builder.try_spawn().unwrap();
        for _ in 0..20 {
            assert!(builder.try_spawn().is_none());
        }
        running.await.unwrap().unwrap();

        assert_eq!(provider.calls(), 1);
        assert!(index.is_ready());

        // idle again, so the next trigger starts a build
        builder.try_spawn().unwrap().await.unwrap().unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_inconsistent_dimensions_rejected() {
        let provider = Arc::new(
            StubEmbedder::new(2)
                .with("young parent", vec![1.0, 0.0])
                .with("retired traveller", vec![0.0, 1.0, 0.0])
                .with("student", vec![1.0, 1.0]),
        );
        let (builder, index) = builder(provider, records());

        let err = builder.build().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::DimensionMismatch));
        assert!(!index.is_ready());
    }
}
