//! In-memory vector index with a readiness gate.
//!
//! Holds every record with its embedding and the flag telling queries whether the
//! current set may be served. Writers publish a whole new entry set at once; readers
//! take a snapshot (an `Arc` to an immutable vector) and never see a partial set.

use std::sync::{Arc, PoisonError, RwLock};

use crate::records::Record;

use super::errors::{DimensionMismatch, IndexError};

/// A record paired with the embedding of its `profile_text`.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub record: Record,
    pub embedding: Vec<f32>,
}

/// Entries and readiness observed together.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub ready: bool,
    pub entries: Arc<Vec<IndexedEntry>>,
}

#[derive(Debug, Default)]
struct IndexState {
    ready: bool,
    /// Set once a `replace` has succeeded; `abort_rebuild` restores readiness from it.
    built: bool,
    entries: Arc<Vec<IndexedEntry>>,
    /// Fixed by the first non-empty `replace`.
    dimensions: Option<usize>,
}

#[derive(Debug, Default)]
pub struct VectorIndex {
    state: RwLock<IndexState>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries and readiness, taken under one lock.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            ready: state.ready,
            entries: state.entries.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ready
    }

    /// Number of entries in the published set.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Embedding length every entry (and query) must have, once known.
    pub fn dimensions(&self) -> Option<usize> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dimensions
    }

    /// Swap in a complete entry set and mark the index ready.
    ///
    /// All embeddings must share one length, and that length must match the one
    /// fixed by earlier builds. On error nothing is published.
    pub fn replace(&self, entries: Vec<IndexedEntry>) -> Result<(), IndexError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let expected = state
            .dimensions
            .or_else(|| entries.first().map(|e| e.embedding.len()));

        if let Some(expected) = expected {
            if let Some(bad) = entries.iter().find(|e| e.embedding.len() != expected) {
                return Err(DimensionMismatch {
                    expected,
                    got: bad.embedding.len(),
                }
                .into());
            }
        }

        state.dimensions = expected;
        state.entries = Arc::new(entries);
        state.ready = true;
        state.built = true;

        Ok(())
    }

    /// Flip to not-ready for the duration of a rebuild. The last good set is kept.
    pub fn begin_rebuild(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .ready = false;
    }

    /// Undo `begin_rebuild` after a failed build.
    ///
    /// Readiness comes back only if an earlier build succeeded.
    pub fn abort_rebuild(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.ready = state.built;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, embedding: Vec<f32>) -> IndexedEntry {
        IndexedEntry {
            record: Record::new(id, format!("text for {id}")),
            embedding,
        }
    }

    #[test]
    fn test_new_index_not_ready() {
        let index = VectorIndex::new();
        let snapshot = index.snapshot();

        assert!(!snapshot.ready);
        assert!(snapshot.entries.is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.dimensions(), None);
    }

    #[test]
    fn test_replace_publishes_and_marks_ready() {
        let index = VectorIndex::new();
        index
            .replace(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])])
            .unwrap();

        let snapshot = index.snapshot();
        assert!(snapshot.ready);
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[0].record.profile_id, "a");
        assert_eq!(index.dimensions(), Some(2));
    }

    #[test]
    fn test_replace_rejects_mixed_dimensions() {
        let index = VectorIndex::new();
        let result = index.replace(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![1.0])]);

        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch(DimensionMismatch { expected: 2, got: 1 }))
        ));
        assert!(!index.is_ready());
        assert_eq!(index.len(), 0);
        assert_eq!(index.dimensions(), None);
    }

    #[test]
    fn test_dimensions_fixed_after_first_build() {
        let index = VectorIndex::new();
        index.replace(vec![entry("a", vec![1.0, 0.0])]).unwrap();

        let result = index.replace(vec![entry("a", vec![1.0, 0.0, 0.0])]);
        assert!(result.is_err());

        // previous set still served
        let snapshot = index.snapshot();
        assert!(snapshot.ready);
        assert_eq!(snapshot.entries[0].embedding.len(), 2);
    }

    #[test]
    fn test_empty_replace_is_ready() {
        let index = VectorIndex::new();
        index.replace(vec![]).unwrap();
        assert!(index.is_ready());
        assert_eq!(index.dimensions(), None);
    }

    #[test]
    fn test_rebuild_cycle() {
        let index = VectorIndex::new();
        index.replace(vec![entry("a", vec![1.0])]).unwrap();

        index.begin_rebuild();
        let snapshot = index.snapshot();
        assert!(!snapshot.ready);

        index.abort_rebuild();
        let snapshot = index.snapshot();
        assert!(snapshot.ready);
        assert_eq!(snapshot.entries.len(), 1);
    }

    #[test]
    fn test_abort_first_build_stays_not_ready() {
        let index = VectorIndex::new();
        index.begin_rebuild();
        index.abort_rebuild();
        assert!(!index.is_ready());
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let index = VectorIndex::new();
        index.replace(vec![entry("a", vec![1.0])]).unwrap();

        let old = index.snapshot();
        index
            .replace(vec![entry("b", vec![1.0]), entry("c", vec![1.0])])
            .unwrap();

        assert_eq!(old.entries.len(), 1);
        assert_eq!(old.entries[0].record.profile_id, "a");
        assert_eq!(index.snapshot().entries.len(), 2);
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_set() {
        let index = Arc::new(VectorIndex::new());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snapshot = index.snapshot();
                        if snapshot.ready {
                            let len = snapshot.entries.len();
                            assert!(len == 10 || len == 20, "torn read: {len}");
                        }
                    }
                })
            })
            .collect();

        for round in 0..50 {
            let size = if round % 2 == 0 { 10 } else { 20 };
            let entries = (0..size).map(|i| entry(&i.to_string(), vec![1.0])).collect();
            index.begin_rebuild();
            index.replace(entries).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
