//! Cosine similarity scoring over indexed entries.

use crate::records::Record;

use super::errors::DimensionMismatch;
use super::index::IndexedEntry;

/// Score every entry against `query`, in entry order.
///
/// Fails on the first entry whose embedding length differs from the query's.
pub fn score<'a>(
    query: &[f32],
    entries: &'a [IndexedEntry],
) -> Result<Vec<(&'a Record, f32)>, DimensionMismatch> {
    entries
        .iter()
        .map(|entry| -> Result<_, DimensionMismatch> {
            Ok((&entry.record, cosine_similarity(query, &entry.embedding)?))
        })
        .collect()
}

/// Cosine similarity of two equal-length vectors.
///
/// Accumulates in f64 so large components cannot overflow the norms. A zero-norm
/// vector on either side scores `0.0`.
pub fn cosine_similarity(query: &[f32], target: &[f32]) -> Result<f32, DimensionMismatch> {
    if query.len() != target.len() {
        return Err(DimensionMismatch {
            expected: query.len(),
            got: target.len(),
        });
    }

    let (mut dot, mut query_sq, mut target_sq) = (0.0f64, 0.0f64, 0.0f64);
    for (&a, &b) in query.iter().zip(target) {
        let (a, b) = (f64::from(a), f64::from(b));
        dot += a * b;
        query_sq += a * a;
        target_sq += b * b;
    }

    if query_sq == 0.0 || target_sq == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot / (query_sq.sqrt() * target_sq.sqrt());
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}
