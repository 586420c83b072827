//! In-memory vector index for semantic topic search.
//!
//! The index is derived state: rebuilt from a snapshot whenever that
//! snapshot is adopted, never mutated in place. Entries keep catalog
//! iteration order so equal-similarity ties resolve deterministically.

use chrono::{DateTime, Utc};

use crate::catalog::CourseRecord;

/// A `class_code` paired with its embedding. Ephemeral; lives only as long
/// as the snapshot it was built from.
#[derive(Debug, Clone)]
pub struct VectorIndexEntry {
    pub class_code: String,
    embedding: Vec<f32>,
}

/// One similarity hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub class_code: String,
    pub score: f32,
}

/// Rebuildable, read-mostly nearest-neighbor structure over course
/// embeddings.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<VectorIndexEntry>,
    dims: usize,
    built_from: Option<DateTime<Utc>>,
}

impl VectorIndex {
    /// Build an index from a snapshot's records in O(n).
    ///
    /// Records with missing or dimension-mismatched embeddings are skipped:
    /// they are simply ineligible for semantic search, not an error. The
    /// dimension is fixed by the first usable embedding.
    #[must_use]
    pub fn build(records: &[CourseRecord], snapshot_time: DateTime<Utc>) -> Self {
        let mut entries = Vec::new();
        let mut dims = 0usize;
        let mut skipped = 0usize;

        for record in records {
            let Some(embedding) = &record.embedding else {
                continue;
            };
            if embedding.is_empty() {
                skipped += 1;
                continue;
            }
            if dims == 0 {
                dims = embedding.len();
            }
            if embedding.len() != dims {
                skipped += 1;
                continue;
            }
            entries.push(VectorIndexEntry {
                class_code: record.class_code.clone(),
                embedding: embedding.clone(),
            });
        }

        if skipped > 0 {
            tracing::debug!(skipped, "skipped malformed embeddings during index build");
        }

        Self {
            entries,
            dims,
            built_from: Some(snapshot_time),
        }
    }

    /// Number of indexed courses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimension, or 0 for an empty index.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// The `last_updated` of the snapshot this index was built from.
    #[must_use]
    pub fn built_from(&self) -> Option<DateTime<Utc>> {
        self.built_from
    }

    /// Cosine-similarity search.
    ///
    /// Returns up to `top_k` entries with score >= `min_score`, descending
    /// by score. Scores below the floor are excluded entirely, not clamped,
    /// so the result size is data-dependent. Ties keep catalog order (the
    /// sort is stable).
    #[must_use]
    pub fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Vec<VectorHit> {
        if query.is_empty() || query.len() != self.dims {
            return Vec::new();
        }

        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = cosine_similarity(query, &entry.embedding);
                (score >= min_score).then(|| VectorHit {
                    class_code: entry.class_code.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }
}

/// Cosine similarity in [-1, 1]; 0 when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
