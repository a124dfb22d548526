//! In-memory vector index with exact cosine similarity search.
//!
//! Stores tag embeddings together with the image they describe, in
//! insertion order.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::eid::Eid;

/// An entry in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Generated at insertion, never reused
    pub id: Eid,
    /// Text the embedding was computed from
    pub tag: String,
    /// Location of the image in the image store
    pub image_ref: PathBuf,
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// In-memory vector index for semantic search.
///
/// Entries are append-only; the same tag may appear any number of times.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    /// Ids of `entries`
    ids: HashSet<Eid>,
    /// Expected embedding dimensions
    dimensions: usize,
}

/// Search result from the vector index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: IndexEntry,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: Vec::new(),
            ids: HashSet::new(),
            dimensions,
        }
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            dimensions,
        }
    }

    /// Get the expected embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append an entry to the index.
    ///
    /// Returns an error if the embedding has the wrong length, holds a NaN or
    /// infinite component, has zero norm (cannot be normalized), or if the id
    /// is already present.
    pub fn insert(&mut self, entry: IndexEntry) -> Result<(), IndexError> {
        if entry.embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: entry.embedding.len(),
            });
        }

        if !Self::is_finite(&entry.embedding) {
            return Err(IndexError::NonFiniteVector);
        }

        if Self::l2_norm(&entry.embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        if self.contains(&entry.id) {
            return Err(IndexError::DuplicateId(entry.id.to_string()));
        }

        self.ids.insert(entry.id.clone());
        self.entries.push(entry);

        Ok(())
    }

    /// Check if an entry exists for the given id.
    pub fn contains(&self, id: &Eid) -> bool {
        self.ids.contains(id)
    }

    /// Iterate over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Return the `k` entries closest to `query`, nearest first.
    ///
    /// `k` larger than the index is clamped to the index size. Entries with
    /// equal scores keep their insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        if !Self::is_finite(query) {
            return Err(IndexError::NonFiniteVector);
        }

        let query_norm = Self::l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (pos, Self::cosine_similarity(query, &entry.embedding, query_norm)))
            .collect();

        // Stable sort by score descending
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| SearchHit {
                entry: self.entries[pos].clone(),
                score,
            })
            .collect())
    }

    fn is_finite(v: &[f32]) -> bool {
        v.iter().all(|x| x.is_finite())
    }

    /// Compute L2 norm of a vector.
    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Compute cosine similarity between two vectors.
    /// Assumes query_norm is precomputed for efficiency.
    fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON {
            return 0.0;
        }

        let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        dot_product / (query_norm * target_norm)
    }

    /// Bulk load entries into the index.
    /// Used when loading from storage.
    pub fn bulk_load(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        self.entries.reserve(entries.len());
        self.ids.reserve(entries.len());
        for entry in entries {
            self.insert(entry)?;
        }
        Ok(())
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Vector has a NaN or infinite component")]
    NonFiniteVector,

    #[error("Duplicate entry id: {0}")]
    DuplicateId(String),
}
