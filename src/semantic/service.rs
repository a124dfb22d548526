//! Shared semantic index.
//!
//! Owns the embedding provider, the in-memory vector index and its snapshot
//! storage, and coordinates access to them:
//! - Readers take the last committed index and search it without holding a lock
//! - Writers (build, insert, save, load) are serialized; a mutation is
//!   persisted before it becomes visible to readers

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::eid::Eid;
use crate::semantic::embeddings::{EmbeddingError, Embedder};
use crate::semantic::index::{IndexEntry, IndexError, SearchHit, VectorIndex};
use crate::semantic::storage::{SnapshotError, SnapshotStorage};

/// Errors that can occur during semantic index operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticIndexError {
    #[error("At least one tag is required to build the index")]
    EmptyInput,

    #[error("Semantic index is not loaded")]
    NotLoaded,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    storage: SnapshotStorage,
    /// Last committed index, `None` until built or loaded.
    current: RwLock<Option<Arc<VectorIndex>>>,
    /// Held across mutate + persist.
    writer: Mutex<()>,
}

impl SemanticIndex {
    pub fn new(embedder: Arc<dyn Embedder>, storage: SnapshotStorage) -> Self {
        Self {
            embedder,
            storage,
            current: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn storage(&self) -> &SnapshotStorage {
        &self.storage
    }

    /// Check if an index is loaded in memory.
    pub fn is_loaded(&self) -> bool {
        self.current
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Number of entries in the loaded index, 0 if not loaded.
    pub fn len(&self) -> usize {
        self.current
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|index| index.len()))
            .unwrap_or(0)
    }

    /// The last committed index.
    pub fn snapshot(&self) -> Result<Arc<VectorIndex>, SemanticIndexError> {
        self.current
            .read()
            .map_err(|e| SemanticIndexError::Internal(format!("Lock poisoned: {}", e)))?
            .clone()
            .ok_or(SemanticIndexError::NotLoaded)
    }

    /// Build a fresh index from `(tag, image_ref)` pairs and persist it,
    /// replacing whatever was loaded or saved before.
    pub fn build(&self, entries: Vec<(String, PathBuf)>) -> Result<usize, SemanticIndexError> {
        if entries.is_empty() {
            return Err(SemanticIndexError::EmptyInput);
        }

        let tags: Vec<String> = entries.iter().map(|(tag, _)| tag.clone()).collect();
        let embeddings = self.embedder.embed_batch(&tags)?;
        if embeddings.len() != entries.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                entries.len(),
                embeddings.len()
            ))
            .into());
        }

        // Dimensionality is taken from the first embedding
        let dimensions = embeddings[0].len();
        let mut index = VectorIndex::with_capacity(dimensions, entries.len());

        for ((tag, image_ref), embedding) in entries.into_iter().zip(embeddings) {
            index.insert(IndexEntry {
                id: Eid::new(),
                tag,
                image_ref,
                embedding,
            })?;
        }

        let _writer = self.lock_writer()?;
        self.storage.save(&index, self.embedder.name())?;
        let count = index.len();
        self.commit(index)?;

        tracing::info!(
            entries = count,
            path = %self.storage.path().display(),
            "built semantic index"
        );

        Ok(count)
    }

    /// Embed `tag`, append a new entry `id` pointing at `image_ref` and persist.
    ///
    /// When nothing is loaded the snapshot is loaded first; if there is no
    /// snapshot at all, the entry seeds a new index.
    pub fn insert(
        &self,
        id: Eid,
        tag: &str,
        image_ref: PathBuf,
    ) -> Result<IndexEntry, SemanticIndexError> {
        // Embed before taking the writer lock; this is the slow part
        let embedding = self.embedder.embed(tag)?;

        let _writer = self.lock_writer()?;

        let mut index = match self.snapshot() {
            Ok(current) => (*current).clone(),
            Err(SemanticIndexError::NotLoaded) => self.load_or_seed(embedding.len())?,
            Err(e) => return Err(e),
        };

        let entry = IndexEntry {
            id,
            tag: tag.to_string(),
            image_ref,
            embedding,
        };
        index.insert(entry.clone())?;

        self.storage.save(&index, self.embedder.name())?;
        self.commit(index)?;

        tracing::debug!(id = %entry.id, tag = %entry.tag, "inserted index entry");

        Ok(entry)
    }

    /// Return the `k` entries nearest to `query`, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, SemanticIndexError> {
        let index = self.snapshot()?;
        Ok(index.search(query, k)?)
    }

    /// Persist the loaded index.
    pub fn save(&self) -> Result<(), SemanticIndexError> {
        let _writer = self.lock_writer()?;
        let index = self.snapshot()?;
        self.storage.save(&index, self.embedder.name())?;
        Ok(())
    }

    /// Replace the in-memory index with the on-disk snapshot.
    pub fn load(&self) -> Result<usize, SemanticIndexError> {
        let _writer = self.lock_writer()?;
        let index = self
            .storage
            .load(self.embedder.name(), self.embedder.dimensions())?;
        let count = index.len();
        self.commit(index)?;

        tracing::info!(
            entries = count,
            path = %self.storage.path().display(),
            "loaded semantic index"
        );

        Ok(count)
    }

    /// Load the snapshot unless an index is already in memory.
    ///
    /// A missing snapshot is reported as `NotLoaded`.
    pub fn ensure_loaded(&self) -> Result<(), SemanticIndexError> {
        if self.is_loaded() {
            return Ok(());
        }

        match self.load() {
            Ok(_) => Ok(()),
            Err(SemanticIndexError::Snapshot(SnapshotError::NotFound(_))) => {
                Err(SemanticIndexError::NotLoaded)
            }
            Err(e) => Err(e),
        }
    }

    /// Caller must hold the writer lock.
    fn load_or_seed(&self, dimensions: usize) -> Result<VectorIndex, SemanticIndexError> {
        match self.storage.load(self.embedder.name(), dimensions) {
            Ok(index) => Ok(index),
            Err(SnapshotError::NotFound(_)) => {
                tracing::info!("No existing index, starting fresh");
                Ok(VectorIndex::new(dimensions))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn commit(&self, index: VectorIndex) -> Result<(), SemanticIndexError> {
        let mut guard = self
            .current
            .write()
            .map_err(|e| SemanticIndexError::Internal(format!("Lock poisoned: {}", e)))?;
        *guard = Some(Arc::new(index));
        Ok(())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>, SemanticIndexError> {
        self.writer
            .lock()
            .map_err(|e| SemanticIndexError::Internal(format!("Lock poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{FailingEmbedder, FakeEmbedder};

    fn service(dir: &std::path::Path) -> SemanticIndex {
        SemanticIndex::new(
            Arc::new(FakeEmbedder::new()),
            SnapshotStorage::new(dir.join("vector_index")),
        )
    }

    fn pairs(tags: &[&str]) -> Vec<(String, PathBuf)> {
        tags.iter()
            .map(|tag| (tag.to_string(), PathBuf::from(format!("images/{tag}.png"))))
            .collect()
    }

    #[test]
    fn test_not_loaded_initially() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());

        assert!(!index.is_loaded());
        assert_eq!(index.len(), 0);

        let query = index.embedder().embed("sum").unwrap();
        assert!(matches!(index.search(&query, 2), Err(SemanticIndexError::NotLoaded)));
        assert!(matches!(index.save(), Err(SemanticIndexError::NotLoaded)));
    }

    #[test]
    fn test_build_empty_input_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());

        assert!(matches!(index.build(vec![]), Err(SemanticIndexError::EmptyInput)));
        assert!(!index.is_loaded());
    }

    #[test]
    fn test_build_persists_and_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());

        assert_eq!(index.build(pairs(&["sick", "sum", "painted"])).unwrap(), 3);
        assert!(index.is_loaded());
        assert!(index.storage().exists());

        let reopened = service(tmp.path());
        assert_eq!(reopened.load().unwrap(), 3);
    }

    #[test]
    fn test_build_assigns_unique_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());
        index.build(pairs(&["sum", "sum"])).unwrap();

        let snapshot = index.snapshot().unwrap();
        let ids: Vec<&Eid> = snapshot.iter().map(|e| &e.id).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_exact_vector_returns_entry_first() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());
        index
            .build(pairs(&["sick", "painted", "divisible", "sum", "election"]))
            .unwrap();

        let query = index.embedder().embed("election").unwrap();
        let hits = index.search(&query, 5).unwrap();
        assert_eq!(hits[0].entry.tag, "election");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_save_load_roundtrip_preserves_search() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());
        index
            .build(pairs(&["sick", "painted", "divisible", "sum", "election"]))
            .unwrap();
        index
            .insert(Eid::new(), "painted", PathBuf::from("images/extra.png"))
            .unwrap();
        index.save().unwrap();

        let query = index.embedder().embed("numeric painted").unwrap();
        let before: Vec<(String, PathBuf)> = index
            .search(&query, 6)
            .unwrap()
            .into_iter()
            .map(|hit| (hit.entry.tag, hit.entry.image_ref))
            .collect();

        let reopened = service(tmp.path());
        reopened.load().unwrap();
        let after: Vec<(String, PathBuf)> = reopened
            .search(&query, 6)
            .unwrap()
            .into_iter()
            .map(|hit| (hit.entry.tag, hit.entry.image_ref))
            .collect();

        assert_eq!(before, after);
    }

    #[test]
    fn test_insert_without_snapshot_seeds_index() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());

        let id = Eid::new();
        let entry = index
            .insert(id.clone(), "sum", PathBuf::from("images/a.png"))
            .unwrap();
        assert!(index.is_loaded());
        assert_eq!(index.len(), 1);
        assert_eq!(entry.id, id);
        assert_eq!(entry.tag, "sum");
        assert!(index.snapshot().unwrap().contains(&id));
        assert!(index.storage().exists());
    }

    #[test]
    fn test_insert_loads_existing_snapshot_first() {
        let tmp = tempfile::tempdir().unwrap();
        service(tmp.path()).build(pairs(&["sick", "sum"])).unwrap();

        let index = service(tmp.path());
        index
            .insert(Eid::new(), "election", PathBuf::from("images/e.png"))
            .unwrap();
        assert_eq!(index.len(), 3);

        let reopened = service(tmp.path());
        assert_eq!(reopened.load().unwrap(), 3);
    }

    #[test]
    fn test_insert_refuses_to_overwrite_corrupt_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        service(tmp.path()).build(pairs(&["sick", "sum"])).unwrap();
        std::fs::write(
            tmp.path().join("vector_index").join("entries.json"),
            b"{ not json",
        )
        .unwrap();

        let index = service(tmp.path());
        let result = index.insert(Eid::new(), "election", PathBuf::from("images/e.png"));
        assert!(matches!(result, Err(SemanticIndexError::Snapshot(_))));
        assert!(!index.is_loaded());
    }

    #[test]
    fn test_failed_embedding_leaves_index_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        service(tmp.path()).build(pairs(&["sick"])).unwrap();

        let index = SemanticIndex::new(
            Arc::new(FailingEmbedder),
            SnapshotStorage::new(tmp.path().join("vector_index")),
        );
        let result = index.insert(Eid::new(), "sum", PathBuf::from("images/a.png"));
        assert!(matches!(result, Err(SemanticIndexError::Embedding(_))));
        assert!(!index.is_loaded());
    }

    #[test]
    fn test_ensure_loaded_without_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let index = service(tmp.path());
        assert!(matches!(index.ensure_loaded(), Err(SemanticIndexError::NotLoaded)));

        index.build(pairs(&["sum"])).unwrap();
        let reopened = service(tmp.path());
        reopened.ensure_loaded().unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_readers_see_committed_state_during_inserts() {
        let tmp = tempfile::tempdir().unwrap();
        let index = Arc::new(service(tmp.path()));
        index.build(pairs(&["sick", "sum"])).unwrap();

        let writer = {
            let index = index.clone();
            std::thread::spawn(move || {
                for i in 0..20 {
                    index
                        .insert(
                            Eid::new(),
                            "painted",
                            PathBuf::from(format!("images/p{i}.png")),
                        )
                        .unwrap();
                }
            })
        };

        let query = index.embedder().embed("sum").unwrap();
        for _ in 0..50 {
            let snapshot = index.snapshot().unwrap();
            let hits = snapshot.search(&query, usize::MAX).unwrap();
            assert_eq!(hits.len(), snapshot.len());
            assert_eq!(hits[0].entry.tag, "sum");
        }

        writer.join().unwrap();
        assert_eq!(index.len(), 22);

        let reopened = service(tmp.path());
        assert_eq!(reopened.load().unwrap(), 22);
    }
}
