//! Semantic index over image tags.
//!
//! # Architecture
//!
//! - `embeddings`: Embedding provider contract, fastembed implementation
//! - `index`: In-memory vector index with cosine similarity search
//! - `storage`: Snapshot directory persistence (vectors.bin + entries.json)
//! - `service`: Shared, lock-guarded index used by the application

pub mod embeddings;
mod index;
mod service;
mod storage;

pub use embeddings::{embed_with_timeout, Embedder, EmbeddingError, EmbeddingModel};
pub use index::{IndexEntry, IndexError, SearchHit, VectorIndex};
pub use service::{SemanticIndex, SemanticIndexError};
pub use storage::{SnapshotError, SnapshotStorage, ENTRIES_FILE, VECTORS_FILE};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";
