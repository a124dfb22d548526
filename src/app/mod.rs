pub mod errors;
mod ingest;
mod retrieval;

pub use errors::AppError;
pub use ingest::{IngestedImage, InitializeSummary};
pub use retrieval::{QueryResult, RetrievalOutcome};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::{
    config::Config,
    reformulate::{self, QueryReformulator},
    semantic::{Embedder, EmbeddingModel, SemanticIndex, SemanticIndexError, SnapshotStorage},
    storage::{ImageStore, LocalImageStore},
};

/// Application context shared by the CLI and the HTTP daemon.
///
/// Owns the semantic index, the reformulator and the image store; all of
/// them are injected so tests can swap in doubles.
pub struct App {
    config: Config,
    index: Arc<SemanticIndex>,
    reformulator: Arc<dyn QueryReformulator>,
    images: Arc<dyn ImageStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Ready,
    NotInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub status: IndexState,
    pub message: String,
    pub entries: usize,
}

impl App {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        reformulator: Arc<dyn QueryReformulator>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        let storage = SnapshotStorage::new(config.index_dir_path());
        Self {
            index: Arc::new(SemanticIndex::new(embedder, storage)),
            config,
            reformulator,
            images,
        }
    }

    /// Wire up the real collaborators described by `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder = EmbeddingModel::new(&config.embedding.model, config.base_path().to_path_buf())
            .context("failed to initialize embedding model")?;

        let reformulator = reformulate::from_config(&config.reformulator)
            .context("failed to configure query reformulator")?;

        let images = LocalImageStore::new(config.image_folder_path()).with_context(|| {
            format!(
                "failed to create image folder {}",
                config.image_folder_path().display()
            )
        })?;

        Ok(Self::new(
            config,
            Arc::new(embedder),
            reformulator,
            Arc::new(images),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<SemanticIndex> {
        &self.index
    }

    fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.config.embedding.timeout_ms)
    }

    /// Load the on-disk snapshot into memory.
    pub fn load_index(&self) -> Result<usize, AppError> {
        Ok(self.index.load()?)
    }

    /// Best-effort startup load; the daemon keeps running uninitialized on failure.
    pub fn try_load_index(&self) {
        match self.index.load() {
            Ok(_) => {}
            Err(SemanticIndexError::Snapshot(crate::semantic::SnapshotError::NotFound(path))) => {
                tracing::info!(
                    path = %path.display(),
                    "no index snapshot yet, waiting for initialize"
                );
            }
            Err(err) => {
                tracing::warn!("failed to load index snapshot: {err}");
            }
        }
    }

    /// Report whether an index is in memory. Never loads anything.
    pub fn status(&self) -> IndexStatus {
        if self.index.is_loaded() {
            let entries = self.index.len();
            IndexStatus {
                status: IndexState::Ready,
                message: format!("Index is loaded with {entries} entries"),
                entries,
            }
        } else {
            IndexStatus {
                status: IndexState::NotInitialized,
                message: "Index not initialized, call initialize first".to_string(),
                entries: 0,
            }
        }
    }
}
