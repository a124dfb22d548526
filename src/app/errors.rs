use crate::images::ImageError;
use crate::semantic::{EmbeddingError, SemanticIndexError, SnapshotError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("index is not initialized, call initialize first")]
    NotInitialized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("{service} failed: {cause}")]
    ExternalService { service: &'static str, cause: String },

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<EmbeddingError> for AppError {
    fn from(err: EmbeddingError) -> Self {
        AppError::ExternalService {
            service: "embedding",
            cause: err.to_string(),
        }
    }
}

impl From<SemanticIndexError> for AppError {
    fn from(err: SemanticIndexError) -> Self {
        match err {
            SemanticIndexError::NotLoaded => AppError::NotInitialized,
            SemanticIndexError::EmptyInput => AppError::Validation(err.to_string()),
            SemanticIndexError::Embedding(err) => err.into(),
            SemanticIndexError::Snapshot(SnapshotError::NotFound(path)) => {
                AppError::NotFound(format!("index snapshot at {}", path.display()))
            }
            SemanticIndexError::Snapshot(SnapshotError::Io(err)) => AppError::IO(err),
            other => AppError::Other(other.into()),
        }
    }
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::UnsupportedFormat(format) => AppError::UnsupportedFormat(format),
            ImageError::Decode(err) => AppError::UnsupportedFormat(err.to_string()),
        }
    }
}
