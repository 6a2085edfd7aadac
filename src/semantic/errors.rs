//! Error types for the search and index build paths.

use std::time::Duration;

use serde::Serialize;

use crate::records::RecordError;

/// Classification shared by every error the search core can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidArgument,
    NotReady,
    UpstreamTimeout,
    UpstreamFailure,
    DimensionMismatch,
    EmbeddingCountMismatch,
}

/// Errors returned by embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding model error: {0}")]
    Model(String),
}

impl EmbeddingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmbeddingError::Timeout(_) => ErrorKind::UpstreamTimeout,
            _ => ErrorKind::UpstreamFailure,
        }
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Request(_) | EmbeddingError::Timeout(_) => true,
            EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
            EmbeddingError::InvalidResponse(_) | EmbeddingError::Model(_) => false,
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            EmbeddingError::InvalidResponse(err.to_string())
        } else {
            EmbeddingError::Request(err.to_string())
        }
    }
}

/// Scoring failed because two vectors disagree on length.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dimension mismatch: expected {expected}, got {got}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub got: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::DimensionMismatch(_) => ErrorKind::DimensionMismatch,
        }
    }
}

/// Errors surfaced by a single search request.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("embeddings not ready yet")]
    NotReady,

    #[error("query embedding timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("query embedding failed: {0}")]
    UpstreamFailure(String),

    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SearchError::NotReady => ErrorKind::NotReady,
            SearchError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            SearchError::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            SearchError::DimensionMismatch(_) => ErrorKind::DimensionMismatch,
        }
    }
}

impl From<EmbeddingError> for SearchError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Timeout(after) => SearchError::UpstreamTimeout(after),
            other => SearchError::UpstreamFailure(other.to_string()),
        }
    }
}

/// Errors that abort an index build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to load records: {0}")]
    Load(#[from] RecordError),

    #[error("failed to embed records: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("provider returned {got} embeddings for {expected} records")]
    EmbeddingCountMismatch { expected: usize, got: usize },

    #[error("index rejected embeddings: {0}")]
    Index(#[from] IndexError),

    #[error("record loader panicked: {0}")]
    Internal(String),
}

impl BuildError {
    /// Taxonomy kind, when the failure belongs to one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            BuildError::Embedding(err) => Some(err.kind()),
            BuildError::EmbeddingCountMismatch { .. } => Some(ErrorKind::EmbeddingCountMismatch),
            BuildError::Index(err) => Some(err.kind()),
            BuildError::Load(_) | BuildError::Internal(_) => None,
        }
    }
}
