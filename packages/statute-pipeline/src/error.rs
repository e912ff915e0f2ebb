//! Typed errors for the statute pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

use crate::types::{DocumentId, PartId};

/// Errors that can occur while processing a document.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Document does not exist in the store
    #[error("document not found: {id}")]
    DocumentNotFound { id: DocumentId },

    /// Part does not exist in the store
    #[error("part not found: {id}")]
    PartNotFound { id: PartId },

    /// Part does not belong to the document being processed
    #[error("part {part_id} does not belong to document {document_id}")]
    PartMismatch {
        part_id: PartId,
        document_id: DocumentId,
    },

    /// Extraction oracle unavailable or failed
    #[error("oracle error: {0}")]
    Oracle(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Oracle returned output that could not be interpreted
    #[error("oracle parse error: {0}")]
    OracleParse(String),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Wrap any error as an oracle failure.
    pub fn oracle(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Oracle(err.into())
    }

    /// Wrap any error as a storage failure.
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(err.into())
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
