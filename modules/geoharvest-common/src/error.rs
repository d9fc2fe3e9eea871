use std::time::Duration;

use thiserror::Error;

use crate::types::GeometryError;

/// Run-level error taxonomy. Per-item variants are normally caught and turned
/// into counters; only the store variants and `RunTimedOut` escape a run.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Source unavailable: {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),

    #[error("Store I/O failed: {0}")]
    StoreIo(String),

    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    #[error("Commit failed: {0}")]
    CommitFailure(String),

    #[error("Run timed out after {0:?}; nothing was committed")]
    RunTimedOut(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl HarvestError {
    /// Fatal errors leave the store untouched and need an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::StoreIo(_)
                | HarvestError::CorruptStore(_)
                | HarvestError::CommitFailure(_)
                | HarvestError::RunTimedOut(_)
                | HarvestError::Config(_)
                | HarvestError::Anyhow(_)
        )
    }
}
