use std::path::PathBuf;

use geoharvest_common::HarvestError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store: {0}")]
    Corrupt(String),

    #[error("Store was keyed with precision {stored}, configuration says {configured}; re-key the store before changing precision")]
    PrecisionMismatch { stored: u8, configured: u8 },

    #[error("Commit failed: {0}")]
    Commit(String),
}

impl From<StoreError> for HarvestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Read { .. } => HarvestError::StoreIo(err.to_string()),
            StoreError::Commit(reason) => HarvestError::CommitFailure(reason),
            StoreError::Corrupt(_) | StoreError::PrecisionMismatch { .. } => {
                HarvestError::CorruptStore(err.to_string())
            }
        }
    }
}
