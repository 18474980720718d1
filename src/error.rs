use crate::snapshot::ValidationError;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the ingestion and query services
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller sent something unusable
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
