use depctl_domain::{EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),

    /// Returned when a distributed state lock is already held by another
    /// holder.
    #[error("lock contended: already held by {holder}")]
    LockContended { holder: String },
}

impl HasErrorKind for StoreError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            StoreError::NotFound(_) => EngineErrorKind::NotFound,
            StoreError::Serialization(_) | StoreError::Internal(_) => EngineErrorKind::Internal,
            StoreError::LockContended { .. } => EngineErrorKind::LockContended,
        }
    }
}
