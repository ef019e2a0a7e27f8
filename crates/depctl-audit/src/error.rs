use depctl_domain::{EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit append timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Store(#[from] depctl_store::StoreError),
}

impl HasErrorKind for AuditError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            AuditError::Timeout(_) => EngineErrorKind::Timeout,
            AuditError::Store(e) => e.kind(),
        }
    }
}
