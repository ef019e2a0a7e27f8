use depctl_domain::{EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("no handler registered for job kind {0:?}")]
    NoHandler(depctl_domain::JobKind),

    #[error("job retryable: {0}")]
    Retryable(String),

    #[error("job fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Store(#[from] depctl_store::StoreError),

    #[error(transparent)]
    Iac(#[from] depctl_iac::IacError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl HasErrorKind for JobsError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            JobsError::NoHandler(_) => EngineErrorKind::InvalidInput,
            JobsError::Retryable(_) => EngineErrorKind::JobRetryable,
            JobsError::Fatal(_) => EngineErrorKind::JobFatal,
            JobsError::Store(e) => e.kind(),
            JobsError::Iac(e) => e.kind(),
            JobsError::Serde(_) => EngineErrorKind::Internal,
        }
    }
}
