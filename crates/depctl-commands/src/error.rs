use depctl_domain::{DomainError, EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandsError {
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    #[error("command requires confirmation before it can run: {0}")]
    RequiresConfirmation(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Process(#[from] depctl_process::ProcessError),

    #[error(transparent)]
    Store(#[from] depctl_store::StoreError),

    #[error("no such deployment queue: {0}")]
    UnknownDeployment(String),
}

impl HasErrorKind for CommandsError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            CommandsError::ValidationRejected(_) => EngineErrorKind::ValidationRejected,
            CommandsError::RequiresConfirmation(_) => EngineErrorKind::ValidationRejected,
            CommandsError::Domain(e) => e.kind(),
            CommandsError::Process(e) => e.kind(),
            CommandsError::Store(e) => e.kind(),
            CommandsError::UnknownDeployment(_) => EngineErrorKind::NotFound,
        }
    }
}
