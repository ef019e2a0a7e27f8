use depctl_domain::{DomainError, EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown deployment: {0}")]
    UnknownDeployment(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Commands(#[from] depctl_commands::CommandsError),

    #[error(transparent)]
    Iac(#[from] depctl_iac::IacError),

    #[error(transparent)]
    Ai(#[from] depctl_ai::AiError),

    #[error(transparent)]
    Audit(#[from] depctl_audit::AuditError),

    #[error(transparent)]
    Store(#[from] depctl_store::StoreError),

    #[error("queue is not blocked, nothing to resolve")]
    NotBlocked,

    #[error("no pending file proposal with id {0}")]
    UnknownProposal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HasErrorKind for OrchestratorError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            OrchestratorError::UnknownDeployment(_) => EngineErrorKind::NotFound,
            OrchestratorError::Domain(e) => e.kind(),
            OrchestratorError::Commands(e) => e.kind(),
            OrchestratorError::Iac(e) => e.kind(),
            OrchestratorError::Ai(e) => e.kind(),
            OrchestratorError::Audit(e) => e.kind(),
            OrchestratorError::Store(e) => e.kind(),
            OrchestratorError::NotBlocked => EngineErrorKind::InvalidInput,
            OrchestratorError::UnknownProposal(_) => EngineErrorKind::NotFound,
            OrchestratorError::Internal(_) => EngineErrorKind::Internal,
        }
    }
}
