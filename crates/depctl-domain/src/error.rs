use thiserror::Error;

/// Stable, machine-readable error classification shared across every crate
/// in the workspace. Each crate's own error enum can report one of these via
/// a `kind()` method so a caller (CLI, tests) gets the same vocabulary
/// regardless of which layer raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    NotFound,
    InvalidInput,
    ValidationRejected,
    IllegalTransition,
    LockContended,
    Timeout,
    Unauthorized,
    AuditImmutable,
    AiUnavailable,
    SubprocessFailed,
    IacParseError,
    JobRetryable,
    JobFatal,
    Internal,
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineErrorKind::NotFound => "not_found",
            EngineErrorKind::InvalidInput => "invalid_input",
            EngineErrorKind::ValidationRejected => "validation_rejected",
            EngineErrorKind::IllegalTransition => "illegal_transition",
            EngineErrorKind::LockContended => "lock_contended",
            EngineErrorKind::Timeout => "timeout",
            EngineErrorKind::Unauthorized => "unauthorized",
            EngineErrorKind::AuditImmutable => "audit_immutable",
            EngineErrorKind::AiUnavailable => "ai_unavailable",
            EngineErrorKind::SubprocessFailed => "subprocess_failed",
            EngineErrorKind::IacParseError => "iac_parse_error",
            EngineErrorKind::JobRetryable => "job_retryable",
            EngineErrorKind::JobFatal => "job_fatal",
            EngineErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Something a caller can match on as a typed error with a stable kind code.
pub trait HasErrorKind {
    fn kind(&self) -> EngineErrorKind;
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("illegal transition from {from} via {event}")]
    IllegalTransition { from: String, event: String },

    #[error("invalid deployment id: {0}")]
    InvalidDeploymentId(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HasErrorKind for DomainError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            DomainError::IllegalTransition { .. } => EngineErrorKind::IllegalTransition,
            DomainError::InvalidDeploymentId(_)
            | DomainError::InvalidCommand(_)
            | DomainError::InvalidConfig(_) => EngineErrorKind::InvalidInput,
        }
    }
}
