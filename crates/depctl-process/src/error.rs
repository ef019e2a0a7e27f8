use depctl_domain::{EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("process timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64, partial_output: String },

    #[error("process was cancelled")]
    Cancelled,

    #[error("internal process runner error: {0}")]
    Internal(String),
}

impl HasErrorKind for ProcessError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            ProcessError::Spawn(_) | ProcessError::Internal(_) => EngineErrorKind::SubprocessFailed,
            ProcessError::Timeout { .. } => EngineErrorKind::Timeout,
            ProcessError::Cancelled => EngineErrorKind::SubprocessFailed,
        }
    }
}
