use depctl_domain::{EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IacError {
    #[error("invalid infrastructure-as-code: {0:?}")]
    InvalidIac(Vec<String>),

    #[error("state lock contended, held by {holder}")]
    LockContended { holder: String },

    #[error("iac subprocess failed: {0}")]
    SubprocessFailed(String),

    #[error("iac output could not be parsed: {0}")]
    ParseError(String),

    #[error("initialize must be called before {0}")]
    NotInitialized(&'static str),

    #[error(transparent)]
    Process(#[from] depctl_process::ProcessError),

    #[error(transparent)]
    Store(#[from] depctl_store::StoreError),

    #[error("working tree io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HasErrorKind for IacError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            IacError::InvalidIac(_) => EngineErrorKind::ValidationRejected,
            IacError::LockContended { .. } => EngineErrorKind::LockContended,
            IacError::SubprocessFailed(_) => EngineErrorKind::SubprocessFailed,
            IacError::ParseError(_) => EngineErrorKind::IacParseError,
            IacError::NotInitialized(_) => EngineErrorKind::InvalidInput,
            IacError::Process(e) => e.kind(),
            IacError::Store(e) => e.kind(),
            IacError::Io(_) => EngineErrorKind::Internal,
        }
    }
}
