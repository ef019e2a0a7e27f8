use depctl_domain::{EngineErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("ai service unavailable: {0}")]
    Unavailable(String),

    #[error("ai request timed out")]
    Timeout,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl HasErrorKind for AiError {
    fn kind(&self) -> EngineErrorKind {
        match self {
            AiError::Unavailable(_) | AiError::Http(_) => EngineErrorKind::AiUnavailable,
            AiError::Timeout => EngineErrorKind::Timeout,
            AiError::Serialization(_) => EngineErrorKind::Internal,
        }
    }
}
