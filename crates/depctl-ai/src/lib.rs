pub mod client;
pub mod error;
pub mod types;

pub use client::{DeploymentAi, HttpDeploymentAi, MockDeploymentAi};
pub use error::AiError;
pub use types::{
    Action, AiRequest, AnalyzeErrorsResponse, AutoVerifyResponse, ChatResponse, FailedCommand,
    GenerateResponse, ProposedCommand, ProposedFile,
};
