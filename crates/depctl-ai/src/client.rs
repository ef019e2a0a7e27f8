use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::AiError;
use crate::types::{AiRequest, AnalyzeErrorsResponse, AutoVerifyResponse, ChatResponse, GenerateResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One method per §6 action. Implementations must honor the 60-second
/// timeout; a non-200 response or network failure surfaces as
/// `AiError::Unavailable`.
#[async_trait]
pub trait DeploymentAi: Send + Sync + 'static {
    async fn generate(&self, request: &AiRequest) -> Result<GenerateResponse, AiError>;
    async fn regenerate(&self, request: &AiRequest) -> Result<GenerateResponse, AiError>;
    async fn analyze_errors(&self, request: &AiRequest) -> Result<AnalyzeErrorsResponse, AiError>;
    async fn auto_verify(&self, request: &AiRequest) -> Result<AutoVerifyResponse, AiError>;
    async fn chat(&self, request: &AiRequest) -> Result<ChatResponse, AiError>;
}

/// Talks to the AI backend over HTTP. Unknown response fields are dropped by
/// `serde_json`'s default behavior (per §9 Design Notes).
pub struct HttpDeploymentAi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpDeploymentAi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        HttpDeploymentAi {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, request: &AiRequest) -> Result<T, AiError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout
                } else {
                    AiError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "ai service returned non-success status");
            return Err(AiError::Unavailable(format!("status {status}")));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl DeploymentAi for HttpDeploymentAi {
    async fn generate(&self, request: &AiRequest) -> Result<GenerateResponse, AiError> {
        self.post("generate", request).await
    }

    async fn regenerate(&self, request: &AiRequest) -> Result<GenerateResponse, AiError> {
        self.post("regenerate", request).await
    }

    async fn analyze_errors(&self, request: &AiRequest) -> Result<AnalyzeErrorsResponse, AiError> {
        self.post("analyze-errors", request).await
    }

    async fn auto_verify(&self, request: &AiRequest) -> Result<AutoVerifyResponse, AiError> {
        self.post("auto-verify", request).await
    }

    async fn chat(&self, request: &AiRequest) -> Result<ChatResponse, AiError> {
        self.post("chat", request).await
    }
}

/// Scripted responses for tests, standing in for a live AI backend.
#[derive(Default)]
pub struct MockDeploymentAi {
    pub generate_response: Option<GenerateResponse>,
    pub analyze_errors_response: Option<AnalyzeErrorsResponse>,
    pub auto_verify_response: Option<AutoVerifyResponse>,
    pub chat_response: Option<ChatResponse>,
}

#[async_trait]
impl DeploymentAi for MockDeploymentAi {
    async fn generate(&self, _request: &AiRequest) -> Result<GenerateResponse, AiError> {
        self.generate_response.clone().ok_or_else(|| AiError::Unavailable("no scripted response".into()))
    }

    async fn regenerate(&self, request: &AiRequest) -> Result<GenerateResponse, AiError> {
        self.generate(request).await
    }

    async fn analyze_errors(&self, _request: &AiRequest) -> Result<AnalyzeErrorsResponse, AiError> {
        self.analyze_errors_response.clone().ok_or_else(|| AiError::Unavailable("no scripted response".into()))
    }

    async fn auto_verify(&self, _request: &AiRequest) -> Result<AutoVerifyResponse, AiError> {
        self.auto_verify_response.clone().ok_or_else(|| AiError::Unavailable("no scripted response".into()))
    }

    async fn chat(&self, _request: &AiRequest) -> Result<ChatResponse, AiError> {
        self.chat_response.clone().ok_or_else(|| AiError::Unavailable("no scripted response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_domain::{DeploymentId, StageId};
    use crate::types::Action;

    fn request() -> AiRequest {
        AiRequest {
            deployment_id: DeploymentId::new("d1"),
            stage_id: StageId::Analyze,
            project_context: "a repo".to_string(),
            history: vec![],
            action: Action::Generate,
            failed_commands: None,
            message: None,
        }
    }

    #[tokio::test]
    async fn mock_returns_scripted_generate_response() {
        let mock = MockDeploymentAi {
            generate_response: Some(GenerateResponse {
                instructions: "do the thing".to_string(),
                commands: vec![],
                file_proposals: vec![],
            }),
            ..Default::default()
        };
        let resp = mock.generate(&request()).await.unwrap();
        assert_eq!(resp.instructions, "do the thing");
    }

    #[tokio::test]
    async fn mock_without_script_is_unavailable() {
        let mock = MockDeploymentAi::default();
        let err = mock.generate(&request()).await.unwrap_err();
        assert!(matches!(err, AiError::Unavailable(_)));
    }
}
