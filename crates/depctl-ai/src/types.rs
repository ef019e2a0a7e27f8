use depctl_domain::command::CommandType;
use depctl_domain::{DeploymentId, StageId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Generate,
    Regenerate,
    AnalyzeErrors,
    AutoVerify,
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCommand {
    pub command: String,
    pub exit_code: Option<i32>,
    pub error_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    pub deployment_id: DeploymentId,
    pub stage_id: StageId,
    pub project_context: String,
    pub history: Vec<String>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_commands: Option<Vec<FailedCommand>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A command the AI proposes. Distinct from `depctl_domain::Command` — this
/// carries no runtime status, only what the AI contract returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedCommand {
    pub command: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub is_fix_command: bool,
    #[serde(default)]
    pub is_retry_command: bool,
}

impl ProposedCommand {
    pub fn into_command(self) -> depctl_domain::Command {
        let mut c = depctl_domain::Command::new(self.command, self.kind);
        c.is_fix_command = self.is_fix_command;
        c.is_retry_command = self.is_retry_command;
        c
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedFile {
    pub path: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub instructions: String,
    pub commands: Vec<ProposedCommand>,
    #[serde(default)]
    pub file_proposals: Vec<ProposedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeErrorsResponse {
    pub analysis: String,
    pub fix_commands: Vec<ProposedCommand>,
    pub retry_commands: Vec<ProposedCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoVerifyResponse {
    pub passed: bool,
    pub analysis: String,
    #[serde(default)]
    pub should_advance: bool,
    #[serde(default)]
    pub fix_commands: Vec<ProposedCommand>,
    #[serde(default)]
    pub retry_commands: Vec<ProposedCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub commands: Vec<ProposedCommand>,
}
