use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use depctl_ai::{Action, AiRequest, DeploymentAi, FailedCommand};
use depctl_audit::AuditLog;
use depctl_commands::CommandQueueService;
use depctl_domain::stage::{ErrorAnalysis, FileProposal, VerificationOutcome};
use depctl_domain::{
    AuditEntryDraft, Command, CommandStatus, Deployment, DeploymentId, DeploymentStatus,
    StageSession, UserId,
};
use depctl_iac::LifecycleManager;
use depctl_store::{DeploymentRepository, StageSessionRepository};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrchestratorError;

/// What happened after `execute_command` drained the queue, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Ran(CommandStatus),
    AutoVerified { passed: bool },
}

/// C9: drives a deployment through its ten stages, following a
/// load-state/act/record-an-audit-entry-for-every-outcome/continue-past-
/// per-item-errors shape, adapted to an AI-driven stage-by-stage loop.
pub struct Orchestrator {
    deployments: Arc<dyn DeploymentRepository>,
    sessions: Arc<dyn StageSessionRepository>,
    commands: Arc<CommandQueueService>,
    iac: Arc<LifecycleManager>,
    ai: Arc<dyn DeploymentAi>,
    audit: Arc<AuditLog>,
    env: std::collections::HashMap<String, String>,
}

impl Orchestrator {
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        sessions: Arc<dyn StageSessionRepository>,
        commands: Arc<CommandQueueService>,
        iac: Arc<LifecycleManager>,
        ai: Arc<dyn DeploymentAi>,
        audit: Arc<AuditLog>,
        env: std::collections::HashMap<String, String>,
    ) -> Self {
        Orchestrator { deployments, sessions, commands, iac, ai, audit, env }
    }

    async fn load_deployment(&self, deployment_id: &DeploymentId) -> Result<Deployment, OrchestratorError> {
        self.deployments
            .get(deployment_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownDeployment(deployment_id.to_string()))
    }

    /// The resume anchor: reloads the persisted session, corrects any
    /// command left `running` at crash time, and hydrates the in-process
    /// `CommandQueueService` from it. Safe
    /// to call at the top of every operation — a no-op when nothing crashed.
    async fn load(&self, deployment_id: &DeploymentId) -> Result<StageSession, OrchestratorError> {
        let mut session = match self.sessions.get(deployment_id).await? {
            Some(s) => s,
            None => StageSession::new(deployment_id.clone()),
        };
        if session.command_queue.recover_from_crash(Utc::now()) {
            warn!(%deployment_id, "recovered an interrupted command on reload");
            self.sessions.upsert(deployment_id, &session).await?;
        }
        self.commands.restore(deployment_id, session.command_queue.clone(), session.pending_confirmation.clone()).await;
        Ok(session)
    }

    async fn sync(&self, deployment_id: &DeploymentId, session: &mut StageSession) -> Result<(), OrchestratorError> {
        session.command_queue = self.commands.snapshot(deployment_id).await;
        session.pending_confirmation = self.commands.pending_confirmation_snapshot(deployment_id).await;
        self.sessions.upsert(deployment_id, session).await?;
        Ok(())
    }

    /// Confirms a command classified `RequiresConfirmation`, unblocking it
    /// for the next `execute_command` call.
    pub async fn confirm(&self, deployment_id: &DeploymentId, command_id: &depctl_domain::CommandId) -> Result<(), OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        self.commands.confirm(deployment_id, command_id).await?;
        self.record_audit(
            deployment_id,
            UserId::new("system:orchestrator"),
            "command_confirmed",
            Some(serde_json::json!({"commandId": command_id.to_string()})),
        )
        .await;
        self.sync(deployment_id, &mut session).await?;
        Ok(())
    }

    async fn record_audit(&self, deployment_id: &DeploymentId, actor: UserId, action: &str, details: Option<serde_json::Value>) {
        let draft = AuditEntryDraft {
            user_id: actor,
            action: action.to_string(),
            resource_type: "deployment".to_string(),
            resource_id: Some(deployment_id.to_string()),
            previous_state: None,
            new_state: None,
            details,
        };
        if let Err(e) = self.audit.append(draft).await {
            warn!(%deployment_id, action, error = %e, "audit append failed, continuing");
        }
    }

    fn history_strings(session: &StageSession) -> Vec<String> {
        session
            .stage_history
            .iter()
            .map(|h| format!("{:?}: {}", h.stage_id, if h.success { "success" } else { "failure" }))
            .collect()
    }

    /// Steps 1-3: asks the AI for this stage's plan, persists the response,
    /// and replaces the Command Queue with the proposed commands (filtered
    /// by the validator as part of `enqueue`).
    pub async fn begin_stage(&self, deployment_id: &DeploymentId, project_context: &str) -> Result<StageSession, OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        let action = if session.last_ai_instructions.is_some() { Action::Regenerate } else { Action::Generate };
        let request = AiRequest {
            deployment_id: deployment_id.clone(),
            stage_id: session.current_stage_id,
            project_context: project_context.to_string(),
            history: Self::history_strings(&session),
            action,
            failed_commands: None,
            message: None,
        };
        let response = match action {
            Action::Generate => self.ai.generate(&request).await?,
            _ => self.ai.regenerate(&request).await?,
        };

        session.last_ai_instructions = Some(response.instructions.clone());
        session.pending_file_proposals = response
            .file_proposals
            .into_iter()
            .map(|p| FileProposal { id: Uuid::new_v4().to_string(), path: p.path, contents: p.content, approved: None })
            .collect();

        let commands: Vec<Command> = response.commands.into_iter().map(|c| c.into_command()).collect();
        self.commands.enqueue(deployment_id, commands).await?;

        self.record_audit(
            deployment_id,
            UserId::new("system:orchestrator"),
            "stage_generated",
            Some(serde_json::json!({"stage": session.current_stage_id})),
        )
        .await;

        self.sync(deployment_id, &mut session).await?;
        info!(%deployment_id, stage = ?session.current_stage_id, "stage plan generated");
        Ok(session)
    }

    pub async fn next_command(&self, deployment_id: &DeploymentId) -> Result<Option<Command>, OrchestratorError> {
        let _ = self.load(deployment_id).await?;
        Ok(self.commands.next_command(deployment_id).await?)
    }

    /// Step 4: executes the queue's current command. When execution drains
    /// the queue (nothing left to run and not blocked), automatically
    /// triggers auto-verify (step 5).
    pub async fn execute_command(
        &self,
        deployment_id: &DeploymentId,
        workdir: &Path,
        project_context: &str,
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        let status = self.commands.execute(deployment_id, workdir, &self.env, None, cancel).await?;
        self.sync(deployment_id, &mut session).await?;

        if status == CommandStatus::Failed {
            self.record_audit(
                deployment_id,
                UserId::new("system:orchestrator"),
                "command_failed",
                Some(serde_json::json!({"stage": session.current_stage_id})),
            )
            .await;
            return Ok(ExecuteOutcome::Ran(status));
        }

        let drained = !self.commands.is_blocked(deployment_id).await && self.commands.next_command(deployment_id).await?.is_none();
        if drained {
            let passed = self.try_auto_verify(deployment_id, project_context).await?;
            return Ok(ExecuteOutcome::AutoVerified { passed });
        }
        Ok(ExecuteOutcome::Ran(status))
    }

    pub async fn skip_command(&self, deployment_id: &DeploymentId) -> Result<(), OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        self.commands.skip(deployment_id).await?;
        self.sync(deployment_id, &mut session).await?;
        Ok(())
    }

    /// Asks the AI to analyze the blocking command's failure and splices
    /// its suggested fix/retry commands in, clearing the block.
    pub async fn resolve_error(&self, deployment_id: &DeploymentId, project_context: &str) -> Result<(), OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        let blocking = session.command_queue.blocking_error().ok_or(OrchestratorError::NotBlocked)?;

        let request = AiRequest {
            deployment_id: deployment_id.clone(),
            stage_id: session.current_stage_id,
            project_context: project_context.to_string(),
            history: Self::history_strings(&session),
            action: Action::AnalyzeErrors,
            failed_commands: Some(vec![FailedCommand {
                command: blocking.command.clone(),
                exit_code: blocking.exit_code,
                error_output: blocking.error_output.clone(),
            }]),
            message: None,
        };
        let response = self.ai.analyze_errors(&request).await?;

        session.error_analyses.push(ErrorAnalysis {
            summary: response.analysis.clone(),
            fix_commands: response.fix_commands.iter().map(|c| c.command.clone()).collect(),
            retry_commands: response.retry_commands.iter().map(|c| c.command.clone()).collect(),
        });

        let fix: Vec<Command> = response.fix_commands.into_iter().map(|c| c.into_command()).collect();
        let retry: Vec<Command> = response.retry_commands.into_iter().map(|c| c.into_command()).collect();
        self.commands.resolve(deployment_id, fix, retry).await?;

        self.record_audit(deployment_id, UserId::new("system:orchestrator"), "error_resolved", None).await;
        self.sync(deployment_id, &mut session).await?;
        Ok(())
    }

    /// Step 5-6: asks the AI to auto-verify the drained stage. `passed`
    /// advances `currentStage`; on the terminal stage this also attempts to
    /// move the deployment's raw state machine to `Deployed` (best-effort —
    /// the state machine's fine-grained states are driven by the caller's
    /// own approve/cancel flow, not by the stage driver). `passed=false`
    /// re-enters the queue wholesale with the AI's fix/retry commands.
    pub async fn try_auto_verify(&self, deployment_id: &DeploymentId, project_context: &str) -> Result<bool, OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        let verified_stage = session.current_stage_id;

        let status_map: Vec<serde_json::Value> = session
            .command_queue
            .commands
            .iter()
            .map(|c| serde_json::json!({"command": c.command, "status": c.status, "exitCode": c.exit_code}))
            .collect();
        let output_samples: Vec<String> = session
            .command_queue
            .commands
            .iter()
            .map(|c| c.output.text.chars().take(500).collect())
            .collect();

        let request = AiRequest {
            deployment_id: deployment_id.clone(),
            stage_id: verified_stage,
            project_context: project_context.to_string(),
            history: Self::history_strings(&session),
            action: Action::AutoVerify,
            failed_commands: None,
            message: Some(serde_json::json!({"statusMap": status_map, "outputSamples": output_samples}).to_string()),
        };
        let response = self.ai.auto_verify(&request).await?;

        session.verification_outcomes.push(VerificationOutcome {
            stage_id: verified_stage,
            passed: response.passed,
            notes: Some(response.analysis.clone()),
            timestamp: Utc::now(),
        });

        if response.passed {
            session.record_stage_result(verified_stage, true, Utc::now());
            self.record_audit(
                deployment_id,
                UserId::new("system:orchestrator"),
                "stage_passed",
                Some(serde_json::json!({"stage": verified_stage})),
            )
            .await;

            if verified_stage.is_terminal_stage() {
                let mut deployment = self.load_deployment(deployment_id).await?;
                if let Err(e) = deployment.advance(DeploymentStatus::Deployed, Utc::now(), Some("health check passed".into()), None) {
                    warn!(%deployment_id, error = %e, "stage driver reached terminal stage but deployment status could not advance to DEPLOYED");
                } else {
                    self.deployments.upsert(&deployment).await?;
                    self.record_audit(deployment_id, UserId::new("system:orchestrator"), "deployment_deployed", None).await;
                }
            }
        } else {
            session.record_stage_result(verified_stage, false, Utc::now());
            self.record_audit(
                deployment_id,
                UserId::new("system:orchestrator"),
                "stage_failed_verification",
                Some(serde_json::json!({"stage": verified_stage})),
            )
            .await;

            let fix: Vec<Command> = response.fix_commands.into_iter().map(|c| c.into_command()).collect();
            let retry: Vec<Command> = response.retry_commands.into_iter().map(|c| c.into_command()).collect();
            if !fix.is_empty() || !retry.is_empty() {
                let mut replacement = fix;
                replacement.extend(retry);
                self.commands.enqueue(deployment_id, replacement).await?;
            }
        }

        self.sync(deployment_id, &mut session).await?;
        Ok(response.passed)
    }

    /// Single-proposal approve/reject. Approval commits every currently
    /// approved proposal to the working tree in one atomic write.
    pub async fn decide_proposal(&self, deployment_id: &DeploymentId, proposal_id: &str, approved: bool) -> Result<Option<Vec<String>>, OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        let proposal = session
            .pending_file_proposals
            .iter_mut()
            .find(|p| p.id == proposal_id)
            .ok_or_else(|| OrchestratorError::UnknownProposal(proposal_id.to_string()))?;
        proposal.approved = Some(approved);

        let formatted = if approved { Some(self.commit_approved_files(deployment_id, &session).await?) } else { None };
        self.sync(deployment_id, &mut session).await?;
        Ok(formatted)
    }

    /// Bulk approve/reject over every proposal still pending a decision.
    pub async fn decide_all_proposals(&self, deployment_id: &DeploymentId, approved: bool) -> Result<Option<Vec<String>>, OrchestratorError> {
        let mut session = self.load(deployment_id).await?;
        for p in session.pending_file_proposals.iter_mut().filter(|p| p.approved.is_none()) {
            p.approved = Some(approved);
        }
        let formatted = if approved { Some(self.commit_approved_files(deployment_id, &session).await?) } else { None };
        self.sync(deployment_id, &mut session).await?;
        Ok(formatted)
    }

    async fn commit_approved_files(&self, deployment_id: &DeploymentId, session: &StageSession) -> Result<Vec<String>, OrchestratorError> {
        let files: BTreeMap<String, String> = session
            .pending_file_proposals
            .iter()
            .filter(|p| p.approved == Some(true))
            .map(|p| (p.path.clone(), p.contents.clone()))
            .collect();
        Ok(self.iac.write_and_format(deployment_id, &files).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_ai::{GenerateResponse, MockDeploymentAi, ProposedCommand};
    use depctl_audit::AuditLog;
    use depctl_domain::{CommandType, StageId};
    use depctl_store::{DeploymentRepository, InMemoryStore, StageSessionRepository};
    use std::time::Duration;

    fn orchestrator(ai: MockDeploymentAi) -> (Orchestrator, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let commands = Arc::new(CommandQueueService::new(store.clone(), Duration::from_secs(5), 1024 * 1024));
        let iac = Arc::new(LifecycleManager::new(
            std::env::temp_dir(),
            "bucket".into(),
            "locks".into(),
            "true".into(),
            store.clone(),
            store.clone(),
            Duration::from_secs(5),
            1024 * 1024,
        ));
        let audit = Arc::new(AuditLog::new(store.clone(), Duration::from_secs(2)));
        let orchestrator = Orchestrator::new(store.clone(), store.clone(), commands, iac, Arc::new(ai), audit, Default::default());
        (orchestrator, store)
    }

    async fn seeded_deployment(store: &InMemoryStore) -> DeploymentId {
        let deployment = Deployment::new("demo", "dev", "us-east-1", "https://example.com/repo.git", "main", Utc::now());
        let id = deployment.deployment_id.clone();
        DeploymentRepository::upsert(store, &deployment).await.unwrap();
        id
    }

    #[tokio::test]
    async fn begin_stage_enqueues_ai_commands() {
        let ai = MockDeploymentAi {
            generate_response: Some(GenerateResponse {
                instructions: "analyze the repo".into(),
                commands: vec![ProposedCommand { command: "echo hi".into(), kind: CommandType::Shell, reason: None, is_fix_command: false, is_retry_command: false }],
                file_proposals: vec![],
            }),
            ..Default::default()
        };
        let (orchestrator, store) = orchestrator(ai);
        let deployment_id = seeded_deployment(&store).await;

        let session = orchestrator.begin_stage(&deployment_id, "a repo").await.unwrap();
        assert_eq!(session.current_stage_id, StageId::Analyze);
        assert_eq!(session.command_queue.commands.len(), 1);
    }

    #[tokio::test]
    async fn resume_recovers_an_interrupted_command() {
        let (orchestrator, store) = orchestrator(MockDeploymentAi::default());
        let deployment_id = seeded_deployment(&store).await;

        let mut session = StageSession::new(deployment_id.clone());
        let mut cmd = Command::new("echo hi", CommandType::Shell);
        cmd.status = CommandStatus::Running;
        session.command_queue.commands.push(cmd);
        StageSessionRepository::upsert(&*store, &deployment_id, &session).await.unwrap();

        let reloaded = orchestrator.load(&deployment_id).await.unwrap();
        assert_eq!(reloaded.command_queue.commands[0].status, CommandStatus::Failed);
        assert!(reloaded.command_queue.is_blocked());
    }

    #[tokio::test]
    async fn pending_confirmation_survives_reload_and_blocks_execution() {
        let ai = MockDeploymentAi {
            generate_response: Some(GenerateResponse {
                instructions: "tear it down".into(),
                commands: vec![ProposedCommand { command: "echo destroy".into(), kind: CommandType::Iac, reason: None, is_fix_command: false, is_retry_command: false }],
                file_proposals: vec![],
            }),
            ..Default::default()
        };
        let (orchestrator, store) = orchestrator(ai);
        let deployment_id = seeded_deployment(&store).await;

        let session = orchestrator.begin_stage(&deployment_id, "a repo").await.unwrap();
        let command_id = session.command_queue.commands[0].id.clone();

        let dir = tempfile::tempdir().unwrap();
        let err = orchestrator
            .execute_command(&deployment_id, dir.path(), "a repo", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Commands(depctl_commands::CommandsError::RequiresConfirmation(_))));

        orchestrator.confirm(&deployment_id, &command_id).await.unwrap();

        let outcome = orchestrator.execute_command(&deployment_id, dir.path(), "a repo", CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, ExecuteOutcome::Ran(CommandStatus::Success) | ExecuteOutcome::AutoVerified { .. }));
    }

    #[tokio::test]
    async fn rejecting_a_file_proposal_does_not_write_it() {
        let (orchestrator, store) = orchestrator(MockDeploymentAi::default());
        let deployment_id = seeded_deployment(&store).await;

        let mut session = StageSession::new(deployment_id.clone());
        session.pending_file_proposals.push(FileProposal { id: "p1".into(), path: "main.tf".into(), contents: "x".into(), approved: None });
        StageSessionRepository::upsert(&*store, &deployment_id, &session).await.unwrap();

        let formatted = orchestrator.decide_proposal(&deployment_id, "p1", false).await.unwrap();
        assert!(formatted.is_none());
    }
}
