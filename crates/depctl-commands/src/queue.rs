use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use depctl_domain::command::{CapturedOutput, QueueProgress as DomainQueueProgress};
use depctl_domain::{
    Command, CommandHistoryEntry, CommandId, CommandQueue, CommandStatus, DeploymentId, UserId,
};
use depctl_store::CommandHistoryRepository;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::CommandsError;
use crate::validator::{classify, Classification};

pub use depctl_domain::command::QueueProgress;

struct DeploymentState {
    queue: CommandQueue,
    /// Commands classified `RequiresConfirmation` that have not yet been
    /// confirmed by a caller; `execute` refuses to run them until removed.
    pending_confirmation: HashSet<CommandId>,
}

/// C5 + C6: validates commands on enqueue and serializes execution per
/// deployment behind one mutex per `deploymentId`, so at most one `execute`
/// is ever in flight for a given deployment.
pub struct CommandQueueService {
    deployments: Mutex<HashMap<DeploymentId, Arc<Mutex<DeploymentState>>>>,
    history: Arc<dyn CommandHistoryRepository>,
    process_timeout: Duration,
    process_output_cap_bytes: usize,
}

impl CommandQueueService {
    pub fn new(history: Arc<dyn CommandHistoryRepository>, process_timeout: Duration, process_output_cap_bytes: usize) -> Self {
        CommandQueueService {
            deployments: Mutex::new(HashMap::new()),
            history,
            process_timeout,
            process_output_cap_bytes,
        }
    }

    async fn state_for(&self, deployment_id: &DeploymentId) -> Arc<Mutex<DeploymentState>> {
        let mut guard = self.deployments.lock().await;
        guard
            .entry(deployment_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DeploymentState {
                    queue: CommandQueue::new(deployment_id.clone()),
                    pending_confirmation: HashSet::new(),
                }))
            })
            .clone()
    }

    /// Validates every command, rejecting the whole batch with
    /// `ValidationRejected` if any is `Denied`. Commands classified
    /// `RequiresConfirmation` are enqueued but blocked from execution
    /// until `confirm` is called for their id.
    pub async fn enqueue(&self, deployment_id: &DeploymentId, commands: Vec<Command>) -> Result<(), CommandsError> {
        let mut needs_confirmation = Vec::new();
        for c in &commands {
            match classify(&c.command, c.kind) {
                Classification::Denied { reason } => return Err(CommandsError::ValidationRejected(reason)),
                Classification::RequiresConfirmation { .. } => needs_confirmation.push(c.id.clone()),
                Classification::Allowed => {}
            }
        }

        let state = self.state_for(deployment_id).await;
        let mut guard = state.lock().await;
        guard.queue.enqueue(commands)?;
        guard.pending_confirmation = needs_confirmation.into_iter().collect();
        Ok(())
    }

    pub async fn confirm(&self, deployment_id: &DeploymentId, command_id: &CommandId) -> Result<(), CommandsError> {
        let state = self.state_for(deployment_id).await;
        state.lock().await.pending_confirmation.remove(command_id);
        Ok(())
    }

    pub async fn next_command(&self, deployment_id: &DeploymentId) -> Result<Option<Command>, CommandsError> {
        let state = self.state_for(deployment_id).await;
        let guard = state.lock().await;
        Ok(guard.queue.next_command().cloned())
    }

    /// Executes the command at the queue's current index. Refuses to run a
    /// command still awaiting confirmation.
    pub async fn execute(
        &self,
        deployment_id: &DeploymentId,
        workdir: &std::path::Path,
        env: &HashMap<String, String>,
        user_id: Option<UserId>,
        cancel: CancellationToken,
    ) -> Result<CommandStatus, CommandsError> {
        let state = self.state_for(deployment_id).await;
        let mut guard = state.lock().await;

        let command = guard
            .queue
            .next_command()
            .cloned()
            .ok_or_else(|| CommandsError::UnknownDeployment(deployment_id.to_string()))?;

        if guard.pending_confirmation.contains(&command.id) {
            return Err(CommandsError::RequiresConfirmation(command.command.clone()));
        }

        guard.queue.mark_running(&command.id, Utc::now())?;
        drop(guard);

        let started_at = Utc::now();
        let run_result = depctl_process::run(
            &command.command,
            workdir,
            env,
            self.process_timeout,
            Some(self.process_output_cap_bytes),
            cancel,
        )
        .await;

        let mut guard = state.lock().await;
        let (exit_code, stdout, stderr, truncated) = match &run_result {
            Ok(r) => (r.exit_code, r.stdout.clone(), r.stderr.clone(), r.truncated),
            Err(_) => (-1, String::new(), "process runner error".to_string(), false),
        };
        let merged = format!("{stdout}\n--- stderr ---\n{stderr}");
        guard.queue.record_result(
            &command.id,
            exit_code,
            CapturedOutput { text: merged.clone(), truncated },
            Utc::now(),
        )?;
        let final_status = guard
            .queue
            .commands
            .iter()
            .find(|c| c.id == command.id)
            .map(|c| c.status)
            .unwrap_or(CommandStatus::Failed);
        drop(guard);

        self.history
            .append(&CommandHistoryEntry {
                command_id: command.id.clone(),
                deployment_id: deployment_id.clone(),
                command: command.command.clone(),
                kind: command.kind,
                status: final_status,
                exit_code: Some(exit_code),
                stdout,
                stderr,
                user_id,
                started_at,
                completed_at: Some(Utc::now()),
                duration_ms: Some((Utc::now() - started_at).num_milliseconds()),
                working_directory: workdir.display().to_string(),
                env_snapshot: env.clone().into_iter().collect(),
            })
            .await?;

        run_result.map_err(CommandsError::from)?;
        Ok(final_status)
    }

    pub async fn skip(&self, deployment_id: &DeploymentId) -> Result<(), CommandsError> {
        let state = self.state_for(deployment_id).await;
        let result = state.lock().await.queue.skip()?;
        Ok(result)
    }

    /// Splices the AI-provided fix/retry commands after the blocking index
    /// and clears the block. Validates each spliced command the same way
    /// `enqueue` does.
    pub async fn resolve(
        &self,
        deployment_id: &DeploymentId,
        fix_commands: Vec<Command>,
        retry_commands: Vec<Command>,
    ) -> Result<(), CommandsError> {
        for c in fix_commands.iter().chain(retry_commands.iter()) {
            if let Classification::Denied { reason } = classify(&c.command, c.kind) {
                return Err(CommandsError::ValidationRejected(reason));
            }
        }
        let state = self.state_for(deployment_id).await;
        let result = state.lock().await.queue.splice_resolution(fix_commands, retry_commands)?;
        Ok(result)
    }

    pub async fn progress(&self, deployment_id: &DeploymentId) -> DomainQueueProgress {
        let state = self.state_for(deployment_id).await;
        let result = state.lock().await.queue.progress();
        result
    }

    pub async fn is_blocked(&self, deployment_id: &DeploymentId) -> bool {
        let state = self.state_for(deployment_id).await;
        let result = state.lock().await.queue.is_blocked();
        result
    }

    /// Returns a clone of the current queue, for persisting into a
    /// `StageSession` at the end of each orchestrator step.
    pub async fn snapshot(&self, deployment_id: &DeploymentId) -> CommandQueue {
        let state = self.state_for(deployment_id).await;
        let result = state.lock().await.queue.clone();
        result
    }

    /// Returns a clone of the commands still awaiting confirmation, for
    /// persisting into a `StageSession` alongside `snapshot`.
    pub async fn pending_confirmation_snapshot(&self, deployment_id: &DeploymentId) -> HashSet<CommandId> {
        let state = self.state_for(deployment_id).await;
        let result = state.lock().await.pending_confirmation.clone();
        result
    }

    /// Hydrates in-process state from a persisted queue — the resume path.
    /// Any command left `running` at crash time should already have been
    /// corrected via `CommandQueue::recover_from_crash` before this call.
    pub async fn restore(&self, deployment_id: &DeploymentId, queue: CommandQueue, pending_confirmation: HashSet<CommandId>) {
        let state = self.state_for(deployment_id).await;
        let mut guard = state.lock().await;
        guard.queue = queue;
        guard.pending_confirmation = pending_confirmation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_domain::CommandType;
    use depctl_store::InMemoryStore;

    fn service() -> CommandQueueService {
        CommandQueueService::new(Arc::new(InMemoryStore::new()), Duration::from_secs(5), 8 * 1024 * 1024)
    }

    #[tokio::test]
    async fn enqueue_rejects_denied_commands() {
        let svc = service();
        let deployment_id = DeploymentId::new("d1");
        let commands = vec![Command::new("rm -rf /", CommandType::Shell)];
        let err = svc.enqueue(&deployment_id, commands).await.unwrap_err();
        assert!(matches!(err, CommandsError::ValidationRejected(_)));
    }

    #[tokio::test]
    async fn execute_runs_and_advances_queue() {
        let svc = service();
        let deployment_id = DeploymentId::new("d1");
        svc.enqueue(&deployment_id, vec![Command::new("echo hi", CommandType::Shell)]).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let status = svc
            .execute(&deployment_id, dir.path(), &HashMap::new(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, CommandStatus::Success);
        assert!(svc.next_command(&deployment_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_command_blocks_the_queue() {
        let svc = service();
        let deployment_id = DeploymentId::new("d1");
        svc.enqueue(&deployment_id, vec![Command::new("exit 1", CommandType::Shell)]).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let status = svc
            .execute(&deployment_id, dir.path(), &HashMap::new(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, CommandStatus::Failed);
        assert!(svc.is_blocked(&deployment_id).await);
    }

    #[tokio::test]
    async fn confirmation_required_blocks_execution_until_confirmed() {
        let svc = service();
        let deployment_id = DeploymentId::new("d1");
        let cmd = Command::new("terraform destroy -auto-approve", CommandType::Iac);
        let cmd_id = cmd.id.clone();
        svc.enqueue(&deployment_id, vec![cmd]).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = svc
            .execute(&deployment_id, dir.path(), &HashMap::new(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandsError::RequiresConfirmation(_)));

        svc.confirm(&deployment_id, &cmd_id).await.unwrap();
        // terraform binary is unlikely to exist in the test sandbox; we only
        // assert that confirmation unblocked the classification gate, not
        // that the subprocess itself succeeds.
        let result = svc.execute(&deployment_id, dir.path(), &HashMap::new(), None, CancellationToken::new()).await;
        assert!(!matches!(result, Err(CommandsError::RequiresConfirmation(_))));
    }

    #[tokio::test]
    async fn snapshot_then_restore_preserves_queue_state() {
        let svc = service();
        let deployment_id = DeploymentId::new("d1");
        svc.enqueue(&deployment_id, vec![Command::new("echo hi", CommandType::Shell)]).await.unwrap();

        let snapshot = svc.snapshot(&deployment_id).await;
        assert_eq!(snapshot.commands.len(), 1);

        let other = service();
        other.restore(&deployment_id, snapshot, HashSet::new()).await;
        assert_eq!(other.snapshot(&deployment_id).await.commands.len(), 1);
    }
}
