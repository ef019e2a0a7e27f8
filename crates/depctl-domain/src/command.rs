use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{CommandId, DeploymentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Shell,
    Iac,
    Provider,
    Docker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending | CommandStatus::Running)
    }
}

/// Merged stdout+stderr capture with an explicit marker at the join point,
/// matching what the Process Runner hands back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub text: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub command: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub status: CommandStatus,
    pub is_fix_command: bool,
    pub is_retry_command: bool,
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Command {
    pub fn new(command: impl Into<String>, kind: CommandType) -> Self {
        Command {
            id: CommandId::from(uuid::Uuid::new_v4()),
            command: command.into(),
            kind,
            status: CommandStatus::Pending,
            is_fix_command: false,
            is_retry_command: false,
            exit_code: None,
            output: CapturedOutput::default(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingError {
    pub command: String,
    pub exit_code: Option<i32>,
    pub error_output: String,
}

/// Ordered sequence of [`Command`] records for one deployment.
///
/// `current_index`, `is_blocked`, and `blocking_error` are derived on every
/// read rather than stored, so they can never drift from `commands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandQueue {
    pub deployment_id: DeploymentId,
    pub commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new(deployment_id: DeploymentId) -> Self {
        CommandQueue { deployment_id, commands: Vec::new() }
    }

    /// The first index whose status is non-terminal, or `commands.len()` if
    /// every command has terminated.
    pub fn current_index(&self) -> usize {
        self.commands
            .iter()
            .position(|c| !c.status.is_terminal())
            .unwrap_or(self.commands.len())
    }

    pub fn is_blocked(&self) -> bool {
        let idx = self.current_index();
        self.commands.get(idx).map(|c| c.status == CommandStatus::Failed).unwrap_or(false)
    }

    pub fn blocking_error(&self) -> Option<BlockingError> {
        if !self.is_blocked() {
            return None;
        }
        let idx = self.current_index();
        self.commands.get(idx).map(|c| BlockingError {
            command: c.command.clone(),
            exit_code: c.exit_code,
            error_output: c.output.text.clone(),
        })
    }

    /// Replaces the queue iff no command is currently `running`.
    pub fn enqueue(&mut self, commands: Vec<Command>) -> Result<(), DomainError> {
        if self.commands.iter().any(|c| c.status == CommandStatus::Running) {
            return Err(DomainError::InvalidCommand(
                "cannot replace queue while a command is running".into(),
            ));
        }
        self.commands = commands;
        Ok(())
    }

    /// Returns the command that should run next, or `None` if blocked or
    /// exhausted.
    pub fn next_command(&self) -> Option<&Command> {
        if self.is_blocked() {
            return None;
        }
        let idx = self.current_index();
        match self.commands.get(idx) {
            Some(c) if c.status == CommandStatus::Pending => Some(c),
            _ => None,
        }
    }

    pub fn mark_running(&mut self, id: &CommandId, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.commands.iter().any(|c| c.status == CommandStatus::Running) {
            return Err(DomainError::InvalidCommand(
                "another command is already running for this deployment".into(),
            ));
        }
        let cmd = self
            .commands
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| DomainError::InvalidCommand(format!("unknown command {id}")))?;
        cmd.status = CommandStatus::Running;
        cmd.started_at = Some(now);
        Ok(())
    }

    /// Records the outcome of an execution: success on exit code 0,
    /// otherwise `failed` and the queue becomes blocked at this index.
    pub fn record_result(
        &mut self,
        id: &CommandId,
        exit_code: i32,
        output: CapturedOutput,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let cmd = self
            .commands
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| DomainError::InvalidCommand(format!("unknown command {id}")))?;
        cmd.exit_code = Some(exit_code);
        cmd.output = output;
        cmd.completed_at = Some(now);
        cmd.status = if exit_code == 0 { CommandStatus::Success } else { CommandStatus::Failed };
        Ok(())
    }

    /// Marks the blocking command `skipped`, clearing the block. Only valid
    /// while blocked.
    pub fn skip(&mut self) -> Result<(), DomainError> {
        if !self.is_blocked() {
            return Err(DomainError::InvalidCommand("queue is not blocked".into()));
        }
        let idx = self.current_index();
        self.commands[idx].status = CommandStatus::Skipped;
        Ok(())
    }

    /// Reload-time recovery: any command left `running` at crash time is
    /// marked `failed reason="interrupted"`, which blocks the queue at that
    /// index. Returns `true` if a command was corrected.
    pub fn recover_from_crash(&mut self, now: DateTime<Utc>) -> bool {
        let Some(running) = self.commands.iter_mut().find(|c| c.status == CommandStatus::Running) else {
            return false;
        };
        running.status = CommandStatus::Failed;
        running.exit_code = None;
        running.output = CapturedOutput { text: "interrupted".to_string(), truncated: false };
        running.completed_at = Some(now);
        true
    }

    /// Splices fix commands then retry commands immediately after the
    /// current index, clearing the block. The caller is responsible for
    /// having obtained the fix/retry commands from the AI resolve path.
    pub fn splice_resolution(
        &mut self,
        fix_commands: Vec<Command>,
        retry_commands: Vec<Command>,
    ) -> Result<(), DomainError> {
        if !self.is_blocked() {
            return Err(DomainError::InvalidCommand("queue is not blocked".into()));
        }
        let idx = self.current_index();
        let mut spliced = fix_commands;
        spliced.extend(retry_commands);
        self.commands.splice(idx + 1..idx + 1, spliced);
        Ok(())
    }

    pub fn progress(&self) -> QueueProgress {
        let idx = self.current_index();
        let completed = self.commands[..idx.min(self.commands.len())]
            .iter()
            .filter(|c| c.status.is_terminal())
            .count();
        QueueProgress { completed, total: self.commands.len(), is_blocked: self.is_blocked() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProgress {
    pub completed: usize,
    pub total: usize,
    pub is_blocked: bool,
}

/// Persisted record per executed command, kept even after queue rotation.
/// Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHistoryEntry {
    pub command_id: CommandId,
    pub deployment_id: DeploymentId,
    pub command: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub user_id: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub working_directory: String,
    pub env_snapshot: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(statuses: &[CommandStatus]) -> CommandQueue {
        let mut q = CommandQueue::new(DeploymentId::new("d1"));
        q.commands = statuses
            .iter()
            .map(|s| {
                let mut c = Command::new("echo hi", CommandType::Shell);
                c.status = *s;
                c
            })
            .collect();
        q
    }

    #[test]
    fn current_index_skips_terminal_commands() {
        let q = queue_with(&[CommandStatus::Success, CommandStatus::Pending, CommandStatus::Pending]);
        assert_eq!(q.current_index(), 1);
        assert!(!q.is_blocked());
    }

    #[test]
    fn failed_current_blocks_the_queue() {
        let q = queue_with(&[CommandStatus::Success, CommandStatus::Failed, CommandStatus::Pending]);
        assert!(q.is_blocked());
        assert!(q.next_command().is_none());
        assert!(q.blocking_error().is_some());
    }

    #[test]
    fn skip_clears_block_and_marks_skipped() {
        let mut q = queue_with(&[CommandStatus::Failed, CommandStatus::Pending]);
        q.skip().unwrap();
        assert!(!q.is_blocked());
        assert_eq!(q.commands[0].status, CommandStatus::Skipped);
    }

    #[test]
    fn cannot_mark_two_commands_running() {
        let mut q = queue_with(&[CommandStatus::Running, CommandStatus::Pending]);
        let id = q.commands[1].id.clone();
        assert!(q.mark_running(&id, Utc::now()).is_err());
    }

    #[test]
    fn enqueue_rejected_while_running() {
        let mut q = queue_with(&[CommandStatus::Running]);
        assert!(q.enqueue(vec![]).is_err());
    }

    #[test]
    fn recover_from_crash_fails_the_running_command() {
        let mut q = queue_with(&[CommandStatus::Success, CommandStatus::Running, CommandStatus::Pending]);
        assert!(q.recover_from_crash(Utc::now()));
        assert_eq!(q.commands[1].status, CommandStatus::Failed);
        assert_eq!(q.commands[1].output.text, "interrupted");
        assert!(q.is_blocked());
        assert_eq!(q.current_index(), 1);
    }

    #[test]
    fn recover_from_crash_is_noop_without_a_running_command() {
        let mut q = queue_with(&[CommandStatus::Success, CommandStatus::Pending]);
        assert!(!q.recover_from_crash(Utc::now()));
    }

    #[test]
    fn progress_counts_terminal_before_current_index() {
        let q = queue_with(&[CommandStatus::Success, CommandStatus::Skipped, CommandStatus::Pending]);
        let p = q.progress();
        assert_eq!(p.completed, 2);
        assert_eq!(p.total, 3);
        assert!(!p.is_blocked);
    }
}
