use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandQueue;
use crate::ids::CommandId;

/// A named phase the Orchestrator drives a deployment through. Distinct
/// from [`crate::state_machine::DeploymentStatus`] — a stage typically
/// owns several raw states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageId {
    Analyze,
    Configure,
    Generate,
    AwaitFileUpload,
    VerifyFiles,
    LocalBuild,
    LocalTest,
    Provision,
    Deploy,
    HealthCheck,
}

impl StageId {
    pub const ORDER: [StageId; 10] = [
        StageId::Analyze,
        StageId::Configure,
        StageId::Generate,
        StageId::AwaitFileUpload,
        StageId::VerifyFiles,
        StageId::LocalBuild,
        StageId::LocalTest,
        StageId::Provision,
        StageId::Deploy,
        StageId::HealthCheck,
    ];

    pub fn initial() -> StageId {
        Self::ORDER[0]
    }

    pub fn is_terminal_stage(&self) -> bool {
        matches!(self, StageId::HealthCheck)
    }

    /// The stage that follows `self`, or `None` if `self` is the last stage.
    pub fn next(&self) -> Option<StageId> {
        let idx = Self::ORDER.iter().position(|s| s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage_id: StageId,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProposal {
    pub id: String,
    pub path: String,
    pub contents: String,
    pub approved: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub summary: String,
    pub fix_commands: Vec<String>,
    pub retry_commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub stage_id: StageId,
    pub passed: bool,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-deployment orchestration context — the Orchestrator's resume anchor.
///
/// Invariant: `current_stage_id` is either the initial stage or the stage
/// following the last entry of `stage_history` whose `success` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSession {
    pub current_stage_id: StageId,
    pub stage_history: Vec<StageHistoryEntry>,
    pub last_ai_instructions: Option<String>,
    pub command_queue: CommandQueue,
    /// Commands classified `RequiresConfirmation` that are still waiting on
    /// a caller to confirm them, persisted so a reload doesn't silently
    /// drop the block.
    #[serde(default)]
    pub pending_confirmation: HashSet<CommandId>,
    pub error_analyses: Vec<ErrorAnalysis>,
    pub pending_file_proposals: Vec<FileProposal>,
    pub verification_outcomes: Vec<VerificationOutcome>,
}

impl StageSession {
    pub fn new(deployment_id: crate::ids::DeploymentId) -> Self {
        StageSession {
            current_stage_id: StageId::initial(),
            stage_history: Vec::new(),
            last_ai_instructions: None,
            command_queue: CommandQueue::new(deployment_id),
            pending_confirmation: HashSet::new(),
            error_analyses: Vec::new(),
            pending_file_proposals: Vec::new(),
            verification_outcomes: Vec::new(),
        }
    }

    /// Record a successful stage and advance `current_stage_id`, or record a
    /// failed attempt while leaving `current_stage_id` unchanged for retry.
    pub fn record_stage_result(&mut self, stage_id: StageId, success: bool, now: DateTime<Utc>) {
        self.stage_history.push(StageHistoryEntry { stage_id, success, timestamp: now });
        if success {
            if let Some(next) = stage_id.next() {
                self.current_stage_id = next;
            }
        }
    }

    /// True iff `current_stage_id` satisfies the invariant relative to
    /// `stage_history` — used by tests and by reload-time sanity checks.
    pub fn invariant_holds(&self) -> bool {
        match self.stage_history.iter().rev().find(|e| e.success) {
            None => self.current_stage_id == StageId::initial(),
            Some(last_success) => match last_success.stage_id.next() {
                Some(next) => self.current_stage_id == next,
                None => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeploymentId;

    #[test]
    fn new_session_starts_at_first_stage() {
        let s = StageSession::new(DeploymentId::new("d1"));
        assert_eq!(s.current_stage_id, StageId::Analyze);
        assert!(s.invariant_holds());
    }

    #[test]
    fn success_advances_current_stage() {
        let mut s = StageSession::new(DeploymentId::new("d1"));
        s.record_stage_result(StageId::Analyze, true, Utc::now());
        assert_eq!(s.current_stage_id, StageId::Configure);
        assert!(s.invariant_holds());
    }

    #[test]
    fn failure_does_not_advance() {
        let mut s = StageSession::new(DeploymentId::new("d1"));
        s.record_stage_result(StageId::Analyze, false, Utc::now());
        assert_eq!(s.current_stage_id, StageId::Analyze);
        assert!(s.invariant_holds());
    }

    #[test]
    fn last_stage_has_no_next() {
        assert_eq!(StageId::HealthCheck.next(), None);
        assert!(StageId::HealthCheck.is_terminal_stage());
    }
}
