use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::UserId;

/// The lifecycle state of a [`crate::deployment::Deployment`].
///
/// Terminal states are `Deployed`, `Cancelled`, `Destroyed`, `RolledBack`,
/// `RollbackFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Initial,
    Gathering,
    RepositoryAnalysis,
    CodeAnalysis,
    InfrastructureDiscovery,
    DependencyAnalysis,
    Planning,
    Validating,
    ValidationFailed,
    Estimated,
    PendingApproval,
    Approved,
    SandboxDeploying,
    SandboxFailed,
    Testing,
    GithubCommit,
    GithubActions,
    Deploying,
    DeploymentFailed,
    Deployed,
    Cancelled,
    RollingBack,
    RolledBack,
    RollbackFailed,
    Destroyed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Deployed
                | DeploymentStatus::Cancelled
                | DeploymentStatus::Destroyed
                | DeploymentStatus::RolledBack
                | DeploymentStatus::RollbackFailed
        )
    }

    /// Only terminal states are excluded from resumability; failure
    /// sidetracks (non-terminal states a deployment can be stuck in after an
    /// error) remain resumable.
    pub fn is_resumable(&self) -> bool {
        !self.is_terminal()
    }

    /// The states reachable from `self` in one accepted transition.
    pub fn allowed_next(&self) -> &'static [DeploymentStatus] {
        use DeploymentStatus::*;
        match self {
            Initial => &[Gathering, Cancelled],
            Gathering => &[RepositoryAnalysis, Cancelled],
            RepositoryAnalysis => &[CodeAnalysis, Cancelled],
            CodeAnalysis => &[InfrastructureDiscovery, Cancelled],
            InfrastructureDiscovery => &[DependencyAnalysis, Cancelled],
            DependencyAnalysis => &[Planning, Cancelled],
            Planning => &[Validating, Cancelled],
            Validating => &[Estimated, ValidationFailed, Cancelled],
            ValidationFailed => &[Validating, Cancelled],
            Estimated => &[PendingApproval, Cancelled],
            PendingApproval => &[Approved, Cancelled],
            Approved => &[SandboxDeploying, Cancelled],
            SandboxDeploying => &[Testing, SandboxFailed, Cancelled],
            SandboxFailed => &[SandboxDeploying, Cancelled],
            Testing => &[GithubCommit, SandboxFailed, Cancelled],
            GithubCommit => &[GithubActions, Cancelled],
            GithubActions => &[Deploying, DeploymentFailed, Cancelled],
            Deploying => &[Deployed, DeploymentFailed, Cancelled],
            DeploymentFailed => &[Deploying, RollingBack, Cancelled],
            Deployed => &[RollingBack, Destroyed],
            RollingBack => &[RolledBack, RollbackFailed],
            RolledBack => &[Destroyed],
            // Terminal — no accepted transitions out.
            Cancelled | RollbackFailed | Destroyed => &[],
        }
    }

    pub fn can_transition_to(&self, target: DeploymentStatus) -> bool {
        self.allowed_next().contains(&target)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SCREAMING_SNAKE_CASE, matching the serde representation, so log
        // lines and the serialized form always agree.
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

/// One entry in a deployment's append-only `statusHistory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: DeploymentStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub actor: Option<UserId>,
}

/// Attempt a transition, returning the new history entry on success.
///
/// Pure function: does not mutate `history`, the caller appends the
/// returned entry and updates `current` to `target`.
pub fn transition(
    current: DeploymentStatus,
    target: DeploymentStatus,
    now: DateTime<Utc>,
    reason: Option<String>,
    actor: Option<UserId>,
) -> Result<StatusHistoryEntry, DomainError> {
    if !current.can_transition_to(target) {
        return Err(DomainError::IllegalTransition {
            from: current.to_string(),
            event: target.to_string(),
        });
    }
    Ok(StatusHistoryEntry {
        status: target,
        timestamp: now,
        reason,
        actor,
    })
}

/// Verify that `history[k]` is reachable from `history[k-1]` for every k,
/// and that `history[0]` is `Initial` (or the sole non-Initial seed entry
/// a resumed deployment might have been reloaded with). Used by tests and
/// by the resumability invariant check.
pub fn history_is_legal(history: &[StatusHistoryEntry]) -> bool {
    history
        .windows(2)
        .all(|w| w[0].status.can_transition_to(w[1].status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transition_succeeds() {
        let entry = transition(
            DeploymentStatus::Initial,
            DeploymentStatus::Gathering,
            Utc::now(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(entry.status, DeploymentStatus::Gathering);
    }

    #[test]
    fn illegal_transition_rejected() {
        let err = transition(
            DeploymentStatus::Deployed,
            DeploymentStatus::Gathering,
            Utc::now(),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::IllegalTransition { .. }));
    }

    #[test]
    fn terminal_states_have_no_outbound_transitions() {
        for s in [
            DeploymentStatus::Cancelled,
            DeploymentStatus::RollbackFailed,
            DeploymentStatus::Destroyed,
        ] {
            assert!(s.allowed_next().is_empty(), "{:?} should be terminal", s);
        }
    }

    #[test]
    fn failure_sidetracks_are_resumable() {
        assert!(DeploymentStatus::ValidationFailed.is_resumable());
        assert!(DeploymentStatus::SandboxFailed.is_resumable());
        assert!(DeploymentStatus::DeploymentFailed.is_resumable());
    }

    #[test]
    fn history_legality_check() {
        let h = vec![
            StatusHistoryEntry { status: DeploymentStatus::Initial, timestamp: Utc::now(), reason: None, actor: None },
            StatusHistoryEntry { status: DeploymentStatus::Gathering, timestamp: Utc::now(), reason: None, actor: None },
        ];
        assert!(history_is_legal(&h));

        let bad = vec![
            StatusHistoryEntry { status: DeploymentStatus::Deployed, timestamp: Utc::now(), reason: None, actor: None },
            StatusHistoryEntry { status: DeploymentStatus::Gathering, timestamp: Utc::now(), reason: None, actor: None },
        ];
        assert!(!history_is_legal(&bad));
    }
}
