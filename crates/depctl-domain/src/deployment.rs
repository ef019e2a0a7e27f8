use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{DeploymentId, UserId};
use crate::state_machine::{self, DeploymentStatus, StatusHistoryEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IacSourceBundle {
    pub main: String,
    pub variables: String,
    pub outputs: String,
    pub providers: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IacSourceVersion {
    pub version: u32,
    pub bundle: IacSourceBundle,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub monthly_usd: f64,
    pub breakdown: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInventoryItem {
    pub resource_type: String,
    pub name: String,
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approver: UserId,
    pub approved_at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub monthly_limit_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSnapshot {
    pub desired_hash: String,
    pub observed_hash: Option<String>,
    pub drifted: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySnapshot {
    pub findings: Vec<String>,
    pub scanned_at: DateTime<Utc>,
}

/// Root aggregate, identified by an opaque stable `deployment_id`.
///
/// Invariant: `status_history` is append-only and its last entry's status
/// equals `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_id: DeploymentId,
    pub name: String,
    pub description: Option<String>,
    pub environment: String,
    pub region: String,
    pub repository_url: String,
    pub branch: String,
    pub status: DeploymentStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    pub current_source: Option<IacSourceBundle>,
    pub version: u32,
    pub previous_versions: Vec<IacSourceVersion>,
    pub estimate: Option<CostEstimate>,
    pub actual_cost: Option<f64>,
    pub resource_inventory: Vec<ResourceInventoryItem>,
    pub approvals: Vec<Approval>,
    pub budget: Option<Budget>,
    pub drift_snapshot: Option<DriftSnapshot>,
    pub security_snapshot: Option<SecuritySnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(
        name: impl Into<String>,
        environment: impl Into<String>,
        region: impl Into<String>,
        repository_url: impl Into<String>,
        branch: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Deployment {
            deployment_id: DeploymentId::from(uuid::Uuid::new_v4()),
            name: name.into(),
            description: None,
            environment: environment.into(),
            region: region.into(),
            repository_url: repository_url.into(),
            branch: branch.into(),
            status: DeploymentStatus::Initial,
            status_history: vec![StatusHistoryEntry {
                status: DeploymentStatus::Initial,
                timestamp: now,
                reason: None,
                actor: None,
            }],
            current_source: None,
            version: 0,
            previous_versions: Vec::new(),
            estimate: None,
            actual_cost: None,
            resource_inventory: Vec::new(),
            approvals: Vec::new(),
            budget: None,
            drift_snapshot: None,
            security_snapshot: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advances `status`, appending to `status_history`. The only legal way
    /// to change `status` — keeps the append-only invariant mechanical
    /// rather than relying on callers to maintain it by convention.
    pub fn advance(
        &mut self,
        target: DeploymentStatus,
        now: DateTime<Utc>,
        reason: Option<String>,
        actor: Option<UserId>,
    ) -> Result<(), DomainError> {
        let entry = state_machine::transition(self.status, target, now, reason, actor)?;
        self.status = entry.status;
        self.status_history.push(entry);
        self.updated_at = now;
        Ok(())
    }

    /// Records a new source bundle as the current version, archiving the
    /// prior one. Called on each successful apply per the monotonic
    /// `version` invariant.
    pub fn commit_new_version(&mut self, bundle: IacSourceBundle, now: DateTime<Utc>) {
        if let Some(prev) = self.current_source.take() {
            self.previous_versions.push(IacSourceVersion {
                version: self.version,
                bundle: prev,
                recorded_at: now,
            });
        }
        self.version += 1;
        self.current_source = Some(bundle);
        self.updated_at = now;
    }

    pub fn is_resumable(&self) -> bool {
        self.status.is_resumable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_history_starts_with_initial() {
        let d = Deployment::new("demo", "dev", "us-east-1", "https://example.com/repo.git", "main", Utc::now());
        assert_eq!(d.status_history.len(), 1);
        assert_eq!(d.status_history[0].status, DeploymentStatus::Initial);
        assert_eq!(d.status, DeploymentStatus::Initial);
    }

    #[test]
    fn advance_appends_and_rejects_illegal_targets() {
        let mut d = Deployment::new("demo", "dev", "us-east-1", "https://example.com/repo.git", "main", Utc::now());
        d.advance(DeploymentStatus::Gathering, Utc::now(), None, None).unwrap();
        assert_eq!(d.status, DeploymentStatus::Gathering);
        assert_eq!(d.status_history.last().unwrap().status, d.status);

        let err = d.advance(DeploymentStatus::Deployed, Utc::now(), None, None).unwrap_err();
        assert!(matches!(err, DomainError::IllegalTransition { .. }));
    }

    #[test]
    fn commit_new_version_increments_and_archives() {
        let mut d = Deployment::new("demo", "dev", "us-east-1", "https://example.com/repo.git", "main", Utc::now());
        let bundle = IacSourceBundle {
            main: "main.tf".into(),
            variables: "variables.tf".into(),
            outputs: "outputs.tf".into(),
            providers: "providers.tf".into(),
        };
        d.commit_new_version(bundle.clone(), Utc::now());
        assert_eq!(d.version, 1);
        assert!(d.previous_versions.is_empty());

        d.commit_new_version(bundle, Utc::now());
        assert_eq!(d.version, 2);
        assert_eq!(d.previous_versions.len(), 1);
        assert_eq!(d.previous_versions[0].version, 1);
    }
}
