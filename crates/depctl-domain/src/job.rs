use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DeploymentId, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    IacInit,
    IacPlan,
    IacApply,
    IacDestroy,
    IacValidate,
    SandboxRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub kind: JobKind,
    pub deployment_id: DeploymentId,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, deployment_id: DeploymentId, payload: serde_json::Value) -> Self {
        Job {
            job_id: JobId::from(uuid::Uuid::new_v4()),
            kind,
            deployment_id,
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: 5,
            backoff_base_ms: 1000,
            last_error: None,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Delay before the next retry attempt, per `backoffBase * 2^(attempts-1)`.
    /// Returns `None` once `attempts` has reached `max_attempts` — the caller
    /// should mark the job permanently `failed` instead of rescheduling.
    pub fn backoff_delay_ms(&self) -> Option<u64> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let exp = self.attempts.saturating_sub(1);
        Some(self.backoff_base_ms.saturating_mul(1u64 << exp.min(32)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let mut j = Job::new(JobKind::IacPlan, DeploymentId::new("d1"), serde_json::json!({}));
        j.attempts = 1;
        assert_eq!(j.backoff_delay_ms(), Some(1000));
        j.attempts = 2;
        assert_eq!(j.backoff_delay_ms(), Some(2000));
        j.attempts = 3;
        assert_eq!(j.backoff_delay_ms(), Some(4000));
    }

    #[test]
    fn no_delay_once_attempts_exhausted() {
        let mut j = Job::new(JobKind::IacApply, DeploymentId::new("d1"), serde_json::json!({}));
        j.attempts = j.max_attempts;
        assert_eq!(j.backoff_delay_ms(), None);
    }
}
