use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use depctl_domain::{
    AuditEntry, AuditEntryDraft, CommandHistoryEntry, Deployment, DeploymentId, Job, JobId,
    JobKind, JobStatus, StageSession, UserId,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::repository::{
    AuditFilter, AuditRepository, CommandHistoryRepository, DeploymentRepository, JobRepository,
    LockHandle, ObjectStore, StageSessionRepository, StateLockStore,
};

#[derive(Debug, Default)]
struct Inner {
    deployments: HashMap<DeploymentId, Deployment>,
    stage_sessions: HashMap<DeploymentId, StageSession>,
    command_history: Vec<CommandHistoryEntry>,
    jobs: HashMap<JobId, Job>,
    job_submission_order: Vec<JobId>,
    audit_entries: Vec<AuditEntry>,
    objects: HashMap<String, Vec<u8>>,
    locks: HashMap<String, (String, chrono::DateTime<Utc>)>,
}

/// In-memory implementation of every `depctl-store` repository trait.
///
/// All data is lost on process exit. Used by tests and by the CLI's
/// `--local` mode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryStore {
    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError> {
        Ok(self.inner.read().await.deployments.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Deployment>, StoreError> {
        Ok(self.inner.read().await.deployments.values().cloned().collect())
    }

    async fn upsert(&self, deployment: &Deployment) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .deployments
            .insert(deployment.deployment_id.clone(), deployment.clone());
        Ok(())
    }
}

#[async_trait]
impl StageSessionRepository for InMemoryStore {
    async fn get(&self, deployment_id: &DeploymentId) -> Result<Option<StageSession>, StoreError> {
        Ok(self.inner.read().await.stage_sessions.get(deployment_id).cloned())
    }

    async fn upsert(&self, deployment_id: &DeploymentId, session: &StageSession) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .stage_sessions
            .insert(deployment_id.clone(), session.clone());
        Ok(())
    }
}

#[async_trait]
impl CommandHistoryRepository for InMemoryStore {
    async fn append(&self, entry: &CommandHistoryEntry) -> Result<(), StoreError> {
        self.inner.write().await.command_history.push(entry.clone());
        Ok(())
    }

    async fn list_for_deployment(&self, deployment_id: &DeploymentId) -> Result<Vec<CommandHistoryEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .command_history
            .iter()
            .filter(|e| &e.deployment_id == deployment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditRepository for InMemoryStore {
    async fn append(&self, draft: AuditEntryDraft) -> Result<AuditEntry, StoreError> {
        let mut guard = self.inner.write().await;
        let previous_hash = guard
            .audit_entries
            .iter()
            .rev()
            .find(|e| e.user_id == draft.user_id)
            .map(|e| e.hash.clone());
        let entry = AuditEntry::next(draft, previous_hash, Utc::now());
        guard.audit_entries.push(entry.clone());
        Ok(entry)
    }

    async fn find(&self, filter: &AuditFilter, page: u32, page_size: u32) -> Result<Vec<AuditEntry>, StoreError> {
        let guard = self.inner.read().await;
        let mut matched: Vec<AuditEntry> = guard
            .audit_entries
            .iter()
            .filter(|e| filter.user_id.as_ref().map_or(true, |u| &e.user_id == u))
            .filter(|e| filter.resource_type.as_ref().map_or(true, |t| &e.resource_type == t))
            .filter(|e| {
                filter
                    .resource_id
                    .as_ref()
                    .map_or(true, |r| e.resource_id.as_deref() == Some(r.as_str()))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let start = (page as usize) * (page_size as usize);
        Ok(matched.into_iter().skip(start).take(page_size as usize).collect())
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.jobs.insert(job.job_id.clone(), job.clone());
        guard.job_submission_order.push(job.job_id.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().await.jobs.get(id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.write().await.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn lease_next(&self, kind: JobKind) -> Result<Option<Job>, StoreError> {
        let mut guard = self.inner.write().await;
        let next_id = guard
            .job_submission_order
            .iter()
            .find(|id| {
                guard
                    .jobs
                    .get(*id)
                    .map(|j| j.kind == kind && j.status == JobStatus::Queued)
                    .unwrap_or(false)
            })
            .cloned();
        let Some(next_id) = next_id else { return Ok(None) };
        let job = guard.jobs.get_mut(&next_id).expect("id came from the map");
        job.status = JobStatus::Active;
        job.started_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn prune_history(&self, keep_completed: usize, keep_failed: usize) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        prune_by_status(&mut guard.jobs, JobStatus::Completed, keep_completed);
        prune_by_status(&mut guard.jobs, JobStatus::Failed, keep_failed);
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }
}

fn prune_by_status(jobs: &mut HashMap<JobId, Job>, status: JobStatus, keep: usize) {
    let mut matching: Vec<(JobId, chrono::DateTime<Utc>)> = jobs
        .values()
        .filter(|j| j.status == status)
        .map(|j| (j.job_id.clone(), j.completed_at.unwrap_or_else(Utc::now)))
        .collect();
    if matching.len() <= keep {
        return;
    }
    matching.sort_by_key(|(_, ts)| *ts);
    let remove_count = matching.len() - keep;
    for (id, _) in matching.into_iter().take(remove_count) {
        jobs.remove(&id);
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().await.objects.get(key).cloned())
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.inner.write().await.objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.write().await.objects.remove(key);
        Ok(())
    }
}

#[async_trait]
impl StateLockStore for InMemoryStore {
    async fn acquire(&self, key: &str, who: &str) -> Result<LockHandle, StoreError> {
        let mut guard = self.inner.write().await;
        if let Some((holder, _)) = guard.locks.get(key) {
            return Err(StoreError::LockContended { holder: holder.clone() });
        }
        let lock_id = uuid::Uuid::new_v4().to_string();
        guard.locks.insert(key.to_string(), (lock_id.clone(), Utc::now()));
        let _ = who;
        Ok(LockHandle { key: key.to_string(), lock_id })
    }

    async fn release(&self, key: &str, lock_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if lock_id.is_empty() {
            guard.locks.remove(key);
            return Ok(());
        }
        if let Some((holder, _)) = guard.locks.get(key) {
            if holder == lock_id {
                guard.locks.remove(key);
            }
        }
        Ok(())
    }

    async fn holder(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.locks.get(key).map(|(h, _)| h.clone()))
    }

    async fn acquired_at(&self, key: &str) -> Result<Option<chrono::DateTime<Utc>>, StoreError> {
        Ok(self.inner.read().await.locks.get(key).map(|(_, t)| *t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_domain::ids::UserId as Uid;

    #[tokio::test]
    async fn deployment_upsert_and_get() {
        let store = InMemoryStore::new();
        let d = Deployment::new("demo", "dev", "us-east-1", "https://x/repo.git", "main", Utc::now());
        DeploymentRepository::upsert(&store, &d).await.unwrap();
        let got = DeploymentRepository::get(&store, &d.deployment_id).await.unwrap();
        assert_eq!(got.unwrap().name, "demo");
    }

    #[tokio::test]
    async fn lock_contended_then_released() {
        let store = InMemoryStore::new();
        let h = store.acquire("deployments/d1/state-md5", "worker-a").await.unwrap();
        let err = store.acquire("deployments/d1/state-md5", "worker-b").await.unwrap_err();
        assert!(matches!(err, StoreError::LockContended { .. }));
        store.release(&h.key, &h.lock_id).await.unwrap();
        assert!(store.acquire("deployments/d1/state-md5", "worker-b").await.is_ok());
    }

    #[tokio::test]
    async fn force_unlock_ignores_holder() {
        let store = InMemoryStore::new();
        store.acquire("k", "worker-a").await.unwrap();
        store.release("k", "").await.unwrap();
        assert!(store.holder("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn audit_chain_links_per_user() {
        let store = InMemoryStore::new();
        let draft = |action: &str| AuditEntryDraft {
            user_id: Uid::new("u1"),
            action: action.into(),
            resource_type: "deployment".into(),
            resource_id: Some("d1".into()),
            previous_state: None,
            new_state: None,
            details: None,
        };
        let e1 = AuditRepository::append(&store, draft("create")).await.unwrap();
        let e2 = AuditRepository::append(&store, draft("approve")).await.unwrap();
        assert_eq!(e1.previous_hash, "");
        assert_eq!(e2.previous_hash, e1.hash);
    }

    #[tokio::test]
    async fn job_lease_is_fifo_per_kind() {
        let store = InMemoryStore::new();
        let j1 = Job::new(JobKind::IacPlan, DeploymentId::new("d1"), serde_json::json!({}));
        let j2 = Job::new(JobKind::IacPlan, DeploymentId::new("d2"), serde_json::json!({}));
        store.insert(&j1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.insert(&j2).await.unwrap();

        let leased = JobRepository::lease_next(&store, JobKind::IacPlan).await.unwrap().unwrap();
        assert_eq!(leased.job_id, j1.job_id);
        assert_eq!(leased.status, JobStatus::Active);
    }
}
