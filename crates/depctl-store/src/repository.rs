use async_trait::async_trait;
use depctl_domain::{
    AuditEntry, AuditEntryDraft, CommandHistoryEntry, DeploymentId, Job, JobId, JobKind,
    JobStatus, StageSession, UserId,
};

use crate::error::StoreError;

#[async_trait]
pub trait DeploymentRepository: Send + Sync + 'static {
    async fn get(&self, id: &DeploymentId) -> Result<Option<depctl_domain::Deployment>, StoreError>;
    async fn list(&self) -> Result<Vec<depctl_domain::Deployment>, StoreError>;
    async fn upsert(&self, deployment: &depctl_domain::Deployment) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StageSessionRepository: Send + Sync + 'static {
    async fn get(&self, deployment_id: &DeploymentId) -> Result<Option<StageSession>, StoreError>;
    async fn upsert(&self, deployment_id: &DeploymentId, session: &StageSession) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CommandHistoryRepository: Send + Sync + 'static {
    async fn append(&self, entry: &CommandHistoryEntry) -> Result<(), StoreError>;
    async fn list_for_deployment(&self, deployment_id: &DeploymentId) -> Result<Vec<CommandHistoryEntry>, StoreError>;
}

/// Filter for [`AuditRepository::find`]. `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<UserId>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

#[async_trait]
pub trait AuditRepository: Send + Sync + 'static {
    /// Looks up the most recent entry for `draft.user_id`, links `draft` to
    /// it, persists, and returns the written entry. A missing previous
    /// entry does not fail the write — chaining is best-effort per user.
    async fn append(&self, draft: AuditEntryDraft) -> Result<AuditEntry, StoreError>;

    /// Returns entries matching `filter`, newest first, paginated by
    /// `(page, page_size)` with `page` zero-indexed.
    async fn find(&self, filter: &AuditFilter, page: u32, page_size: u32) -> Result<Vec<AuditEntry>, StoreError>;
}

#[async_trait]
pub trait JobRepository: Send + Sync + 'static {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;
    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError>;
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Leases the oldest `queued` job of `kind`, atomically marking it
    /// `active`, FIFO per kind.
    async fn lease_next(&self, kind: JobKind) -> Result<Option<Job>, StoreError>;

    /// Bounded retained history: `Completed` jobs capped at `keep_completed`,
    /// `Failed` at `keep_failed`, oldest evicted first.
    async fn prune_history(&self, keep_completed: usize, keep_failed: usize) -> Result<(), StoreError>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;
}

/// The object store backing `deployments/{deploymentId}/state.tfstate`.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// A held distributed lock, returned by [`StateLockStore::acquire`]. Dropping
/// it does not release the lock — callers must call `release` explicitly
/// (the lock is held across a process that may crash, so RAII release would
/// be misleading).
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub key: String,
    pub lock_id: String,
}

/// C3: conditional-insert distributed lock over a KV table, keyed by
/// `deployments/{deploymentId}/state-md5` rows.
#[async_trait]
pub trait StateLockStore: Send + Sync + 'static {
    /// Attempts to acquire the lock for `key`. Fails with
    /// `StoreError::LockContended` naming the current holder if already
    /// held.
    async fn acquire(&self, key: &str, who: &str) -> Result<LockHandle, StoreError>;

    /// Releases the lock. `lock_id` must match the holder that acquired it,
    /// except the empty string, which force-releases regardless of holder
    /// — used by the administrative stale-lock override.
    async fn release(&self, key: &str, lock_id: &str) -> Result<(), StoreError>;

    /// Returns the current holder's lock id, if held.
    async fn holder(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Also commands in-flight processing: Command queue execution, which
    /// is separate from the KV table contention above, is serialized
    /// per-deployment by the engine's own async mutex, not stored here.
    async fn acquired_at(&self, key: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>, StoreError>;
}
