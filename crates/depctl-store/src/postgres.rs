use async_trait::async_trait;
use chrono::Utc;
use depctl_domain::{
    AuditEntry, AuditEntryDraft, CommandHistoryEntry, Deployment, DeploymentId, Job, JobId,
    JobKind, JobStatus, StageSession,
};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::repository::{
    AuditFilter, AuditRepository, CommandHistoryRepository, DeploymentRepository, JobRepository,
    LockHandle, ObjectStore, StageSessionRepository, StateLockStore,
};

// Idempotent DDL, run on every `connect()`. Mirrors the document-store
// collections and KV lock table the persisted-state layout names:
// `deployments`, `stage_sessions`, `command_history`, `audit_logs` (unique
// index on `hash`), `jobs`, plus the object-store and lock-table rows
// collapsed into Postgres tables for the reference backend.
const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS deployments (
    id         TEXT PRIMARY KEY,
    doc        JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS stage_sessions (
    deployment_id TEXT PRIMARY KEY,
    doc           JSONB NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS command_history (
    command_id    TEXT PRIMARY KEY,
    deployment_id TEXT NOT NULL,
    doc           JSONB NOT NULL,
    started_at    TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_command_history_deployment
    ON command_history (deployment_id, started_at);

CREATE TABLE IF NOT EXISTS audit_logs (
    seq           BIGSERIAL PRIMARY KEY,
    user_id       TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id   TEXT,
    hash          TEXT NOT NULL UNIQUE,
    doc           JSONB NOT NULL,
    occurred_at   TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs (user_id, occurred_at DESC);

CREATE TABLE IF NOT EXISTS jobs (
    job_id        TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,
    status        TEXT NOT NULL,
    submitted_seq BIGSERIAL,
    doc           JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_kind_status ON jobs (kind, status, submitted_seq);

CREATE TABLE IF NOT EXISTS state_objects (
    key  TEXT PRIMARY KEY,
    body BYTEA NOT NULL
);

CREATE TABLE IF NOT EXISTS state_locks (
    key       TEXT PRIMARY KEY,
    lock_id   TEXT NOT NULL,
    who       TEXT NOT NULL,
    locked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Persistent store backed by PostgreSQL, implementing every repository
/// trait over JSONB document columns plus a conditional-insert lock table
/// for `StateLockStore`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| StoreError::Internal(format!("postgres connect: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATIONS)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("migration: {e}")))?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(v).map_err(StoreError::Serialization)
}

fn from_json<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(v).map_err(StoreError::Serialization)
}

#[async_trait]
impl DeploymentRepository for PostgresStore {
    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM deployments WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn list(&self) -> Result<Vec<Deployment>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as("SELECT doc FROM deployments")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }

    async fn upsert(&self, deployment: &Deployment) -> Result<(), StoreError> {
        let doc = to_json(deployment)?;
        sqlx::query(
            "INSERT INTO deployments (id, doc) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(deployment.deployment_id.as_str())
        .bind(&doc)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StageSessionRepository for PostgresStore {
    async fn get(&self, deployment_id: &DeploymentId) -> Result<Option<StageSession>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM stage_sessions WHERE deployment_id = $1")
                .bind(deployment_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn upsert(&self, deployment_id: &DeploymentId, session: &StageSession) -> Result<(), StoreError> {
        let doc = to_json(session)?;
        sqlx::query(
            "INSERT INTO stage_sessions (deployment_id, doc) VALUES ($1, $2)
             ON CONFLICT (deployment_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()",
        )
        .bind(deployment_id.as_str())
        .bind(&doc)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CommandHistoryRepository for PostgresStore {
    async fn append(&self, entry: &CommandHistoryEntry) -> Result<(), StoreError> {
        let doc = to_json(entry)?;
        sqlx::query(
            "INSERT INTO command_history (command_id, deployment_id, doc, started_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.command_id.as_str())
        .bind(entry.deployment_id.as_str())
        .bind(&doc)
        .bind(entry.started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn list_for_deployment(&self, deployment_id: &DeploymentId) -> Result<Vec<CommandHistoryEntry>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT doc FROM command_history WHERE deployment_id = $1 ORDER BY started_at",
        )
        .bind(deployment_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }
}

#[async_trait]
impl AuditRepository for PostgresStore {
    async fn append(&self, draft: AuditEntryDraft) -> Result<AuditEntry, StoreError> {
        let previous_hash: Option<(String,)> = sqlx::query_as(
            "SELECT hash FROM audit_logs WHERE user_id = $1 ORDER BY occurred_at DESC LIMIT 1",
        )
        .bind(draft.user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;

        let entry = AuditEntry::next(draft, previous_hash.map(|(h,)| h), Utc::now());
        let doc = to_json(&entry)?;
        sqlx::query(
            "INSERT INTO audit_logs (user_id, resource_type, resource_id, hash, doc, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.user_id.as_str())
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.hash)
        .bind(&doc)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(entry)
    }

    async fn find(&self, filter: &AuditFilter, page: u32, page_size: u32) -> Result<Vec<AuditEntry>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT doc FROM audit_logs
             WHERE ($1::text IS NULL OR user_id = $1)
               AND ($2::text IS NULL OR resource_type = $2)
               AND ($3::text IS NULL OR resource_id = $3)
             ORDER BY occurred_at DESC
             OFFSET $4 LIMIT $5",
        )
        .bind(filter.user_id.as_ref().map(|u| u.as_str().to_string()))
        .bind(filter.resource_type.clone())
        .bind(filter.resource_id.clone())
        .bind((page as i64) * (page_size as i64))
        .bind(page_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }
}

#[async_trait]
impl JobRepository for PostgresStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let doc = to_json(job)?;
        sqlx::query("INSERT INTO jobs (job_id, kind, status, doc) VALUES ($1, $2, $3, $4)")
            .bind(job.job_id.as_str())
            .bind(job_kind_str(job.kind))
            .bind(job_status_str(job.status))
            .bind(&doc)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM jobs WHERE job_id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let doc = to_json(job)?;
        sqlx::query(
            "UPDATE jobs SET status = $2, doc = $3 WHERE job_id = $1",
        )
        .bind(job.job_id.as_str())
        .bind(job_status_str(job.status))
        .bind(&doc)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn lease_next(&self, kind: JobKind) -> Result<Option<Job>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Internal(e.to_string()))?;
        let row: Option<(String, serde_json::Value)> = sqlx::query_as(
            "SELECT job_id, doc FROM jobs
             WHERE kind = $1 AND status = 'queued'
             ORDER BY submitted_seq
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(job_kind_str(kind))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;

        let Some((job_id, doc)) = row else {
            tx.commit().await.ok();
            return Ok(None);
        };
        let mut job: Job = from_json(doc)?;
        job.status = JobStatus::Active;
        job.started_at = Some(Utc::now());
        let updated = to_json(&job)?;
        sqlx::query("UPDATE jobs SET status = 'active', doc = $2 WHERE job_id = $1")
            .bind(&job_id)
            .bind(&updated)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        tx.commit().await.map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(Some(job))
    }

    async fn prune_history(&self, keep_completed: usize, keep_failed: usize) -> Result<(), StoreError> {
        for (status, keep) in [("completed", keep_completed), ("failed", keep_failed)] {
            sqlx::query(
                "DELETE FROM jobs WHERE job_id IN (
                     SELECT job_id FROM jobs WHERE status = $1
                     ORDER BY submitted_seq DESC OFFSET $2
                 )",
            )
            .bind(status)
            .bind(keep as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM jobs WHERE status = $1 ORDER BY submitted_seq")
                .bind(job_status_str(status))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }
}

fn job_kind_str(kind: JobKind) -> &'static str {
    match kind {
        JobKind::IacInit => "iac_init",
        JobKind::IacPlan => "iac_plan",
        JobKind::IacApply => "iac_apply",
        JobKind::IacDestroy => "iac_destroy",
        JobKind::IacValidate => "iac_validate",
        JobKind::SandboxRun => "sandbox_run",
    }
}

fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Active => "active",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

#[async_trait]
impl ObjectStore for PostgresStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT body FROM state_objects WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(row.map(|(b,)| b))
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO state_objects (key, body) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(key)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM state_objects WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StateLockStore for PostgresStore {
    async fn acquire(&self, key: &str, who: &str) -> Result<LockHandle, StoreError> {
        let lock_id = uuid::Uuid::new_v4().to_string();
        // Conditional insert — the same technique Terraform's own HTTP/S3
        // backends use for `LockID` rows, generalized to our lock table.
        let result = sqlx::query(
            "INSERT INTO state_locks (key, lock_id, who) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(&lock_id)
        .bind(who)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;

        if result.rows_affected() == 0 {
            let holder: (String,) = sqlx::query_as("SELECT who FROM state_locks WHERE key = $1")
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            return Err(StoreError::LockContended { holder: holder.0 });
        }
        Ok(LockHandle { key: key.to_string(), lock_id })
    }

    async fn release(&self, key: &str, lock_id: &str) -> Result<(), StoreError> {
        if lock_id.is_empty() {
            sqlx::query("DELETE FROM state_locks WHERE key = $1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        } else {
            sqlx::query("DELETE FROM state_locks WHERE key = $1 AND lock_id = $2")
                .bind(key)
                .bind(lock_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    async fn holder(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT who FROM state_locks WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(row.map(|(w,)| w))
    }

    async fn acquired_at(&self, key: &str) -> Result<Option<chrono::DateTime<Utc>>, StoreError> {
        let row: Option<(chrono::DateTime<Utc>,)> =
            sqlx::query_as("SELECT locked_at FROM state_locks WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(row.map(|(t,)| t))
    }
}

// Integration tests require a live database and are gated behind
// `TEST_POSTGRES_URL`.
#[cfg(test)]
mod tests {
    use super::*;

    fn test_url() -> Option<String> {
        std::env::var("TEST_POSTGRES_URL").ok()
    }

    #[tokio::test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    async fn lock_conflict_then_force_unlock() {
        let url = test_url().expect("set TEST_POSTGRES_URL to run");
        let store = PostgresStore::connect(&url).await.unwrap();
        let key = format!("deployments/{}/state-md5", uuid::Uuid::new_v4());

        let h = store.acquire(&key, "worker-a").await.unwrap();
        let err = store.acquire(&key, "worker-b").await.unwrap_err();
        assert!(matches!(err, StoreError::LockContended { holder } if holder == "worker-a"));

        store.release(&key, "").await.unwrap();
        assert!(store.acquire(&key, "worker-b").await.is_ok());
        let _ = h;
    }
}
