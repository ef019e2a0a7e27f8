use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use depctl_domain::{Job, JobId, JobKind, JobStatus};
use depctl_process::{CorrelationKey, FanOutRegistry, StreamEvent};
use depctl_store::JobRepository;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::JobsError;

const KEEP_COMPLETED: usize = 100;
const KEEP_FAILED: usize = 500;

pub struct JobContext {
    pub cancel: CancellationToken,
    key: CorrelationKey,
    registry: Arc<FanOutRegistry>,
}

impl JobContext {
    /// Publishes a progress update (0..100) to subscribers of this job's
    /// fan-out channel, the same mechanism the Process Runner uses.
    pub async fn report_progress(&self, percent: u8, message: Option<String>) {
        self.registry
            .publish(&self.key, StreamEvent::Progress { percent, message, at: Utc::now() })
            .await;
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<Value, JobsError>;
}

/// C10: persistent job queue with exponential backoff and bounded history
/// retention, backed by any `JobRepository`. Progress is published through
/// the same `FanOutRegistry` the Process Runner streams subprocess output
/// over, keyed by `("job", jobId)`.
pub struct JobDispatcher {
    repo: Arc<dyn JobRepository>,
    registry: Arc<FanOutRegistry>,
    in_flight: Mutex<HashMap<JobId, CancellationToken>>,
}

impl JobDispatcher {
    pub fn new(repo: Arc<dyn JobRepository>, registry: Arc<FanOutRegistry>) -> Self {
        JobDispatcher { repo, registry, in_flight: Mutex::new(HashMap::new()) }
    }

    pub async fn submit(&self, kind: JobKind, deployment_id: depctl_domain::DeploymentId, payload: Value) -> Result<JobId, JobsError> {
        let job = Job::new(kind, deployment_id, payload);
        let job_id = job.job_id.clone();
        self.repo.insert(&job).await?;
        Ok(job_id)
    }

    /// Leases the oldest queued job of `kind` and runs it to completion
    /// through `handler`. On handler failure, retries with exponential
    /// backoff while attempts remain, otherwise marks the job `failed`.
    /// Returns `Ok(None)` if no job of `kind` was queued.
    pub async fn process(&self, kind: JobKind, handler: &dyn JobHandler) -> Result<Option<JobId>, JobsError> {
        let Some(mut job) = self.repo.lease_next(kind).await? else {
            return Ok(None);
        };
        let job_id = job.job_id.clone();

        let cancel = CancellationToken::new();
        self.in_flight.lock().await.insert(job_id.clone(), cancel.clone());

        let key = CorrelationKey::new("job", job_id.as_str());
        let ctx = JobContext { cancel: cancel.clone(), key: key.clone(), registry: self.registry.clone() };

        job.attempts += 1;
        job.started_at = Some(Utc::now());

        let outcome = handler.handle(&job, &ctx).await;
        self.in_flight.lock().await.remove(&job_id);

        match outcome {
            Ok(result) => {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.completed_at = Some(Utc::now());
                self.repo.update(&job).await?;
                self.registry
                    .publish(&key, StreamEvent::End { exit_code: 0, final_output: String::new(), at: Utc::now() })
                    .await;
                self.registry.retire(&key).await;
            }
            Err(e) => {
                job.last_error = Some(e.to_string());
                match job.backoff_delay_ms() {
                    Some(delay_ms) if !cancel.is_cancelled() => {
                        // Stays `Active` (not re-lease-able) through the backoff
                        // window; only the spawned task below flips it back to
                        // `Queued`, once the delay has actually elapsed.
                        info!(job_id = %job_id, attempts = job.attempts, delay_ms, "job failed, scheduling retry");
                        self.repo.update(&job).await?;
                        let repo = self.repo.clone();
                        let mut job_for_retry = job.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                            job_for_retry.status = JobStatus::Queued;
                            if let Err(e) = repo.update(&job_for_retry).await {
                                warn!(error = %e, "failed to re-queue job after backoff");
                            }
                        });
                    }
                    _ => {
                        job.status = JobStatus::Failed;
                        job.completed_at = Some(Utc::now());
                        warn!(job_id = %job_id, error = %e, "job failed permanently");
                        self.repo.update(&job).await?;
                        self.registry
                            .publish(&key, StreamEvent::Error { message: e.to_string(), at: Utc::now() })
                            .await;
                        self.registry.retire(&key).await;
                    }
                }
            }
        }

        self.repo.prune_history(KEEP_COMPLETED, KEEP_FAILED).await?;
        Ok(Some(job_id))
    }

    /// If `job_id` is currently leased, signals its cancellation token. If
    /// merely queued, marks it `cancelled` in the repository.
    pub async fn cancel(&self, job_id: &JobId) -> Result<(), JobsError> {
        if let Some(token) = self.in_flight.lock().await.get(job_id) {
            token.cancel();
            return Ok(());
        }
        if let Some(mut job) = self.repo.get(job_id).await? {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                self.repo.update(&job).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_store::InMemoryStore;

    struct AlwaysFails;
    #[async_trait]
    impl JobHandler for AlwaysFails {
        async fn handle(&self, _job: &Job, _ctx: &JobContext) -> Result<Value, JobsError> {
            Err(JobsError::Fatal("boom".into()))
        }
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl JobHandler for AlwaysSucceeds {
        async fn handle(&self, _job: &Job, _ctx: &JobContext) -> Result<Value, JobsError> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    fn dispatcher() -> (JobDispatcher, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (JobDispatcher::new(store.clone(), Arc::new(FanOutRegistry::new())), store)
    }

    #[tokio::test]
    async fn successful_job_is_marked_completed() {
        let (dispatcher, store) = dispatcher();
        let job_id = dispatcher
            .submit(JobKind::IacPlan, depctl_domain::DeploymentId::new("d1"), serde_json::json!({}))
            .await
            .unwrap();

        dispatcher.process(JobKind::IacPlan, &AlwaysSucceeds).await.unwrap();

        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn process_returns_none_when_queue_empty() {
        let (dispatcher, _store) = dispatcher();
        let leased = dispatcher.process(JobKind::IacApply, &AlwaysSucceeds).await.unwrap();
        assert!(leased.is_none());
    }

    #[tokio::test]
    async fn cancel_queued_job_marks_it_cancelled() {
        let (dispatcher, store) = dispatcher();
        let job_id = dispatcher
            .submit(JobKind::SandboxRun, depctl_domain::DeploymentId::new("d1"), serde_json::json!({}))
            .await
            .unwrap();

        dispatcher.cancel(&job_id).await.unwrap();
        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn failing_job_with_attempts_remaining_is_requeued() {
        let (dispatcher, store) = dispatcher();
        let job_id = dispatcher
            .submit(JobKind::IacDestroy, depctl_domain::DeploymentId::new("d1"), serde_json::json!({}))
            .await
            .unwrap();

        dispatcher.process(JobKind::IacDestroy, &AlwaysFails).await.unwrap();

        let job = store.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert!(job.last_error.is_some());
    }
}
