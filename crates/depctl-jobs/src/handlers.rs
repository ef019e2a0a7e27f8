use std::sync::Arc;

use async_trait::async_trait;
use depctl_domain::{Job, JobKind};
use depctl_iac::{ApplyOptions, LifecycleManager, PlanOptions};
use depctl_store::DeploymentRepository;
use serde::Deserialize;
use serde_json::Value;

use crate::dispatcher::{JobContext, JobHandler};
use crate::error::JobsError;

#[derive(Deserialize, Default)]
struct PlanPayload {
    #[serde(default)]
    options: PlanOptions,
}

#[derive(Deserialize, Default)]
struct ApplyPayload {
    #[serde(default)]
    options: ApplyOptions,
}

#[derive(Deserialize, Default)]
struct DestroyPayload {
    #[serde(default)]
    options: ApplyOptions,
}

/// The C6/C10 → C7 bridge: routes each `JobKind::Iac*` job to the matching
/// `LifecycleManager` call. A successful apply also commits the new source
/// version onto the deployment record, the way `Deployment::commit_new_version`
/// requires a caller to.
pub struct LifecycleJobHandler {
    iac: Arc<LifecycleManager>,
    deployments: Arc<dyn DeploymentRepository>,
}

impl LifecycleJobHandler {
    pub fn new(iac: Arc<LifecycleManager>, deployments: Arc<dyn DeploymentRepository>) -> Self {
        LifecycleJobHandler { iac, deployments }
    }
}

#[async_trait]
impl JobHandler for LifecycleJobHandler {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<Value, JobsError> {
        match job.kind {
            JobKind::IacInit => {
                let result = self.iac.initialize(&job.deployment_id, false).await?;
                ctx.report_progress(100, None).await;
                Ok(serde_json::to_value(result)?)
            }
            JobKind::IacPlan => {
                let payload: PlanPayload = serde_json::from_value(job.payload.clone()).unwrap_or_default();
                let result = self.iac.plan(&job.deployment_id, &payload.options).await?;
                ctx.report_progress(100, None).await;
                Ok(serde_json::to_value(result)?)
            }
            JobKind::IacApply => {
                let payload: ApplyPayload = serde_json::from_value(job.payload.clone()).unwrap_or_default();
                let result = self.iac.apply(&job.deployment_id, &payload.options).await?;

                let bundle = self.iac.read_source_bundle(&job.deployment_id).await?;
                let mut deployment = self
                    .deployments
                    .get(&job.deployment_id)
                    .await?
                    .ok_or_else(|| JobsError::Fatal(format!("unknown deployment: {}", job.deployment_id)))?;
                deployment.commit_new_version(bundle, chrono::Utc::now());
                self.deployments.upsert(&deployment).await?;

                ctx.report_progress(100, None).await;
                Ok(serde_json::to_value(result)?)
            }
            JobKind::IacDestroy => {
                let payload: DestroyPayload = serde_json::from_value(job.payload.clone()).unwrap_or_default();
                let result = self.iac.destroy(&job.deployment_id, &payload.options).await?;
                ctx.report_progress(100, None).await;
                Ok(serde_json::to_value(result)?)
            }
            JobKind::IacValidate | JobKind::SandboxRun => {
                Err(JobsError::Fatal(format!("{:?} has no lifecycle handler", job.kind)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_domain::{Deployment, DeploymentId};
    use depctl_store::InMemoryStore;
    use std::time::Duration;

    use crate::dispatcher::JobDispatcher;

    fn harness(dir: &std::path::Path) -> (JobDispatcher, LifecycleJobHandler, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let iac = Arc::new(LifecycleManager::new(
            dir.to_path_buf(),
            "bucket".to_string(),
            "locks".to_string(),
            "true".to_string(),
            store.clone(),
            store.clone(),
            Duration::from_secs(5),
            1024 * 1024,
        ));
        let dispatcher = JobDispatcher::new(store.clone(), Arc::new(depctl_process::FanOutRegistry::new()));
        let handler = LifecycleJobHandler::new(iac, store.clone());
        (dispatcher, handler, store)
    }

    #[tokio::test]
    async fn successful_apply_commits_a_new_source_version() {
        use depctl_store::DeploymentRepository;

        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, handler, store) = harness(dir.path());

        let deployment = Deployment::new("demo", "dev", "us-east-1", "https://example.com/repo.git", "main", chrono::Utc::now());
        let deployment_id = deployment.deployment_id.clone();
        store.upsert(&deployment).await.unwrap();

        let tree_dir = dir.path().join("terraform").join(deployment_id.as_str());
        tokio::fs::create_dir_all(&tree_dir).await.unwrap();
        tokio::fs::write(tree_dir.join("main.tf"), "terraform {}\nresource \"aws_instance\" \"web\" {}\n").await.unwrap();

        dispatcher.submit(JobKind::IacInit, deployment_id.clone(), serde_json::json!({})).await.unwrap();
        dispatcher.process(JobKind::IacInit, &handler).await.unwrap();

        dispatcher
            .submit(JobKind::IacApply, deployment_id.clone(), serde_json::json!({"options": {"auto_approve": true}}))
            .await
            .unwrap();
        dispatcher.process(JobKind::IacApply, &handler).await.unwrap();

        let updated = store.get(&deployment_id).await.unwrap().unwrap();
        assert_eq!(updated.version, 1);
        assert!(updated.current_source.is_some());
        assert_eq!(updated.current_source.unwrap().main, "terraform {}\nresource \"aws_instance\" \"web\" {}\n");
    }

    #[tokio::test]
    async fn apply_without_init_fails_the_job_rather_than_committing_a_version() {
        use depctl_store::DeploymentRepository;

        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, handler, store) = harness(dir.path());

        let deployment = Deployment::new("demo", "dev", "us-east-1", "https://example.com/repo.git", "main", chrono::Utc::now());
        let deployment_id = deployment.deployment_id.clone();
        store.upsert(&deployment).await.unwrap();

        dispatcher.submit(JobKind::IacApply, deployment_id.clone(), serde_json::json!({})).await.unwrap();
        dispatcher.process(JobKind::IacApply, &handler).await.unwrap();

        let updated = store.get(&deployment_id).await.unwrap().unwrap();
        assert_eq!(updated.version, 0);
    }
}
