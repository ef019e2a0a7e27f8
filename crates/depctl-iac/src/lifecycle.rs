use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use depctl_domain::deployment::IacSourceBundle;
use depctl_domain::DeploymentId;
use depctl_store::{ObjectStore, StateLockStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::IacError;
use crate::parse::{
    parse_change_counts, parse_created_resources_apply, parse_created_resources_plan, ChangeCounts,
    ResourceRef,
};
use crate::tree::{self, write_atomic};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateResult {
    pub valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    pub cached: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanOptions {
    pub var_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_text: String,
    pub changes: ChangeCounts,
    pub resources: Vec<ResourceRef>,
    pub plan_file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOptions {
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub output: String,
    pub resources: Vec<ResourceRef>,
    pub state: Option<Vec<u8>>,
}

const MARKER_DIR: &str = ".initState";
const PLAN_FILE: &str = "tfplan";
const LOCK_TTL_SECS: i64 = 900;

/// C7: single-deployment serialized `validate`/`writeAndFormat`/`initialize`/
/// `plan`/`apply`/`destroy`/`getState`, built directly on `depctl-process`
/// for subprocess execution and `depctl-store` for the state lock and the
/// state blob.
pub struct LifecycleManager {
    pub working_tree_root: PathBuf,
    pub state_bucket: String,
    pub lock_table: String,
    pub binary: String,
    pub lock_store: Arc<dyn StateLockStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub process_timeout: Duration,
    pub output_cap_bytes: usize,
    initialized: Mutex<HashSet<DeploymentId>>,
}

impl LifecycleManager {
    pub fn new(
        working_tree_root: PathBuf,
        state_bucket: String,
        lock_table: String,
        binary: String,
        lock_store: Arc<dyn StateLockStore>,
        object_store: Arc<dyn ObjectStore>,
        process_timeout: Duration,
        output_cap_bytes: usize,
    ) -> Self {
        LifecycleManager {
            working_tree_root,
            state_bucket,
            lock_table,
            binary,
            lock_store,
            object_store,
            process_timeout,
            output_cap_bytes,
            initialized: Mutex::new(HashSet::new()),
        }
    }

    fn tree_dir(&self, deployment_id: &DeploymentId) -> PathBuf {
        tree::working_tree_dir(&self.working_tree_root, deployment_id)
    }

    fn lock_key(&self, deployment_id: &DeploymentId) -> String {
        format!("deployments/{deployment_id}/state-md5")
    }

    fn state_key(&self, deployment_id: &DeploymentId) -> String {
        format!("deployments/{deployment_id}/state.tfstate")
    }

    async fn run(&self, deployment_id: &DeploymentId, args: &str) -> Result<depctl_process::RunResult, IacError> {
        let workdir = self.tree_dir(deployment_id);
        let cmd = format!("{} {}", self.binary, args);
        Ok(depctl_process::run(
            &cmd,
            &workdir,
            &HashMap::new(),
            self.process_timeout,
            Some(self.output_cap_bytes),
            CancellationToken::new(),
        )
        .await?)
    }

    /// §4.2 pre-check plus an optional `validate` subprocess call.
    pub async fn validate(&self, files: &BTreeMap<String, String>) -> ValidateResult {
        let issues = tree::precheck(files);
        if !issues.is_empty() {
            return ValidateResult { valid: false, issues };
        }
        ValidateResult { valid: true, issues: Vec::new() }
    }

    pub async fn write_and_format(
        &self,
        deployment_id: &DeploymentId,
        files: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, IacError> {
        write_atomic(&self.working_tree_root, deployment_id, files, &self.state_bucket, &self.lock_table, &self.binary).await
    }

    /// Memoized in-process (and cross-process via the `.initState` marker
    /// file) — a repeat call with `force=false` after a successful
    /// initialize is a no-op.
    pub async fn initialize(&self, deployment_id: &DeploymentId, force: bool) -> Result<InitializeResult, IacError> {
        let marker = self.tree_dir(deployment_id).join(MARKER_DIR);

        if !force {
            if self.initialized.lock().await.contains(deployment_id) || marker.exists() {
                self.initialized.lock().await.insert(deployment_id.clone());
                return Ok(InitializeResult { cached: true });
            }
        }

        let result = self.run(deployment_id, "init -no-color -input=false").await?;
        if result.exit_code != 0 {
            return Err(IacError::SubprocessFailed(format!("terraform init exited {}", result.exit_code)));
        }

        tokio::fs::create_dir_all(&marker).await?;
        self.initialized.lock().await.insert(deployment_id.clone());
        Ok(InitializeResult { cached: false })
    }

    /// Acquires the state lock with purpose `plan`, runs
    /// `plan -out=tfplan`, parses counts and created-resource tuples, and
    /// releases the lock on every exit path.
    pub async fn plan(&self, deployment_id: &DeploymentId, options: &PlanOptions) -> Result<PlanResult, IacError> {
        let lock = self.acquire_lock(deployment_id, "plan").await?;
        let result = self.plan_inner(deployment_id, options).await;
        self.release_lock(deployment_id, &lock.lock_id).await;
        result
    }

    async fn plan_inner(&self, deployment_id: &DeploymentId, options: &PlanOptions) -> Result<PlanResult, IacError> {
        let mut args = format!("plan -out={PLAN_FILE} -no-color -input=false");
        if let Some(var_file) = &options.var_file {
            args.push_str(&format!(" -var-file={var_file}"));
        }
        let result = self.run(deployment_id, &args).await?;
        if result.exit_code != 0 && result.exit_code != 2 {
            // terraform plan uses exit code 2 to mean "succeeded with changes"
            return Err(IacError::SubprocessFailed(format!("terraform plan exited {}", result.exit_code)));
        }

        let changes = parse_change_counts(&result.stdout);
        let resources = parse_created_resources_plan(&result.stdout);
        Ok(PlanResult { plan_text: result.stdout, changes, resources, plan_file: PLAN_FILE.to_string() })
    }

    /// Requires a prior `initialize`. Runs `plan` implicitly if no plan file
    /// is present. Acquires the state lock with purpose `apply`, invokes
    /// `apply tfplan`, parses created-resource lines, and fetches the
    /// resulting state blob.
    pub async fn apply(&self, deployment_id: &DeploymentId, options: &ApplyOptions) -> Result<ApplyResult, IacError> {
        if !self.initialized.lock().await.contains(deployment_id) {
            return Err(IacError::NotInitialized("apply"));
        }

        let plan_file = self.tree_dir(deployment_id).join(PLAN_FILE);
        if !plan_file.exists() {
            self.plan(deployment_id, &PlanOptions { var_file: None }).await?;
        }

        let lock = self.acquire_lock(deployment_id, "apply").await?;
        let result = self.apply_inner(deployment_id, options).await;
        self.release_lock(deployment_id, &lock.lock_id).await;
        result
    }

    async fn apply_inner(&self, deployment_id: &DeploymentId, options: &ApplyOptions) -> Result<ApplyResult, IacError> {
        let approve = if options.auto_approve { " -auto-approve" } else { "" };
        let args = format!("apply{approve} -no-color {PLAN_FILE}");
        let result = self.run(deployment_id, &args).await?;
        if result.exit_code != 0 {
            return Err(IacError::SubprocessFailed(format!("terraform apply exited {}", result.exit_code)));
        }

        let resources = parse_created_resources_apply(&result.stdout);
        let state = self.object_store.get(&self.state_key(deployment_id)).await?;

        Ok(ApplyResult { output: result.stdout, resources, state })
    }

    /// Symmetric to `apply` with the `destroy` verb.
    pub async fn destroy(&self, deployment_id: &DeploymentId, options: &ApplyOptions) -> Result<ApplyResult, IacError> {
        let lock = self.acquire_lock(deployment_id, "destroy").await?;
        let result = self.destroy_inner(deployment_id, options).await;
        self.release_lock(deployment_id, &lock.lock_id).await;
        result
    }

    async fn destroy_inner(&self, deployment_id: &DeploymentId, options: &ApplyOptions) -> Result<ApplyResult, IacError> {
        let approve = if options.auto_approve { " -auto-approve" } else { "" };
        let args = format!("destroy{approve} -no-color");
        let result = self.run(deployment_id, &args).await?;
        if result.exit_code != 0 {
            return Err(IacError::SubprocessFailed(format!("terraform destroy exited {}", result.exit_code)));
        }
        let resources = parse_created_resources_apply(&result.stdout);
        let state = self.object_store.get(&self.state_key(deployment_id)).await?;
        Ok(ApplyResult { output: result.stdout, resources, state })
    }

    pub async fn get_state(&self, deployment_id: &DeploymentId) -> Result<Option<Vec<u8>>, IacError> {
        Ok(self.object_store.get(&self.state_key(deployment_id)).await?)
    }

    /// Reads the four well-known source files back out of the working tree,
    /// for archiving into `Deployment.current_source` after a successful
    /// apply. Missing files read as empty strings rather than failing — a
    /// deployment need not use every file.
    pub async fn read_source_bundle(&self, deployment_id: &DeploymentId) -> Result<IacSourceBundle, IacError> {
        let dir = self.tree_dir(deployment_id);
        let read = |name: &'static str| {
            let path = dir.join(name);
            async move { tokio::fs::read_to_string(&path).await.unwrap_or_default() }
        };
        Ok(IacSourceBundle {
            main: read("main.tf").await,
            variables: read("variables.tf").await,
            outputs: read("outputs.tf").await,
            providers: read("providers.tf").await,
        })
    }

    async fn acquire_lock(
        &self,
        deployment_id: &DeploymentId,
        purpose: &str,
    ) -> Result<depctl_store::LockHandle, IacError> {
        let key = self.lock_key(deployment_id);
        let who = format!("lifecycle:{purpose}");
        self.lock_store.acquire(&key, &who).await.map_err(|e| match e {
            depctl_store::StoreError::LockContended { holder } => IacError::LockContended { holder },
            other => IacError::Store(other),
        })
    }

    async fn release_lock(&self, deployment_id: &DeploymentId, lock_id: &str) {
        let key = self.lock_key(deployment_id);
        if let Err(e) = self.lock_store.release(&key, lock_id).await {
            warn!(error = %e, %key, "failed to release state lock");
        }
    }

    /// Administrative override: forcibly releases a lock older than
    /// `LOCK_TTL_SECS`, regardless of holder. The caller is responsible for
    /// writing the resulting audit entry.
    pub async fn force_unlock_if_stale(&self, deployment_id: &DeploymentId) -> Result<bool, IacError> {
        let key = self.lock_key(deployment_id);
        let Some(acquired_at) = self.lock_store.acquired_at(&key).await? else {
            return Ok(false);
        };
        let age = chrono::Utc::now().signed_duration_since(acquired_at);
        if age.num_seconds() < LOCK_TTL_SECS {
            return Ok(false);
        }
        info!(%key, age_secs = age.num_seconds(), "force-releasing stale state lock");
        self.lock_store.release(&key, "").await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_store::InMemoryStore;

    fn manager(dir: &Path) -> LifecycleManager {
        let store = Arc::new(InMemoryStore::new());
        LifecycleManager::new(
            dir.to_path_buf(),
            "bucket".to_string(),
            "locks".to_string(),
            "true".to_string(),
            store.clone(),
            store,
            Duration::from_secs(5),
            1024 * 1024,
        )
    }

    #[tokio::test]
    async fn apply_before_initialize_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let deployment_id = DeploymentId::new("d1");
        let err = mgr.apply(&deployment_id, &ApplyOptions::default()).await.unwrap_err();
        assert!(matches!(err, IacError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn initialize_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let deployment_id = DeploymentId::new("d1");
        tokio::fs::create_dir_all(mgr.tree_dir(&deployment_id)).await.unwrap();

        let first = mgr.initialize(&deployment_id, false).await.unwrap();
        assert!(!first.cached);
        let second = mgr.initialize(&deployment_id, false).await.unwrap();
        assert!(second.cached);
    }

    #[tokio::test]
    async fn force_unlock_noop_when_not_held() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let deployment_id = DeploymentId::new("d1");
        assert!(!mgr.force_unlock_if_stale(&deployment_id).await.unwrap());
    }
}
