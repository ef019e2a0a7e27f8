use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use depctl_ai::{DeploymentAi, HttpDeploymentAi};
use depctl_audit::AuditLog;
use depctl_commands::CommandQueueService;
use depctl_config::EngineConfig;
use depctl_iac::LifecycleManager;
use depctl_jobs::{JobDispatcher, LifecycleJobHandler};
use depctl_orchestrator::Orchestrator;
use depctl_process::FanOutRegistry;
use depctl_store::PostgresStore;

/// Bundles the engine's components for the CLI's in-process handle — the
/// same wiring a server process would do, minus the HTTP/WebSocket surface
/// that's out of scope for this crate.
pub struct Engine {
    pub config: EngineConfig,
    pub store: Arc<PostgresStore>,
    pub commands: Arc<CommandQueueService>,
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: Arc<JobDispatcher>,
    pub lifecycle_handler: Arc<LifecycleJobHandler>,
    pub audit: Arc<AuditLog>,
}

impl Engine {
    pub async fn bootstrap() -> Result<Self> {
        let config = EngineConfig::load_from_env().context("failed to load engine configuration")?;
        let store = Arc::new(
            PostgresStore::connect(&config.document_store_uri)
                .await
                .with_context(|| format!("failed to connect to document store at {}", config.document_store_uri))?,
        );

        let commands = Arc::new(CommandQueueService::new(store.clone(), config.process_timeout, config.process_output_cap_bytes));
        let iac = Arc::new(LifecycleManager::new(
            config.working_tree_root.clone(),
            config.state_bucket.clone(),
            config.lock_table.clone(),
            "terraform".to_string(),
            store.clone(),
            store.clone(),
            config.process_timeout,
            config.process_output_cap_bytes,
        ));
        let ai: Arc<dyn DeploymentAi> = Arc::new(HttpDeploymentAi::new(config.ai_base_url.clone(), config.ai_api_key.clone()));
        let audit = Arc::new(AuditLog::new(store.clone(), config.audit_append_timeout));
        let registry = Arc::new(FanOutRegistry::new());
        let jobs = Arc::new(JobDispatcher::new(store.clone(), registry));
        let lifecycle_handler = Arc::new(LifecycleJobHandler::new(iac.clone(), store.clone()));

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            store.clone(),
            commands.clone(),
            iac,
            ai,
            audit.clone(),
            credentials_env(&config),
        ));

        Ok(Engine { config, store, commands, orchestrator, jobs, lifecycle_handler, audit })
    }
}

/// The environment handed to every shelled-out command: cloud credentials
/// plus the target region, matching what a `terraform`/`aws` invocation
/// expects to find.
fn credentials_env(config: &EngineConfig) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("AWS_ACCESS_KEY_ID".to_string(), config.cloud_credentials.access_key_id.clone());
    env.insert("AWS_SECRET_ACCESS_KEY".to_string(), config.cloud_credentials.secret_access_key.clone());
    env.insert("AWS_DEFAULT_REGION".to_string(), config.cloud_region.clone());
    env
}
