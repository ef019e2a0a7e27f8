use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use depctl_domain::{CommandId, Deployment, DeploymentId, DeploymentStatus, JobKind, UserId};
use depctl_store::DeploymentRepository;

use crate::cli::{DeploymentsCommand, Ec2Command};
use crate::engine::Engine;
use crate::error::CliError;
use crate::output;

// ── Auth ─────────────────────────────────────────────────────────────────────
//
// There is no identity provider in scope — callers are pre-authorized;
// `login`/`logout`/`whoami` just manage an opaque bearer token cached on
// disk, with no remote round trip to validate it against.

pub fn login(token: String) -> Result<()> {
    let path = token_path();
    write_token(&path, &token)?;
    println!("Saved token to {}", path.display());
    Ok(())
}

pub fn logout() -> Result<()> {
    let path = token_path();
    if path.exists() {
        std::fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    println!("Logged out.");
    Ok(())
}

pub fn whoami() -> Result<()> {
    let token = read_token()?;
    let masked = mask(&token);
    println!("Authenticated with token {masked}");
    Ok(())
}

fn token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".depctl").join("token")
}

fn write_token(path: &PathBuf, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, token)?;
    Ok(())
}

fn read_token() -> Result<String, CliError> {
    std::fs::read_to_string(token_path())
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(CliError::Unauthenticated)
}

fn mask(token: &str) -> String {
    if token.len() <= 8 {
        "*".repeat(token.len())
    } else {
        format!("{}...{}", &token[..4], &token[token.len() - 4..])
    }
}

// ── Deployments ──────────────────────────────────────────────────────────────

pub async fn deployments(engine: &Engine, json: bool, command: DeploymentsCommand) -> Result<()> {
    read_token()?;

    match command {
        DeploymentsCommand::List => {
            let list = engine.store.list().await?;
            if json {
                println!("{}", output::render_json(&list)?);
            } else {
                print!("{}", output::render_deployment_list(&list));
            }
        }
        DeploymentsCommand::Get { deployment_id } => {
            let d = get_deployment(engine, &deployment_id).await?;
            if json {
                println!("{}", output::render_json(&d)?);
            } else {
                print!("{}", output::render_deployment(&d));
            }
        }
        DeploymentsCommand::Create { name, environment, region, repository_url, branch } => {
            let deployment = Deployment::new(name, environment, region, repository_url, branch, Utc::now());
            engine.store.upsert(&deployment).await?;
            engine.orchestrator.begin_stage(&deployment.deployment_id, &deployment.repository_url).await?;
            println!("Created deployment {}", deployment.deployment_id);
        }
        DeploymentsCommand::Approve { deployment_id } => {
            advance(engine, &deployment_id, DeploymentStatus::Approved, None).await?;
            println!("Approved {deployment_id}");
        }
        DeploymentsCommand::Cancel { deployment_id, reason } => {
            advance(engine, &deployment_id, DeploymentStatus::Cancelled, reason).await?;
            println!("Cancelled {deployment_id}");
        }
        DeploymentsCommand::Rollback { deployment_id } => {
            advance(engine, &deployment_id, DeploymentStatus::RollingBack, None).await?;
            println!("Rollback started for {deployment_id}");
        }
        DeploymentsCommand::ConfirmCommand { deployment_id, command_id } => {
            engine.orchestrator.confirm(&DeploymentId::new(deployment_id.clone()), &CommandId::new(command_id.clone())).await?;
            println!("Confirmed {command_id} for {deployment_id}");
        }
        DeploymentsCommand::Plan { deployment_id, var_file } => {
            let result = run_lifecycle_job(engine, JobKind::IacPlan, &deployment_id, serde_json::json!({"options": {"var_file": var_file}})).await?;
            println!("{}", output::render_json(&result)?);
        }
        DeploymentsCommand::Apply { deployment_id, auto_approve } => {
            let result = run_lifecycle_job(engine, JobKind::IacApply, &deployment_id, serde_json::json!({"options": {"auto_approve": auto_approve}})).await?;
            println!("{}", output::render_json(&result)?);
        }
        DeploymentsCommand::Destroy { deployment_id, auto_approve } => {
            let result = run_lifecycle_job(engine, JobKind::IacDestroy, &deployment_id, serde_json::json!({"options": {"auto_approve": auto_approve}})).await?;
            println!("{}", output::render_json(&result)?);
        }
    }
    Ok(())
}

/// Submits a `JobKind::Iac*` job and drives it to completion in-process,
/// the synchronous CLI equivalent of a server leaving it for a worker to
/// pick up. Runs `IacInit` first if the deployment's working tree hasn't
/// been initialized yet.
async fn run_lifecycle_job(engine: &Engine, kind: JobKind, deployment_id: &str, payload: serde_json::Value) -> Result<serde_json::Value> {
    let deployment_id = DeploymentId::new(deployment_id);
    engine.jobs.submit(JobKind::IacInit, deployment_id.clone(), serde_json::json!({})).await?;
    engine.jobs.process(JobKind::IacInit, engine.lifecycle_handler.as_ref()).await?;

    let job_id = engine.jobs.submit(kind, deployment_id.clone(), payload).await?;
    engine.jobs.process(kind, engine.lifecycle_handler.as_ref()).await?;

    let job = depctl_store::JobRepository::get(engine.store.as_ref(), &job_id)
        .await?
        .with_context(|| format!("job {job_id} vanished after processing"))?;
    match job.status {
        depctl_domain::JobStatus::Completed => Ok(job.result.unwrap_or(serde_json::Value::Null)),
        _ => Err(CliError::Usage(job.last_error.unwrap_or_else(|| format!("job {job_id} did not complete: {:?}", job.status))).into()),
    }
}

async fn get_deployment(engine: &Engine, deployment_id: &str) -> Result<Deployment> {
    engine
        .store
        .get(&DeploymentId::new(deployment_id))
        .await?
        .with_context(|| format!("no such deployment: {deployment_id}"))
}

async fn advance(engine: &Engine, deployment_id: &str, target: DeploymentStatus, reason: Option<String>) -> Result<()> {
    let mut deployment = get_deployment(engine, deployment_id).await?;
    deployment.advance(target, Utc::now(), reason, Some(UserId::new("cli")))?;
    engine.store.upsert(&deployment).await?;
    Ok(())
}

// ── EC2 ──────────────────────────────────────────────────────────────────────
//
// The cloud-provider SDK is an out-of-scope external collaborator with an
// opaque typed contract; this core doesn't bundle an AWS SDK dependency to
// back it (see DESIGN.md). The verbs are wired so the command surface
// matches the documented CLI, returning a usage error until a real
// provider client is plugged in.

pub async fn ec2(_engine: &Engine, command: Ec2Command) -> Result<()> {
    read_token()?;
    let instance_id = match &command {
        Ec2Command::List => None,
        Ec2Command::Describe { instance_id } | Ec2Command::Start { instance_id } | Ec2Command::Stop { instance_id } | Ec2Command::Reboot { instance_id } => Some(instance_id.clone()),
    };
    let _ = instance_id;
    Err(CliError::Usage(
        "no cloud provider configured — ec2 commands require a provider client that is out of scope for this engine".to_string(),
    )
    .into())
}
