use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::IacError;
use depctl_domain::DeploymentId;

/// Deterministic `backend.tf` template. The object-storage bucket, state
/// key, and lock table are injected; the HTTP/S3-shaped backend block
/// itself never varies across deployments.
pub fn render_backend_tf(deployment_id: &DeploymentId, bucket: &str, lock_table: &str) -> String {
    format!(
        "# generated by depctl — do not edit\nterraform {{\n  backend \"s3\" {{\n    bucket = \"{bucket}\"\n    key    = \"deployments/{deployment_id}/state.tfstate\"\n    dynamodb_table = \"{lock_table}\"\n    encrypt = true\n  }}\n}}\n",
    )
}

pub fn working_tree_dir(root: &Path, deployment_id: &DeploymentId) -> PathBuf {
    root.join("terraform").join(deployment_id.as_str())
}

/// Runs the §4.2 pre-check against a candidate file set. Returns the list
/// of violated reasons (empty iff valid).
pub fn precheck(files: &BTreeMap<String, String>) -> Vec<String> {
    let mut reasons = Vec::new();

    let main_tf = files.get("main.tf").map(String::as_str).unwrap_or("");
    if main_tf.len() < 50 || !(main_tf.contains("terraform") || main_tf.contains("provider")) {
        reasons.push("main.tf must be at least 50 bytes and reference terraform or provider".into());
    }

    let providers_tf = files.get("providers.tf").map(String::as_str).unwrap_or("");
    if !main_tf.contains("provider") && !providers_tf.contains("provider") {
        reasons.push("no provider block found in providers.tf or main.tf".into());
    }

    if !main_tf.contains("resource \"") {
        reasons.push("main.tf contains no resource declaration".into());
    }

    reasons
}

/// C2: atomic write-all-or-nothing materialization of a deployment's working
/// tree. Stages into `{dir}.tmp`, swaps via rename, then best-effort formats;
/// on any failure before the swap the staging directory is removed so the
/// existing tree is left byte-for-byte untouched.
pub async fn write_atomic(
    root: &Path,
    deployment_id: &DeploymentId,
    files: &BTreeMap<String, String>,
    bucket: &str,
    lock_table: &str,
    fmt_binary: &str,
) -> Result<Vec<String>, IacError> {
    let reasons = precheck(files);
    if !reasons.is_empty() {
        return Err(IacError::InvalidIac(reasons));
    }

    let target = working_tree_dir(root, deployment_id);
    let staging = target.with_extension("tmp");

    let result = stage_and_swap(&target, &staging, deployment_id, files, bucket, lock_table).await;

    match result {
        Ok(written) => {
            format_tree(&target, fmt_binary).await;
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            Err(e)
        }
    }
}

async fn stage_and_swap(
    target: &Path,
    staging: &Path,
    deployment_id: &DeploymentId,
    files: &BTreeMap<String, String>,
    bucket: &str,
    lock_table: &str,
) -> Result<Vec<String>, IacError> {
    tokio::fs::create_dir_all(staging).await?;

    let mut written = Vec::new();
    for (name, content) in files {
        if content.is_empty() {
            continue;
        }
        tokio::fs::write(staging.join(name), content).await?;
        written.push(name.clone());
    }

    let backend = render_backend_tf(deployment_id, bucket, lock_table);
    tokio::fs::write(staging.join("backend.tf"), &backend).await?;
    written.push("backend.tf".to_string());

    if target.exists() {
        tokio::fs::remove_dir_all(target).await?;
    }
    tokio::fs::rename(staging, target).await?;

    Ok(written)
}

/// Best-effort `fmt -recursive`. A non-zero exit whose output mentions
/// "files reformatted" still counts as success; anything else is logged and
/// swallowed — formatting never fails a write.
async fn format_tree(target: &Path, fmt_binary: &str) {
    let cmd = format!("{fmt_binary} fmt -recursive");
    let result = depctl_process::run(
        &cmd,
        target,
        &std::collections::HashMap::new(),
        Duration::from_secs(30),
        Some(1024 * 1024),
        CancellationToken::new(),
    )
    .await;

    match result {
        Ok(r) if r.exit_code == 0 => {}
        Ok(r) if r.stdout.contains("files reformatted") => {}
        Ok(r) => warn!(exit_code = r.exit_code, "fmt -recursive exited non-zero, ignoring"),
        Err(e) => warn!(error = %e, "fmt -recursive failed to run, ignoring"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_files() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert(
            "main.tf".to_string(),
            "terraform {}\nprovider \"aws\" {}\nresource \"aws_instance\" \"web\" {}\n".to_string(),
        );
        m.insert("variables.tf".to_string(), "variable \"region\" {}\n".to_string());
        m.insert("outputs.tf".to_string(), "output \"id\" { value = aws_instance.web.id }\n".to_string());
        m
    }

    #[test]
    fn precheck_accepts_well_formed_main_tf() {
        assert!(precheck(&valid_files()).is_empty());
    }

    #[test]
    fn precheck_rejects_short_main_tf() {
        let mut files = valid_files();
        files.insert("main.tf".to_string(), "terraform {}".to_string());
        assert!(!precheck(&files).is_empty());
    }

    #[test]
    fn precheck_rejects_missing_resource_block() {
        let mut files = valid_files();
        files.insert(
            "main.tf".to_string(),
            "terraform {}\nprovider \"aws\" {}\n".repeat(3),
        );
        let reasons = precheck(&files);
        assert!(reasons.iter().any(|r| r.contains("resource")));
    }

    #[tokio::test]
    async fn write_atomic_rejects_empty_main_tf_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let deployment_id = DeploymentId::new("d1");
        let mut files = BTreeMap::new();
        files.insert("main.tf".to_string(), String::new());

        let err = write_atomic(dir.path(), &deployment_id, &files, "bucket", "locks", "terraform")
            .await
            .unwrap_err();
        assert!(matches!(err, IacError::InvalidIac(_)));
        assert!(!working_tree_dir(dir.path(), &deployment_id).exists());
        assert!(!working_tree_dir(dir.path(), &deployment_id).with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn write_atomic_succeeds_and_swap_leaves_no_tmp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let deployment_id = DeploymentId::new("d1");
        let written =
            write_atomic(dir.path(), &deployment_id, &valid_files(), "bucket", "locks", "true").await.unwrap();

        assert!(written.contains(&"main.tf".to_string()));
        assert!(written.contains(&"backend.tf".to_string()));
        let target = working_tree_dir(dir.path(), &deployment_id);
        assert!(target.join("main.tf").exists());
        assert!(target.join("backend.tf").exists());
        assert!(!target.with_extension("tmp").exists());
    }
}
