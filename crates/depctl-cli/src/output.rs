use depctl_domain::Deployment;

/// Render a single deployment as human-readable text.
pub fn render_deployment(d: &Deployment) -> String {
    let mut out = String::new();
    out.push_str(&format!("Deployment: {} ({})\n", d.name, d.deployment_id));
    out.push_str(&format!("  Status:      {}\n", d.status));
    out.push_str(&format!("  Environment: {}\n", d.environment));
    out.push_str(&format!("  Region:      {}\n", d.region));
    out.push_str(&format!("  Repository:  {} @ {}\n", d.repository_url, d.branch));
    out.push_str(&format!("  Version:     {}\n", d.version));
    out
}

/// Render a list of deployments as a one-line-per-deployment table.
pub fn render_deployment_list(deployments: &[Deployment]) -> String {
    if deployments.is_empty() {
        return "No deployments.".to_string();
    }
    let mut out = String::new();
    for d in deployments {
        out.push_str(&format!("{}\t{}\t{}\t{}\n", d.deployment_id, d.name, d.status, d.environment));
    }
    out
}

pub fn render_json<T: serde::Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
