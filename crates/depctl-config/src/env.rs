use std::time::Duration;

use crate::error::ConfigError;

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn var_parsed_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("could not parse {raw:?}"),
        }),
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    var(name).ok_or_else(|| ConfigError::MissingRequired(name.to_string()))
}

#[derive(Debug, Clone)]
pub struct CloudCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Engine-wide configuration assembled from the process environment.
///
/// Every field has a safe default except credentials and the AI API key,
/// which have none and fail loading if absent.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cloud_region: String,
    pub cloud_credentials: CloudCredentials,
    pub state_bucket: String,
    pub lock_table: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub document_store_uri: String,
    pub ai_api_key: String,
    pub ai_base_url: String,
    pub working_tree_root: std::path::PathBuf,
    pub process_output_cap_bytes: usize,
    pub process_timeout: Duration,
    pub audit_append_timeout: Duration,
}

impl EngineConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let cfg = EngineConfig {
            cloud_region: var_or("DEPCTL_CLOUD_REGION", "us-east-1"),
            cloud_credentials: CloudCredentials {
                access_key_id: required("DEPCTL_CLOUD_ACCESS_KEY_ID")?,
                secret_access_key: required("DEPCTL_CLOUD_SECRET_ACCESS_KEY")?,
            },
            state_bucket: var_or("DEPCTL_STATE_BUCKET", "depctl-state"),
            lock_table: var_or("DEPCTL_LOCK_TABLE", "depctl-locks"),
            broker_host: var_or("DEPCTL_BROKER_HOST", "127.0.0.1"),
            broker_port: var_parsed_or("DEPCTL_BROKER_PORT", 6379u16)?,
            document_store_uri: var_or(
                "DEPCTL_DOCUMENT_STORE_URI",
                "postgres://localhost/depctl",
            ),
            ai_api_key: required("DEPCTL_AI_API_KEY")?,
            ai_base_url: var_or("DEPCTL_AI_BASE_URL", "https://api.depctl-ai.internal"),
            working_tree_root: std::path::PathBuf::from(var_or(
                "DEPCTL_WORKING_TREE_ROOT",
                "/var/lib/depctl/workdir",
            )),
            process_output_cap_bytes: var_parsed_or(
                "DEPCTL_PROCESS_OUTPUT_CAP_BYTES",
                8 * 1024 * 1024usize,
            )?,
            process_timeout: Duration::from_secs(var_parsed_or(
                "DEPCTL_PROCESS_TIMEOUT_SECS",
                1800u64,
            )?),
            audit_append_timeout: Duration::from_secs(var_parsed_or(
                "DEPCTL_AUDIT_APPEND_TIMEOUT_SECS",
                2u64,
            )?),
        };
        tracing::debug!(region = %cfg.cloud_region, bucket = %cfg.state_bucket, "loaded engine configuration");
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in the same binary;
    // serialize this module's tests behind one lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for k in [
            "DEPCTL_CLOUD_REGION",
            "DEPCTL_CLOUD_ACCESS_KEY_ID",
            "DEPCTL_CLOUD_SECRET_ACCESS_KEY",
            "DEPCTL_STATE_BUCKET",
            "DEPCTL_LOCK_TABLE",
            "DEPCTL_BROKER_HOST",
            "DEPCTL_BROKER_PORT",
            "DEPCTL_DOCUMENT_STORE_URI",
            "DEPCTL_AI_API_KEY",
            "DEPCTL_AI_BASE_URL",
            "DEPCTL_WORKING_TREE_ROOT",
            "DEPCTL_PROCESS_OUTPUT_CAP_BYTES",
            "DEPCTL_PROCESS_TIMEOUT_SECS",
            "DEPCTL_AUDIT_APPEND_TIMEOUT_SECS",
        ] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn missing_credentials_fail_with_no_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = EngineConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(name) if name == "DEPCTL_CLOUD_ACCESS_KEY_ID"));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("DEPCTL_CLOUD_ACCESS_KEY_ID", "ak");
        std::env::set_var("DEPCTL_CLOUD_SECRET_ACCESS_KEY", "sk");
        std::env::set_var("DEPCTL_AI_API_KEY", "key");
        let cfg = EngineConfig::load_from_env().unwrap();
        assert_eq!(cfg.cloud_region, "us-east-1");
        assert_eq!(cfg.state_bucket, "depctl-state");
        assert_eq!(cfg.process_output_cap_bytes, 8 * 1024 * 1024);
        clear_all();
    }

    #[test]
    fn invalid_numeric_value_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("DEPCTL_CLOUD_ACCESS_KEY_ID", "ak");
        std::env::set_var("DEPCTL_CLOUD_SECRET_ACCESS_KEY", "sk");
        std::env::set_var("DEPCTL_AI_API_KEY", "key");
        std::env::set_var("DEPCTL_BROKER_PORT", "not-a-port");
        let err = EngineConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        clear_all();
    }
}
