// src/infra/config.rs — Engine configuration loading (TOML)
//
// This is the process-level configuration (API server, storage, defaults for
// workflow invocation). Per-run configuration lives in `core::run_config`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub workflow: WorkflowDefaults,

    #[serde(default)]
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
    /// Bearer token required on every request when set.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".into(),
            port: 5050,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(paths::db_path)
    }

    pub fn resolved_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(paths::work_dir)
    }
}

/// Values applied to a run's `[workflow]` section when the run omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    pub runner: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for WorkflowDefaults {
    fn default() -> Self {
        Self {
            runner: "cwltool".into(),
            args: vec![
                "--outdir".into(),
                "{output_dir}".into(),
                "{definition}".into(),
                "{input}".into(),
            ],
            timeout_secs: 3600,
        }
    }
}

/// Outbound callbacks for an external provenance listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub on_round_finalized: Option<String>,
    #[serde(default)]
    pub on_run_finished: Option<String>,
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert!(c.api.enabled);
        assert_eq!(c.api.port, 5050);
        assert!(c.api.token.is_none());
        assert_eq!(c.workflow.runner, "cwltool");
        assert_eq!(c.workflow.timeout_secs, 3600);
        assert!(c.webhooks.on_round_finalized.is_none());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.api.port, 5050);
        assert_eq!(config.workflow.args.len(), 4);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[api]
enabled = false
bind = "0.0.0.0"
port = 8080
token = "s3cret"

[storage]
db_path = "/var/lib/al/engine.db"
work_dir = "/var/lib/al/rounds"

[workflow]
runner = "toil-cwl-runner"
args = ["{definition}", "{input}"]
timeout_secs = 120

[webhooks]
on_round_finalized = "http://localhost:9000/rounds"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.api.enabled);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.token.as_deref(), Some("s3cret"));
        assert_eq!(
            config.storage.resolved_db_path(),
            PathBuf::from("/var/lib/al/engine.db")
        );
        assert_eq!(config.workflow.runner, "toil-cwl-runner");
        assert_eq!(config.workflow.timeout_secs, 120);
        assert_eq!(
            config.webhooks.on_round_finalized.as_deref(),
            Some("http://localhost:9000/rounds")
        );
        assert!(config.webhooks.on_run_finished.is_none());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
