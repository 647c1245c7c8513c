// src/core/run_config.rs — Run configuration: parsing, env overrides, validation
//
// A run config is immutable once the run starts. Parsing goes through a raw
// all-optional form so a missing field surfaces as `ConfigError::Missing`
// rather than a serde message, and so negative numbers are reported as
// invalid values instead of parse failures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use super::types::Metrics;
use crate::infra::config::WorkflowDefaults;
use crate::infra::errors::ConfigError;

/// Prefix for environment overrides (`AL_ENGINE_RUN_BATCH_SIZE`, ...).
pub const ENV_PREFIX: &str = "AL_ENGINE_RUN_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub project_id: String,
    pub dataset: String,
    pub query_strategy: String,
    pub batch_size: u32,
    /// `None` means unbounded.
    pub max_rounds: Option<u32>,
    pub workflow: WorkflowSpec,
    pub early_stop: Option<EarlyStop>,
    pub label_space: Vec<String>,
    pub strategy_params: Map<String, Value>,
    pub auto_advance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub definition: PathBuf,
    pub runner: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStop {
    pub metric: String,
    pub target: f64,
}

impl EarlyStop {
    /// Ties count as satisfied.
    pub fn is_met(&self, metrics: &Metrics) -> Option<f64> {
        metrics
            .get(&self.metric)
            .copied()
            .filter(|value| *value >= self.target)
    }
}

impl RunConfig {
    /// True once `round_index` is the last round the config allows.
    pub fn is_last_round(&self, round_index: u32) -> bool {
        self.max_rounds
            .is_some_and(|max| round_index.saturating_add(1) >= max)
    }
}

// ─── Sources ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    Json,
    Toml,
    #[serde(alias = "yml")]
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            other => Err(ConfigError::invalid(
                "source",
                format!(
                    "unsupported config extension '{}' (expected json, toml, yaml)",
                    other.unwrap_or("")
                ),
            )),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Toml => "TOML",
            Self::Yaml => "YAML",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Inline { format: ConfigFormat, text: String },
}

// ─── Raw form ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawRunConfig {
    project_id: Option<String>,
    dataset: Option<String>,
    query_strategy: Option<String>,
    #[serde(alias = "n_queries")]
    batch_size: Option<i64>,
    #[serde(alias = "max_iterations")]
    max_rounds: Option<i64>,
    workflow: Option<RawWorkflow>,
    early_stop: Option<EarlyStop>,
    #[serde(default)]
    label_space: Vec<String>,
    #[serde(default)]
    strategy_params: Map<String, Value>,
    auto_advance: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWorkflow {
    definition: Option<PathBuf>,
    runner: Option<String>,
    args: Option<Vec<String>>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    timeout_secs: Option<i64>,
}

// ─── ConfigStore ────────────────────────────────────────────────────────────

/// Loads and validates run configurations. Stateless apart from the
/// engine-level workflow defaults; safe to call repeatedly.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    defaults: WorkflowDefaults,
}

impl ConfigStore {
    pub fn new(defaults: WorkflowDefaults) -> Self {
        Self { defaults }
    }

    /// Parse `source`, apply `AL_ENGINE_RUN_*` overrides from the process
    /// environment, and validate.
    pub fn load(&self, source: &ConfigSource) -> Result<RunConfig, ConfigError> {
        self.load_with_env(source, |key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with_env(
        &self,
        source: &ConfigSource,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<RunConfig, ConfigError> {
        let (format, text) = match source {
            ConfigSource::File(path) => {
                let format = ConfigFormat::from_path(path)?;
                (format, std::fs::read_to_string(path)?)
            }
            ConfigSource::Inline { format, text } => (*format, text.clone()),
        };

        let mut raw = parse_raw(format, &text)?;
        apply_env_overrides(&mut raw, env)?;
        self.build(raw)
    }

    /// Build from an already-decoded JSON document (API request bodies).
    pub fn from_value(&self, value: Value) -> Result<RunConfig, ConfigError> {
        let raw: RawRunConfig = serde_json::from_value(value).map_err(|e| ConfigError::Parse {
            format: "JSON",
            message: e.to_string(),
        })?;
        self.build(raw)
    }

    fn build(&self, raw: RawRunConfig) -> Result<RunConfig, ConfigError> {
        let workflow = raw.workflow.ok_or(ConfigError::Missing { field: "workflow" })?;

        let batch_size = raw
            .batch_size
            .ok_or(ConfigError::Missing {
                field: "batch_size",
            })
            .and_then(|n| positive_u32("batch_size", n))?;

        let max_rounds = raw
            .max_rounds
            .map(|n| positive_u32("max_rounds", n))
            .transpose()?;

        let timeout_secs = match workflow.timeout_secs {
            Some(n) if n <= 0 => {
                return Err(ConfigError::invalid(
                    "workflow.timeout_secs",
                    "must be greater than 0",
                ))
            }
            Some(n) => n as u64,
            None => self.defaults.timeout_secs,
        };

        let cfg = RunConfig {
            project_id: raw.project_id.ok_or(ConfigError::Missing {
                field: "project_id",
            })?,
            dataset: raw.dataset.ok_or(ConfigError::Missing { field: "dataset" })?,
            query_strategy: raw.query_strategy.ok_or(ConfigError::Missing {
                field: "query_strategy",
            })?,
            batch_size,
            max_rounds,
            workflow: WorkflowSpec {
                definition: workflow.definition.ok_or(ConfigError::Missing {
                    field: "workflow.definition",
                })?,
                runner: workflow
                    .runner
                    .unwrap_or_else(|| self.defaults.runner.clone()),
                args: workflow.args.unwrap_or_else(|| self.defaults.args.clone()),
                env: workflow.env,
                timeout_secs,
            },
            early_stop: raw.early_stop,
            label_space: raw.label_space,
            strategy_params: raw.strategy_params,
            auto_advance: raw.auto_advance.unwrap_or(true),
        };

        validate(&cfg)?;
        Ok(cfg)
    }
}

/// Check a config independently of how it was built.
pub fn validate(cfg: &RunConfig) -> Result<(), ConfigError> {
    non_empty("project_id", &cfg.project_id)?;
    non_empty("dataset", &cfg.dataset)?;
    non_empty("query_strategy", &cfg.query_strategy)?;

    if cfg.batch_size == 0 {
        return Err(ConfigError::invalid("batch_size", "must be greater than 0"));
    }
    if cfg.max_rounds == Some(0) {
        return Err(ConfigError::invalid("max_rounds", "must be greater than 0"));
    }

    if cfg.workflow.definition.as_os_str().is_empty() {
        return Err(ConfigError::invalid("workflow.definition", "must not be empty"));
    }
    non_empty("workflow.runner", &cfg.workflow.runner)?;
    if cfg.workflow.timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "workflow.timeout_secs",
            "must be greater than 0",
        ));
    }

    if let Some(ref stop) = cfg.early_stop {
        non_empty("early_stop.metric", &stop.metric)?;
        if !stop.target.is_finite() {
            return Err(ConfigError::invalid("early_stop.target", "must be finite"));
        }
    }

    let mut seen = HashSet::new();
    for label in &cfg.label_space {
        if !seen.insert(label.as_str()) {
            return Err(ConfigError::invalid(
                "label_space",
                format!("duplicate label '{label}'"),
            ));
        }
    }

    Ok(())
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::invalid(field, "must not be empty"))
    } else {
        Ok(())
    }
}

fn positive_u32(field: &'static str, n: i64) -> Result<u32, ConfigError> {
    if n <= 0 {
        return Err(ConfigError::invalid(field, "must be greater than 0"));
    }
    u32::try_from(n).map_err(|_| ConfigError::invalid(field, "out of range"))
}

fn parse_raw(format: ConfigFormat, text: &str) -> Result<RawRunConfig, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        format: format.name(),
        message,
    };
    match format {
        ConfigFormat::Json => serde_json::from_str(text).map_err(|e| parse_err(e.to_string())),
        ConfigFormat::Toml => toml::from_str(text).map_err(|e| parse_err(e.to_string())),
        ConfigFormat::Yaml => serde_yml::from_str(text).map_err(|e| parse_err(e.to_string())),
    }
}

fn apply_env_overrides(
    raw: &mut RawRunConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let var = |name: &str| env(&format!("{ENV_PREFIX}{name}"));
    let number = |name: &str, value: String| {
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| ConfigError::invalid(format!("{ENV_PREFIX}{name}"), "not an integer"))
    };

    if let Some(v) = var("BATCH_SIZE") {
        raw.batch_size = Some(number("BATCH_SIZE", v)?);
    }
    if let Some(v) = var("MAX_ROUNDS") {
        raw.max_rounds = Some(number("MAX_ROUNDS", v)?);
    }
    if let Some(v) = var("QUERY_STRATEGY") {
        raw.query_strategy = Some(v);
    }
    if let Some(v) = var("DATASET") {
        raw.dataset = Some(v);
    }
    Ok(())
}
