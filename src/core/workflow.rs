// src/core/workflow.rs — One isolated, time-bounded workflow execution per round
//
// The process runner stages `input.json` in a round-scoped directory, launches
// the configured runner binary (cwltool by default), and reads `output.json`
// back. Any failure discards the round directory: a round is reported either
// as a full outcome or as an error, never as partial output.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use super::run_config::RunConfig;
use super::types::{
    InputSnapshot, LabeledSample, Metrics, RunHandle, SelectedSample, WorkflowOutcome,
    WorkflowTiming,
};
use crate::infra::errors::WorkflowError;

pub const INPUT_FILE: &str = "input.json";
pub const OUTPUT_FILE: &str = "output.json";
const STDOUT_FILE: &str = "stdout.log";
const STDERR_FILE: &str = "stderr.log";
/// Bytes of stderr kept in an `ExecutionFailed` detail.
const STDERR_TAIL_BYTES: usize = 4096;

// ─── Cancellation ───────────────────────────────────────────────────────────

/// Sender side of a per-round cancellation request.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

/// Receiver side handed to the runner.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ─── Runner trait ───────────────────────────────────────────────────────────

/// Executes exactly one workflow per call. Implementations must never panic
/// on workflow failure; every failure mode is a `WorkflowError`.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn execute(
        &self,
        round_index: u32,
        cfg: &RunConfig,
        input: &InputSnapshot,
        cancel: CancelSignal,
    ) -> Result<WorkflowOutcome, WorkflowError>;
}

// ─── Wire formats ───────────────────────────────────────────────────────────

/// Contents of `input.json`.
#[derive(Debug, Serialize)]
struct WorkflowInput<'a> {
    run_id: &'a RunHandle,
    round: u32,
    project_id: &'a str,
    dataset: &'a str,
    query_strategy: &'a str,
    batch_size: u32,
    label_space: &'a [String],
    strategy_params: &'a serde_json::Map<String, serde_json::Value>,
    labeled_samples: &'a [LabeledSample],
    pending_samples: &'a [String],
    previous_model: Option<&'a str>,
    output_dir: &'a Path,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSelected {
    Id(String),
    Full(SelectedSample),
}

/// Contents of `output.json`.
#[derive(Debug, Deserialize)]
struct RawOutput {
    selected_samples: Option<Vec<RawSelected>>,
    #[serde(default)]
    model_path: Option<String>,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
    #[serde(default)]
    artifacts: BTreeMap<String, String>,
    #[serde(default)]
    elapsed_seconds: Option<f64>,
}

/// Validated output before timing is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub selected_samples: Vec<SelectedSample>,
    pub model_artifact: Option<String>,
    pub artifacts: BTreeMap<String, String>,
    pub metrics: Metrics,
    pub reported_secs: Option<f64>,
}

/// Parse and validate `output.json`. Relative artifact paths are resolved
/// against `round_dir`.
pub fn parse_output(
    bytes: &[u8],
    batch_size: u32,
    round_dir: &Path,
) -> Result<ParsedOutput, WorkflowError> {
    let raw: RawOutput = serde_json::from_slice(bytes)
        .map_err(|e| WorkflowError::malformed(format!("{OUTPUT_FILE} is not valid: {e}")))?;

    let selected = raw
        .selected_samples
        .ok_or_else(|| WorkflowError::malformed("missing 'selected_samples'"))?;

    if selected.len() > batch_size as usize {
        return Err(WorkflowError::malformed(format!(
            "workflow selected {} samples, batch size is {batch_size}",
            selected.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut selected_samples = Vec::with_capacity(selected.len());
    for entry in selected {
        let sample = match entry {
            RawSelected::Id(id) => SelectedSample::id(id),
            RawSelected::Full(sample) => sample,
        };
        if sample.sample_id.trim().is_empty() {
            return Err(WorkflowError::malformed("empty sample id in selection"));
        }
        if !seen.insert(sample.sample_id.clone()) {
            return Err(WorkflowError::malformed(format!(
                "sample '{}' selected more than once",
                sample.sample_id
            )));
        }
        selected_samples.push(sample);
    }

    if let Some((name, _)) = raw.metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(WorkflowError::malformed(format!(
            "metric '{name}' is not a finite number"
        )));
    }

    let resolve = |p: String| -> String {
        let path = PathBuf::from(&p);
        if path.is_absolute() {
            p
        } else {
            round_dir.join(path).to_string_lossy().into_owned()
        }
    };

    Ok(ParsedOutput {
        selected_samples,
        model_artifact: raw.model_path.map(resolve),
        artifacts: raw
            .artifacts
            .into_iter()
            .map(|(k, v)| (k, resolve(v)))
            .collect(),
        metrics: raw.metrics,
        reported_secs: raw.elapsed_seconds,
    })
}

/// Replace `{input}`, `{output_dir}`, `{definition}`, `{round}`, `{run_id}`.
pub fn substitute_args(
    args: &[String],
    input: &Path,
    output_dir: &Path,
    definition: &Path,
    round: u32,
    run_id: &RunHandle,
) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace("{input}", &input.to_string_lossy())
                .replace("{output_dir}", &output_dir.to_string_lossy())
                .replace("{definition}", &definition.to_string_lossy())
                .replace("{round}", &round.to_string())
                .replace("{run_id}", run_id.as_str())
        })
        .collect()
}

// ─── Process runner ─────────────────────────────────────────────────────────

/// Runs the workflow as a child process in `<work_dir>/<run_id>/round_<n>/`.
pub struct ProcessWorkflowRunner {
    work_dir: PathBuf,
}

enum Exit {
    Status(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ProcessWorkflowRunner {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn round_dir(&self, run_id: &RunHandle, round_index: u32) -> PathBuf {
        self.work_dir
            .join(run_id.as_str())
            .join(format!("round_{round_index}"))
    }

    async fn run_in(
        &self,
        round_dir: &Path,
        round_index: u32,
        cfg: &RunConfig,
        input: &InputSnapshot,
        mut cancel: CancelSignal,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let io_err = |what: &str, e: std::io::Error| {
            WorkflowError::execution_failed(format!("{what}: {e}"))
        };

        // Stale output from an interrupted earlier attempt must not leak in.
        if round_dir.exists() {
            tokio::fs::remove_dir_all(round_dir)
                .await
                .map_err(|e| io_err("clearing round directory", e))?;
        }
        tokio::fs::create_dir_all(round_dir)
            .await
            .map_err(|e| io_err("creating round directory", e))?;

        let input_path = round_dir.join(INPUT_FILE);
        let payload = WorkflowInput {
            run_id: &input.run_id,
            round: round_index,
            project_id: &cfg.project_id,
            dataset: &cfg.dataset,
            query_strategy: &cfg.query_strategy,
            batch_size: cfg.batch_size,
            label_space: &cfg.label_space,
            strategy_params: &cfg.strategy_params,
            labeled_samples: &input.labeled_samples,
            pending_samples: &input.pending_samples,
            previous_model: input.previous_model.as_deref(),
            output_dir: round_dir,
        };
        let json = serde_json::to_vec_pretty(&payload)
            .map_err(|e| WorkflowError::execution_failed(format!("encoding input: {e}")))?;
        tokio::fs::write(&input_path, json)
            .await
            .map_err(|e| io_err("writing input", e))?;

        let runner = which::which(&cfg.workflow.runner).map_err(|e| {
            WorkflowError::execution_failed(format!(
                "workflow runner '{}' not found: {e}",
                cfg.workflow.runner
            ))
        })?;
        let definition = std::path::absolute(&cfg.workflow.definition)
            .unwrap_or_else(|_| cfg.workflow.definition.clone());
        let args = substitute_args(
            &cfg.workflow.args,
            &input_path,
            round_dir,
            &definition,
            round_index,
            &input.run_id,
        );

        let stdout = std::fs::File::create(round_dir.join(STDOUT_FILE))
            .map_err(|e| io_err("creating stdout log", e))?;
        let stderr = std::fs::File::create(round_dir.join(STDERR_FILE))
            .map_err(|e| io_err("creating stderr log", e))?;

        tracing::debug!(
            "Launching workflow round {} for run {}: {:?} {:?}",
            round_index,
            input.run_id,
            runner,
            args
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut command = Command::new(&runner);
        command
            .args(&args)
            .envs(&cfg.workflow.env)
            .env("AL_ENGINE_ROUND", round_index.to_string())
            .env("AL_ENGINE_RUN_ID", input.run_id.as_str())
            .current_dir(round_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        // Own process group, so tools the runner launches die with it
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|e| io_err("spawning workflow", e))?;

        let limit = Duration::from_secs(cfg.workflow.timeout_secs);
        let exit = tokio::select! {
            status = child.wait() => Exit::Status(status),
            _ = tokio::time::sleep(limit) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        let status = match exit {
            Exit::Status(status) => status.map_err(|e| io_err("waiting for workflow", e))?,
            Exit::TimedOut => {
                terminate(&mut child).await;
                return Err(WorkflowError::timeout(format!(
                    "exceeded {}s limit",
                    cfg.workflow.timeout_secs
                )));
            }
            Exit::Cancelled => {
                terminate(&mut child).await;
                return Err(WorkflowError::cancelled("stop requested"));
            }
        };

        if !status.success() {
            let tail = stderr_tail(&round_dir.join(STDERR_FILE)).await;
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into());
            return Err(WorkflowError::execution_failed(if tail.is_empty() {
                format!("workflow exited with status {code}")
            } else {
                format!("workflow exited with status {code}: {tail}")
            }));
        }

        let bytes = tokio::fs::read(round_dir.join(OUTPUT_FILE))
            .await
            .map_err(|e| WorkflowError::malformed(format!("reading {OUTPUT_FILE}: {e}")))?;
        let parsed = parse_output(&bytes, cfg.batch_size, round_dir)?;

        Ok(WorkflowOutcome {
            selected_samples: parsed.selected_samples,
            model_artifact: parsed.model_artifact,
            artifacts: parsed.artifacts,
            metrics: parsed.metrics,
            timing: WorkflowTiming {
                started_at,
                finished_at: Utc::now(),
                duration_ms: clock.elapsed().as_millis() as u64,
                reported_secs: parsed.reported_secs,
            },
        })
    }
}

#[async_trait]
impl WorkflowRunner for ProcessWorkflowRunner {
    async fn execute(
        &self,
        round_index: u32,
        cfg: &RunConfig,
        input: &InputSnapshot,
        cancel: CancelSignal,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        // The child runs inside the round directory, so every path handed to
        // it must be absolute.
        let round_dir = self.round_dir(&input.run_id, round_index);
        let round_dir = std::path::absolute(&round_dir).unwrap_or(round_dir);
        let result = self
            .run_in(&round_dir, round_index, cfg, input, cancel)
            .await;

        if let Err(ref e) = result {
            tracing::warn!(
                "Workflow round {} for run {} failed: {}",
                round_index,
                input.run_id,
                e
            );
            if let Err(io) = tokio::fs::remove_dir_all(&round_dir).await {
                if io.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not discard {:?}: {}", round_dir, io);
                }
            }
        }
        result
    }
}

/// SIGKILL the workflow's whole process group, then reap the child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain syscall; the group id is the child's pid
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    let _ = child.kill().await;
}

async fn stderr_tail(path: &Path) -> String {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return String::new();
    };
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> PathBuf {
        PathBuf::from("/work/run/round_0")
    }

    #[test]
    fn test_parse_plain_ids() {
        let out = parse_output(
            br#"{"selected_samples": ["s1", "s2"], "metrics": {"accuracy": 0.8}}"#,
            5,
            &dir(),
        )
        .unwrap();
        assert_eq!(out.selected_samples.len(), 2);
        assert_eq!(out.selected_samples[0].sample_id, "s1");
        assert_eq!(out.metrics["accuracy"], 0.8);
        assert!(out.model_artifact.is_none());
    }

    #[test]
    fn test_parse_full_samples_and_paths() {
        let out = parse_output(
            br#"{
                "selected_samples": [
                    {"sample_id": "s1", "sample_data": {"text": "hi"}, "original_index": 42},
                    "s2"
                ],
                "model_path": "model.pkl",
                "artifacts": {"report": "/abs/report.html"},
                "elapsed_seconds": 3.5
            }"#,
            2,
            &dir(),
        )
        .unwrap();
        assert_eq!(out.selected_samples[0].original_index, Some(42));
        assert_eq!(
            out.model_artifact.as_deref(),
            Some("/work/run/round_0/model.pkl")
        );
        assert_eq!(out.artifacts["report"], "/abs/report.html");
        assert_eq!(out.reported_secs, Some(3.5));
    }

    #[test]
    fn test_parse_rejects_oversized_selection() {
        let err = parse_output(br#"{"selected_samples": ["a", "b", "c"]}"#, 2, &dir()).unwrap_err();
        assert_eq!(err.kind, crate::infra::errors::WorkflowErrorKind::MalformedOutput);
    }

    #[test]
    fn test_parse_rejects_duplicates_missing_and_garbage() {
        for body in [
            &br#"{"selected_samples": ["a", "a"]}"#[..],
            &br#"{"selected_samples": [""]}"#[..],
            &br#"{"metrics": {}}"#[..],
            &b"not json"[..],
        ] {
            let err = parse_output(body, 5, &dir()).unwrap_err();
            assert_eq!(err.kind, crate::infra::errors::WorkflowErrorKind::MalformedOutput);
        }
    }

    #[test]
    fn test_substitute_args() {
        let args = vec![
            "--outdir".to_string(),
            "{output_dir}".to_string(),
            "{definition}".to_string(),
            "{input}".to_string(),
            "--tag=r{round}-{run_id}".to_string(),
        ];
        let out = substitute_args(
            &args,
            Path::new("/w/input.json"),
            Path::new("/w"),
            Path::new("wf.cwl"),
            3,
            &RunHandle::from("abc"),
        );
        assert_eq!(
            out,
            vec!["--outdir", "/w", "wf.cwl", "/w/input.json", "--tag=r3-abc"]
        );
    }

    #[tokio::test]
    async fn test_cancel_signal() {
        let (handle, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        handle.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
