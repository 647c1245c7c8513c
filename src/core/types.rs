// src/core/types.rs — Core data types for the iteration engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::run_config::RunConfig;
use crate::infra::errors::WorkflowErrorKind;

/// Workflow-reported evaluation metrics (name → value).
pub type Metrics = BTreeMap<String, f64>;

/// Opaque identifier of a run in the controller's registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunHandle(String);

impl RunHandle {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Samples ────────────────────────────────────────────────────────────────

/// A sample the workflow proposed for labeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSample {
    pub sample_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_index: Option<u64>,
}

impl SelectedSample {
    pub fn id(sample_id: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            sample_data: None,
            original_index: None,
        }
    }
}

/// One entry of a label submission from the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub sample_id: String,
    pub label: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_index: Option<u64>,
}

impl LabeledSample {
    pub fn new(sample_id: impl Into<String>, label: impl Into<serde_json::Value>) -> Self {
        Self {
            sample_id: sample_id.into(),
            label: label.into(),
            sample_data: None,
            original_index: None,
        }
    }
}

// ─── Round state ────────────────────────────────────────────────────────────

/// Lifecycle of a single round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RoundState {
    Running,
    AwaitingLabels,
    Aggregating,
    Completed,
    Failed {
        kind: WorkflowErrorKind,
        detail: String,
    },
}

impl RoundState {
    pub fn is_failed(&self) -> bool {
        matches!(self, RoundState::Failed { .. })
    }

    /// The workflow for this round finished successfully.
    pub fn has_outcome(&self) -> bool {
        matches!(
            self,
            RoundState::AwaitingLabels | RoundState::Aggregating | RoundState::Completed
        )
    }
}

/// Lightweight per-round summary kept in memory by the controller.
/// Full artifacts live in the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub index: u32,
    #[serde(flatten)]
    pub state: RoundState,
    pub selected: Vec<String>,
    pub labels_received: u32,
    pub model_artifact: Option<String>,
    pub metrics: Metrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn started(index: u32) -> Self {
        Self {
            index,
            state: RoundState::Running,
            selected: Vec::new(),
            labels_received: 0,
            model_artifact: None,
            metrics: Metrics::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn from_artifact(artifact: &RoundArtifact) -> Self {
        Self {
            index: artifact.round_index,
            state: artifact.state.clone(),
            selected: artifact
                .selected_samples
                .iter()
                .map(|s| s.sample_id.clone())
                .collect(),
            labels_received: artifact.labels_received,
            model_artifact: artifact.model_artifact.clone(),
            metrics: artifact.metrics.clone(),
            started_at: artifact.started_at,
            completed_at: artifact.completed_at,
        }
    }
}

// ─── Run state ──────────────────────────────────────────────────────────────

/// Why a run reached `COMPLETED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CompletionReason {
    MaxRounds,
    EarlyStop { metric: String, value: f64 },
    /// The workflow selected nothing; there is nothing left to label.
    PoolExhausted,
}

/// The controller's state machine position for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    RunningWorkflow,
    AwaitingLabels,
    Aggregating,
    Completed {
        #[serde(flatten)]
        reason: CompletionReason,
    },
    Failed {
        kind: WorkflowErrorKind,
        detail: String,
    },
    Stopped,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed { .. } | RunPhase::Failed { .. } | RunPhase::Stopped
        )
    }

    /// A round is in flight; the run cannot accept a new iteration.
    pub fn is_mid_round(&self) -> bool {
        matches!(
            self,
            RunPhase::RunningWorkflow | RunPhase::AwaitingLabels | RunPhase::Aggregating
        )
    }

    pub fn run_status(&self) -> RunStatus {
        match self {
            RunPhase::Completed { .. } => RunStatus::Completed,
            RunPhase::Failed { .. } => RunStatus::Failed,
            RunPhase::Stopped => RunStatus::Stopped,
            _ => RunStatus::Running,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunPhase::Idle => "IDLE",
            RunPhase::RunningWorkflow => "RUNNING_WORKFLOW",
            RunPhase::AwaitingLabels => "AWAITING_LABELS",
            RunPhase::Aggregating => "AGGREGATING",
            RunPhase::Completed { .. } => "COMPLETED",
            RunPhase::Failed { .. } => "FAILED",
            RunPhase::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Failed { kind, .. } => write!(f, "FAILED({kind})"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Coarse run status exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

/// Read-only view of a run returned by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStateSnapshot {
    pub run_id: RunHandle,
    pub project_id: String,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub current_round: u32,
    pub stop_requested: bool,
    pub rounds: Vec<Round>,
    pub labeled_count: usize,
    pub pending_count: usize,
    pub config: RunConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of `list_runs()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: RunHandle,
    pub project_id: String,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub current_round: u32,
    pub created_at: DateTime<Utc>,
}

/// Result of `start_iteration` / `submit_labels`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundStatus {
    pub run_id: RunHandle,
    /// The round the operation acted on.
    pub round: u32,
    pub state: RoundState,
    /// Run phase after the operation.
    pub phase: RunPhase,
    pub samples_processed: usize,
    pub carried_forward: usize,
    /// Index of the round started as a consequence of this call, if any.
    pub next_round: Option<u32>,
}

// ─── Workflow I/O ───────────────────────────────────────────────────────────

/// What the workflow gets to see for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub run_id: RunHandle,
    pub round_index: u32,
    pub labeled_samples: Vec<LabeledSample>,
    /// Samples selected in earlier rounds that never received a label.
    pub pending_samples: Vec<String>,
    pub previous_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTiming {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Wall time the workflow reported for itself, if any.
    pub reported_secs: Option<f64>,
}

/// Normalized output of one successful workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub selected_samples: Vec<SelectedSample>,
    pub model_artifact: Option<String>,
    pub artifacts: BTreeMap<String, String>,
    pub metrics: Metrics,
    pub timing: WorkflowTiming,
}

// ─── Persisted records ──────────────────────────────────────────────────────

/// Everything persisted for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundArtifact {
    pub run_id: RunHandle,
    pub round_index: u32,
    #[serde(flatten)]
    pub state: RoundState,
    pub selected_samples: Vec<SelectedSample>,
    pub model_artifact: Option<String>,
    pub artifacts: BTreeMap<String, String>,
    pub metrics: Metrics,
    pub timing: Option<WorkflowTiming>,
    pub labels_received: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub finalized: bool,
}

impl RoundArtifact {
    pub fn started(run_id: RunHandle, round: &Round) -> Self {
        Self {
            run_id,
            round_index: round.index,
            state: RoundState::Running,
            selected_samples: Vec::new(),
            model_artifact: None,
            artifacts: BTreeMap::new(),
            metrics: Metrics::new(),
            timing: None,
            labels_received: 0,
            started_at: round.started_at,
            completed_at: None,
            finalized: false,
        }
    }

    /// Fold the in-memory round summary (state, labels, completion) into the
    /// stored artifact.
    pub fn apply(&mut self, round: &Round) {
        self.state = round.state.clone();
        self.labels_received = round.labels_received;
        self.completed_at = round.completed_at;
        self.finalized = matches!(round.state, RoundState::Completed | RoundState::Failed { .. });
    }
}

/// A run as persisted in the store; enough to rebuild the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunHandle,
    pub config: RunConfig,
    pub phase: RunPhase,
    pub current_round: u32,
    pub stop_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
