// src/infra/errors.rs — Error types for AL-Engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A run configuration that cannot be accepted. Never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field '{field}'")]
    Missing { field: &'static str },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowErrorKind {
    ExecutionFailed,
    MalformedOutput,
    Timeout,
    Cancelled,
}

impl WorkflowErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionFailed => "execution_failed",
            Self::MalformedOutput => "malformed_output",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal failure of a single round's workflow execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Workflow {kind}: {detail}")]
pub struct WorkflowError {
    pub kind: WorkflowErrorKind,
    pub detail: String,
}

impl WorkflowError {
    pub fn new(kind: WorkflowErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn execution_failed(detail: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::ExecutionFailed, detail)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::MalformedOutput, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Timeout, detail)
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Cancelled, detail)
    }
}

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ResultError {
    #[error("Round {round} of run '{run_id}' is already finalized")]
    AlreadyFinalized { run_id: String, round: u32 },

    #[error("Round {round} of run '{run_id}' not found")]
    NotFound { run_id: String, round: u32 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Result store is unavailable")]
    Unavailable,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Flat discriminant of [`ControllerError`], convenient for matching and
/// for the API layer's status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerErrorKind {
    NotReady,
    WrongRound,
    InvalidConfig,
    UnknownRun,
    RunFinished,
    InvalidLabels,
    Storage,
}

/// Caller misuse of the iteration controller, returned synchronously.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Run '{run_id}' is not ready: currently {phase}")]
    NotReady { run_id: String, phase: String },

    #[error("Round {requested} is not awaiting labels (current round {current}, {phase})")]
    WrongRound {
        requested: u32,
        current: u32,
        phase: String,
    },

    #[error("Invalid run configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Run '{0}' not found")]
    UnknownRun(String),

    #[error("Run '{run_id}' has finished ({phase})")]
    RunFinished { run_id: String, phase: String },

    #[error("Invalid label submission: {0}")]
    InvalidLabels(String),

    #[error(transparent)]
    Storage(#[from] ResultError),
}

impl ControllerError {
    pub fn kind(&self) -> ControllerErrorKind {
        match self {
            Self::NotReady { .. } => ControllerErrorKind::NotReady,
            Self::WrongRound { .. } => ControllerErrorKind::WrongRound,
            Self::InvalidConfig(_) => ControllerErrorKind::InvalidConfig,
            Self::UnknownRun(_) => ControllerErrorKind::UnknownRun,
            Self::RunFinished { .. } => ControllerErrorKind::RunFinished,
            Self::InvalidLabels(_) => ControllerErrorKind::InvalidLabels,
            Self::Storage(_) => ControllerErrorKind::Storage,
        }
    }
}
