// src/store/db.rs — SQLite operations for runs, rounds and labels

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::types::{
    LabeledSample, Metrics, RoundArtifact, RunHandle, RunRecord,
};
use crate::infra::errors::ResultError;

/// Low-level SQLite operations. Owned by the store server task; everything
/// else goes through [`StoreHandle`](super::StoreHandle).
pub struct Store {
    conn: Connection,
}

const ROUND_COLUMNS: &str = "run_id, round_index, state, selected_samples, model_artifact,
     artifacts, metrics, timing, labels_received, started_at, completed_at, finalized";

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Runs --

    pub fn save_run(&self, record: &RunRecord) -> Result<(), ResultError> {
        let config = serde_json::to_string(&record.config)?;
        let phase = serde_json::to_string(&record.phase)?;
        self.conn.execute(
            "INSERT INTO runs (id, project_id, config, phase, current_round, stop_requested,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                phase = excluded.phase,
                current_round = excluded.current_round,
                stop_requested = excluded.stop_requested,
                updated_at = excluded.updated_at",
            params![
                record.run_id.as_str(),
                record.config.project_id,
                config,
                phase,
                record.current_round,
                record.stop_requested,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_runs(&self) -> Result<Vec<RunRecord>, ResultError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, config, phase, current_round, stop_requested, created_at, updated_at
             FROM runs ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RunRow {
                    id: row.get(0)?,
                    config: row.get(1)?,
                    phase: row.get(2)?,
                    current_round: row.get(3)?,
                    stop_requested: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RunRow::into_record).collect()
    }

    // -- Rounds --

    /// Insert or overwrite a round. Overwriting a finalized round fails.
    pub fn save_round(&self, artifact: &RoundArtifact) -> Result<(), ResultError> {
        let tx = self.conn.unchecked_transaction()?;

        let finalized: Option<bool> = tx
            .query_row(
                "SELECT finalized FROM rounds WHERE run_id = ?1 AND round_index = ?2",
                params![artifact.run_id.as_str(), artifact.round_index],
                |r| r.get(0),
            )
            .optional()?;
        if finalized == Some(true) {
            return Err(ResultError::AlreadyFinalized {
                run_id: artifact.run_id.to_string(),
                round: artifact.round_index,
            });
        }

        let timing = artifact
            .timing
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            &format!("INSERT OR REPLACE INTO rounds ({ROUND_COLUMNS})
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                artifact.run_id.as_str(),
                artifact.round_index,
                serde_json::to_string(&artifact.state)?,
                serde_json::to_string(&artifact.selected_samples)?,
                artifact.model_artifact,
                serde_json::to_string(&artifact.artifacts)?,
                serde_json::to_string(&artifact.metrics)?,
                timing,
                artifact.labels_received,
                artifact.started_at.to_rfc3339(),
                artifact.completed_at.map(|t| t.to_rfc3339()),
                artifact.finalized,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_round(&self, run_id: &RunHandle, round: u32) -> Result<RoundArtifact, ResultError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ROUND_COLUMNS} FROM rounds WHERE run_id = ?1 AND round_index = ?2"
                ),
                params![run_id.as_str(), round],
                RoundRow::from_row,
            )
            .optional()?;
        match row {
            Some(row) => row.into_artifact(),
            None => Err(ResultError::NotFound {
                run_id: run_id.to_string(),
                round,
            }),
        }
    }

    /// All rounds of a run, ascending by index.
    pub fn list_rounds(&self, run_id: &RunHandle) -> Result<Vec<RoundArtifact>, ResultError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE run_id = ?1 ORDER BY round_index ASC"
        ))?;
        let rows = stmt
            .query_map(params![run_id.as_str()], RoundRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RoundRow::into_artifact).collect()
    }

    /// Metrics of a round whose workflow finished successfully.
    pub fn performance(&self, run_id: &RunHandle, round: u32) -> Result<Metrics, ResultError> {
        let artifact = self.get_round(run_id, round)?;
        if !artifact.state.has_outcome() {
            return Err(ResultError::NotFound {
                run_id: run_id.to_string(),
                round,
            });
        }
        Ok(artifact.metrics)
    }

    // -- Labels --

    pub fn save_labels(
        &self,
        run_id: &RunHandle,
        round: u32,
        labels: &[LabeledSample],
    ) -> Result<(), ResultError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for label in labels {
            let sample_data = label
                .sample_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO labels (run_id, round_index, sample_id, label, sample_data,
                 original_index, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(run_id, sample_id) DO UPDATE SET
                    round_index = excluded.round_index,
                    label = excluded.label,
                    sample_data = excluded.sample_data,
                    original_index = excluded.original_index",
                params![
                    run_id.as_str(),
                    round,
                    label.sample_id,
                    serde_json::to_string(&label.label)?,
                    sample_data,
                    label.original_index.map(|i| i as i64),
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Labels of a run in first-labeled order.
    pub fn labels(&self, run_id: &RunHandle) -> Result<Vec<LabeledSample>, ResultError> {
        let mut stmt = self.conn.prepare(
            "SELECT sample_id, label, sample_data, original_index
             FROM labels WHERE run_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(sample_id, label, sample_data, original_index)| -> Result<_, ResultError> {
                Ok(LabeledSample {
                    sample_id,
                    label: serde_json::from_str(&label)?,
                    sample_data: sample_data.map(|d| serde_json::from_str(&d)).transpose()?,
                    original_index: original_index.map(|i| i as u64),
                })
            })
            .collect()
    }
}

// ─── Row helpers ────────────────────────────────────────────────────────────

struct RunRow {
    id: String,
    config: String,
    phase: String,
    current_round: u32,
    stop_requested: bool,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord, ResultError> {
        Ok(RunRecord {
            run_id: RunHandle::from(self.id),
            config: serde_json::from_str(&self.config)?,
            phase: serde_json::from_str(&self.phase)?,
            current_round: self.current_round,
            stop_requested: self.stop_requested,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

struct RoundRow {
    run_id: String,
    round_index: u32,
    state: String,
    selected_samples: String,
    model_artifact: Option<String>,
    artifacts: String,
    metrics: String,
    timing: Option<String>,
    labels_received: u32,
    started_at: String,
    completed_at: Option<String>,
    finalized: bool,
}

impl RoundRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            round_index: row.get(1)?,
            state: row.get(2)?,
            selected_samples: row.get(3)?,
            model_artifact: row.get(4)?,
            artifacts: row.get(5)?,
            metrics: row.get(6)?,
            timing: row.get(7)?,
            labels_received: row.get(8)?,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
            finalized: row.get(11)?,
        })
    }

    fn into_artifact(self) -> Result<RoundArtifact, ResultError> {
        Ok(RoundArtifact {
            run_id: RunHandle::from(self.run_id),
            round_index: self.round_index,
            state: serde_json::from_str(&self.state)?,
            selected_samples: serde_json::from_str(&self.selected_samples)?,
            model_artifact: self.model_artifact,
            artifacts: serde_json::from_str(&self.artifacts)?,
            metrics: serde_json::from_str(&self.metrics)?,
            timing: self.timing.map(|t| serde_json::from_str(&t)).transpose()?,
            labels_received: self.labels_received,
            started_at: parse_time(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            finalized: self.finalized,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, ResultError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ResultError::Corrupt(format!("bad timestamp '{s}': {e}")))
}
