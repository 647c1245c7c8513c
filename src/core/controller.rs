// src/core/controller.rs — Iteration controller
//
// Owns the run registry and drives each run through
// IDLE → RUNNING_WORKFLOW → AWAITING_LABELS → AGGREGATING → next round.
// Workflow execution happens in a spawned task; its result is folded back in
// through `complete_workflow`, so `status()` never waits on a workflow.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::dataset::{self, LabelPool};
use super::run_config::{self, RunConfig};
use super::types::*;
use super::workflow::{cancel_pair, CancelHandle, CancelSignal, WorkflowRunner};
use crate::infra::config::WebhookConfig;
use crate::infra::errors::{ControllerError, ResultError, WorkflowError, WorkflowErrorKind};
use crate::infra::webhooks::{fire_webhook, RoundEvent};
use crate::store::StoreHandle;

const RESTART_DETAIL: &str = "interrupted by engine restart";

/// Entry point for every run operation. Cheap to clone; clones share the
/// same registry.
#[derive(Clone)]
pub struct IterationController {
    inner: Arc<Inner>,
}

struct Inner {
    runner: Arc<dyn WorkflowRunner>,
    store: StoreHandle,
    webhooks: WebhookConfig,
    runs: RwLock<HashMap<RunHandle, Arc<RunSlot>>>,
}

/// One registered run.
struct RunSlot {
    id: RunHandle,
    state: Mutex<RunState>,
    /// Held by caller-initiated mutations; a second caller gets `NotReady`.
    ops: tokio::sync::Mutex<()>,
    /// Orders snapshots written to the store.
    persist: tokio::sync::Mutex<()>,
}

struct RunState {
    config: RunConfig,
    phase: RunPhase,
    current_round: u32,
    rounds: Vec<Round>,
    pool: LabelPool,
    cancel: Option<CancelHandle>,
    stop_requested: bool,
    /// Full artifact of the round in flight.
    live: Option<RoundArtifact>,
    /// Finalized artifacts not yet written.
    finished: Vec<RoundArtifact>,
    /// The last snapshot did not reach the store.
    unsaved: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Everything the spawned execution task needs.
struct Launch {
    round: u32,
    config: RunConfig,
    input: InputSnapshot,
    cancel: CancelSignal,
}

impl RunSlot {
    fn new(id: RunHandle, state: RunState) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            ops: tokio::sync::Mutex::new(()),
            persist: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_op(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ControllerError> {
        self.ops.try_lock().map_err(|_| ControllerError::NotReady {
            run_id: self.id.to_string(),
            phase: self.state().phase.to_string(),
        })
    }
}

impl RunState {
    fn new(config: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            phase: RunPhase::Idle,
            current_round: 0,
            rounds: Vec::new(),
            pool: LabelPool::new(),
            cancel: None,
            stop_requested: false,
            live: None,
            finished: Vec::new(),
            unsaved: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn round_mut(&mut self, index: u32) -> Option<&mut Round> {
        self.rounds.iter_mut().rev().find(|r| r.index == index)
    }

    /// Start round `index`: record it, arm cancellation, and build the
    /// workflow input from the current pool.
    fn begin_round(&mut self, run_id: &RunHandle, index: u32) -> Launch {
        let previous_model = self
            .rounds
            .iter()
            .rev()
            .filter(|r| r.state == RoundState::Completed)
            .find_map(|r| r.model_artifact.clone());

        let round = Round::started(index);
        self.live = Some(RoundArtifact::started(run_id.clone(), &round));
        self.rounds.push(round);
        self.current_round = index;
        self.phase = RunPhase::RunningWorkflow;

        let (handle, signal) = cancel_pair();
        self.cancel = Some(handle);
        self.touch();

        Launch {
            round: index,
            config: self.config.clone(),
            input: InputSnapshot {
                run_id: run_id.clone(),
                round_index: index,
                labeled_samples: self.pool.labeled(),
                pending_samples: self.pool.pending(),
                previous_model,
            },
            cancel: signal,
        }
    }

    /// Undo `begin_round` for a round whose workflow was never launched.
    /// The run parks in `IDLE` so the round can be started again.
    fn abort_round(&mut self, index: u32) {
        if self.rounds.last().is_some_and(|r| r.index == index) {
            self.rounds.pop();
        }
        if self.live.as_ref().is_some_and(|a| a.round_index == index) {
            self.live = None;
        }
        self.cancel = None;
        self.current_round = index.saturating_sub(1);
        self.phase = RunPhase::Idle;
        self.touch();
    }

    /// Move the current round into a final state and queue its artifact.
    fn finalize_round(&mut self, run_id: &RunHandle, state: RoundState) -> Option<RoundEvent> {
        let index = self.current_round;
        let round = self.round_mut(index)?;
        round.state = state;
        round.completed_at = Some(Utc::now());
        let round = round.clone();

        let mut artifact = match self.live.take() {
            Some(a) if a.round_index == index => a,
            _ => RoundArtifact::started(run_id.clone(), &round),
        };
        artifact.apply(&round);

        let event = RoundEvent::RoundFinalized {
            run_id: run_id.clone(),
            round: index,
            state: round.state.clone(),
            model_artifact: artifact.model_artifact.clone(),
            artifacts: artifact.artifacts.clone(),
        };
        self.finished.push(artifact);
        self.touch();
        Some(event)
    }

    /// Enter a terminal phase.
    fn finish(&mut self, run_id: &RunHandle, phase: RunPhase) -> RoundEvent {
        self.phase = phase;
        self.cancel = None;
        self.touch();
        RoundEvent::RunFinished {
            run_id: run_id.clone(),
            project_id: self.config.project_id.clone(),
            status: self.phase.run_status(),
            phase: self.phase.clone(),
            rounds: self.rounds.len(),
        }
    }

    fn record(&self, run_id: &RunHandle) -> RunRecord {
        RunRecord {
            run_id: run_id.clone(),
            config: self.config.clone(),
            phase: self.phase.clone(),
            current_round: self.current_round,
            stop_requested: self.stop_requested,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn snapshot(&self, run_id: &RunHandle) -> RunStateSnapshot {
        RunStateSnapshot {
            run_id: run_id.clone(),
            project_id: self.config.project_id.clone(),
            status: self.phase.run_status(),
            phase: self.phase.clone(),
            current_round: self.current_round,
            stop_requested: self.stop_requested,
            rounds: self.rounds.clone(),
            labeled_count: self.pool.labeled_count(),
            pending_count: self.pool.pending_count(),
            config: self.config.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn summary(&self, run_id: &RunHandle) -> RunSummary {
        RunSummary {
            run_id: run_id.clone(),
            project_id: self.config.project_id.clone(),
            status: self.phase.run_status(),
            phase: self.phase.clone(),
            current_round: self.current_round,
            created_at: self.created_at,
        }
    }
}

impl IterationController {
    pub fn new(
        runner: Arc<dyn WorkflowRunner>,
        store: StoreHandle,
        webhooks: WebhookConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                store,
                webhooks,
                runs: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Validate `config`, register a new run and start round 0.
    pub async fn start_run(&self, config: RunConfig) -> Result<RunHandle, ControllerError> {
        run_config::validate(&config)?;

        let run_id = RunHandle::generate();
        let mut state = RunState::new(config);
        let launch = state.begin_round(&run_id, 0);
        let slot = Arc::new(RunSlot::new(run_id.clone(), state));

        self.persist(&slot).await?;
        self.registry_write().insert(run_id.clone(), slot.clone());

        tracing::info!(
            "Run {} started for project '{}' (batch size {}, max rounds {:?})",
            run_id,
            launch.config.project_id,
            launch.config.batch_size,
            launch.config.max_rounds
        );
        self.launch(slot, launch);
        Ok(run_id)
    }

    /// Begin the next round of a run parked in `IDLE`.
    pub async fn start_iteration(&self, run_id: &RunHandle) -> Result<RoundStatus, ControllerError> {
        let slot = self.slot(run_id)?;
        let _op = slot.try_op()?;

        let launch = {
            let mut st = slot.state();
            if st.phase.is_terminal() {
                return Err(ControllerError::RunFinished {
                    run_id: run_id.to_string(),
                    phase: st.phase.to_string(),
                });
            }
            if st.phase.is_mid_round() {
                return Err(ControllerError::NotReady {
                    run_id: run_id.to_string(),
                    phase: st.phase.to_string(),
                });
            }
            let next = if st.rounds.is_empty() {
                0
            } else {
                st.current_round + 1
            };
            st.begin_round(run_id, next)
        };

        if let Err(e) = self.persist_launch(&slot, Some(launch.round)).await {
            tracing::error!("Run {}: could not record round {}: {}", run_id, launch.round, e);
            return Err(e.into());
        }
        tracing::info!("Run {} round {} started", run_id, launch.round);

        let status = RoundStatus {
            run_id: run_id.clone(),
            round: launch.round,
            state: RoundState::Running,
            phase: RunPhase::RunningWorkflow,
            samples_processed: 0,
            carried_forward: 0,
            next_round: Some(launch.round),
        };
        self.launch(slot.clone(), launch);
        Ok(status)
    }

    /// Accept the oracle's labels for the round awaiting them. Samples left
    /// unlabeled are carried forward to later rounds.
    pub async fn submit_labels(
        &self,
        run_id: &RunHandle,
        round: u32,
        labels: Vec<LabeledSample>,
    ) -> Result<RoundStatus, ControllerError> {
        let slot = self.slot(run_id)?;
        let _op = slot.try_op()?;

        {
            let mut st = slot.state();
            if st.phase != RunPhase::AwaitingLabels || st.current_round != round {
                return Err(ControllerError::WrongRound {
                    requested: round,
                    current: st.current_round,
                    phase: st.phase.to_string(),
                });
            }

            let selected = st
                .round_mut(round)
                .map(|r| r.selected.clone())
                .unwrap_or_default();
            dataset::check_submission(&selected, &labels, &st.config.label_space)
                .map_err(ControllerError::InvalidLabels)?;

            st.phase = RunPhase::Aggregating;
            if let Some(r) = st.round_mut(round) {
                r.state = RoundState::Aggregating;
                r.labels_received = labels.len() as u32;
            }
            st.touch();
        }

        if let Err(e) = self
            .inner
            .store
            .save_labels(run_id, round, labels.clone())
            .await
        {
            tracing::error!("Run {}: saving labels for round {} failed: {}", run_id, round, e);
            let mut st = slot.state();
            st.phase = RunPhase::AwaitingLabels;
            if let Some(r) = st.round_mut(round) {
                r.state = RoundState::AwaitingLabels;
                r.labels_received = 0;
            }
            return Err(e.into());
        }

        let (status, launch, events) = {
            let mut st = slot.state();
            let selected = st
                .round_mut(round)
                .map(|r| r.selected.clone())
                .unwrap_or_default();
            let merged = st.pool.merge(&selected, &labels);

            let mut events = Vec::new();
            events.extend(st.finalize_round(run_id, RoundState::Completed));

            let metrics = st
                .round_mut(round)
                .map(|r| r.metrics.clone())
                .unwrap_or_default();
            let early_stop = st
                .config
                .early_stop
                .as_ref()
                .and_then(|es| es.is_met(&metrics).map(|value| (es.metric.clone(), value)));

            let mut launch = None;
            if let Some((metric, value)) = early_stop {
                tracing::info!(
                    "Run {} reached early-stop target: {} = {}",
                    run_id,
                    metric,
                    value
                );
                events.push(st.finish(
                    run_id,
                    RunPhase::Completed {
                        reason: CompletionReason::EarlyStop { metric, value },
                    },
                ));
            } else if st.config.is_last_round(round) {
                tracing::info!("Run {} completed after round {}", run_id, round);
                events.push(st.finish(
                    run_id,
                    RunPhase::Completed {
                        reason: CompletionReason::MaxRounds,
                    },
                ));
            } else if st.config.auto_advance {
                launch = Some(st.begin_round(run_id, round + 1));
            } else {
                st.phase = RunPhase::Idle;
                st.touch();
            }

            let status = RoundStatus {
                run_id: run_id.clone(),
                round,
                state: RoundState::Completed,
                phase: st.phase.clone(),
                samples_processed: merged.accepted,
                carried_forward: merged.carried_forward,
                next_round: launch.as_ref().map(|l| l.round),
            };
            (status, launch, events)
        };

        tracing::info!(
            "Run {} round {} aggregated: {} labels, {} carried forward",
            run_id,
            round,
            status.samples_processed,
            status.carried_forward
        );

        if let Err(e) = self
            .persist_launch(&slot, launch.as_ref().map(|l| l.round))
            .await
        {
            tracing::error!("Run {}: persisting round {} failed: {}", run_id, round, e);
            self.fire(events);
            return Err(e.into());
        }
        self.fire(events);
        if let Some(launch) = launch {
            tracing::info!("Run {} round {} started", run_id, launch.round);
            self.launch(slot.clone(), launch);
        }
        Ok(status)
    }

    /// Read-only view of a run; valid in any phase.
    pub fn status(&self, run_id: &RunHandle) -> Result<RunStateSnapshot, ControllerError> {
        let slot = self.slot(run_id)?;
        let snapshot = slot.state().snapshot(run_id);
        Ok(snapshot)
    }

    pub fn list_runs(&self) -> Vec<RunSummary> {
        let slots: Vec<Arc<RunSlot>> = self.registry_read().values().cloned().collect();
        let mut runs: Vec<RunSummary> = slots
            .iter()
            .map(|slot| slot.state().summary(&slot.id))
            .collect();
        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        runs
    }

    pub async fn get_round(
        &self,
        run_id: &RunHandle,
        round: u32,
    ) -> Result<RoundArtifact, ControllerError> {
        let slot = self.slot(run_id)?;
        let _persisted = self.settled(&slot).await;
        Ok(self.inner.store.get_round(run_id, round).await?)
    }

    /// Every round of a run, ascending by index.
    pub async fn list_rounds(&self, run_id: &RunHandle) -> Result<Vec<RoundArtifact>, ControllerError> {
        let slot = self.slot(run_id)?;
        let _persisted = self.settled(&slot).await;
        Ok(self.inner.store.list_rounds(run_id).await?)
    }

    /// Metrics reported by the workflow of a round that ran successfully.
    pub async fn performance(&self, run_id: &RunHandle, round: u32) -> Result<Metrics, ControllerError> {
        let slot = self.slot(run_id)?;
        let _persisted = self.settled(&slot).await;
        Ok(self.inner.store.performance(run_id, round).await?)
    }

    /// Abandon a run. A running workflow is cancelled and the run becomes
    /// `STOPPED` once the runner gives up; otherwise it stops immediately.
    /// The stop takes effect even when the store cannot be written; the
    /// storage error is still returned.
    pub async fn stop_run(&self, run_id: &RunHandle) -> Result<RunStateSnapshot, ControllerError> {
        let slot = self.slot(run_id)?;
        let _op = slot.try_op()?;

        let events = {
            let mut st = slot.state();
            let mut events = Vec::new();
            let phase = st.phase.clone();
            match phase {
                RunPhase::RunningWorkflow => {
                    st.stop_requested = true;
                    if let Some(cancel) = &st.cancel {
                        cancel.cancel();
                    }
                    st.touch();
                    tracing::info!(
                        "Run {}: stop requested, cancelling round {}",
                        run_id,
                        st.current_round
                    );
                }
                RunPhase::AwaitingLabels => {
                    st.stop_requested = true;
                    events.extend(st.finalize_round(
                        run_id,
                        RoundState::Failed {
                            kind: WorkflowErrorKind::Cancelled,
                            detail: "run stopped while awaiting labels".into(),
                        },
                    ));
                    events.push(st.finish(run_id, RunPhase::Stopped));
                    tracing::info!("Run {} stopped while awaiting labels", run_id);
                }
                RunPhase::Idle => {
                    st.stop_requested = true;
                    events.push(st.finish(run_id, RunPhase::Stopped));
                    tracing::info!("Run {} stopped", run_id);
                }
                RunPhase::Aggregating => {
                    return Err(ControllerError::NotReady {
                        run_id: run_id.to_string(),
                        phase: phase.to_string(),
                    });
                }
                RunPhase::Completed { .. } | RunPhase::Failed { .. } | RunPhase::Stopped => {
                    return Err(ControllerError::RunFinished {
                        run_id: run_id.to_string(),
                        phase: phase.to_string(),
                    });
                }
            }
            events
        };

        let persisted = self.persist(&slot).await;
        self.fire(events);
        if let Err(e) = persisted {
            tracing::error!("Run {}: persisting stop failed: {}", run_id, e);
            return Err(e.into());
        }
        let snapshot = slot.state().snapshot(run_id);
        Ok(snapshot)
    }

    /// Rebuild the registry from the store. Runs whose workflow or
    /// aggregation was in flight when the engine went down are failed.
    pub async fn recover(&self) -> Result<usize, ControllerError> {
        let records = self.inner.store.load_runs().await?;
        let mut recovered = 0;

        for record in records {
            if self.registry_read().contains_key(&record.run_id) {
                continue;
            }
            let run_id = record.run_id.clone();
            let artifacts = self.inner.store.list_rounds(&run_id).await?;
            let labels = self.inner.store.labels(&run_id).await?;

            let completed: Vec<String> = artifacts
                .iter()
                .filter(|a| a.state == RoundState::Completed)
                .flat_map(|a| a.selected_samples.iter().map(|s| s.sample_id.clone()))
                .collect();

            let mut state = RunState::new(record.config);
            state.phase = record.phase;
            state.current_round = record.current_round;
            state.stop_requested = record.stop_requested;
            state.created_at = record.created_at;
            state.updated_at = record.updated_at;
            state.pool = LabelPool::restore(labels, completed.iter());
            state.rounds = artifacts.iter().map(Round::from_artifact).collect();
            state.live = artifacts
                .into_iter()
                .find(|a| a.round_index == record.current_round && !a.finalized);

            let interrupted = matches!(
                state.phase,
                RunPhase::RunningWorkflow | RunPhase::Aggregating
            );
            if interrupted {
                let (kind, phase) = if state.stop_requested {
                    (WorkflowErrorKind::Cancelled, RunPhase::Stopped)
                } else {
                    (
                        WorkflowErrorKind::ExecutionFailed,
                        RunPhase::Failed {
                            kind: WorkflowErrorKind::ExecutionFailed,
                            detail: RESTART_DETAIL.into(),
                        },
                    )
                };
                state.finalize_round(
                    &run_id,
                    RoundState::Failed {
                        kind,
                        detail: RESTART_DETAIL.into(),
                    },
                );
                state.finish(&run_id, phase);
                tracing::warn!(
                    "Run {} was interrupted in round {}; marked {}",
                    run_id,
                    state.current_round,
                    state.phase
                );
            }

            let slot = Arc::new(RunSlot::new(run_id.clone(), state));
            if interrupted {
                self.persist(&slot).await?;
            }
            self.registry_write().insert(run_id, slot);
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!("Recovered {} run(s) from the result store", recovered);
        }
        Ok(recovered)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn registry_read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<RunHandle, Arc<RunSlot>>> {
        self.inner.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<RunHandle, Arc<RunSlot>>> {
        self.inner.runs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, run_id: &RunHandle) -> Result<Arc<RunSlot>, ControllerError> {
        self.registry_read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownRun(run_id.to_string()))
    }

    fn fire(&self, events: Vec<RoundEvent>) {
        for event in events {
            fire_webhook(&self.inner.webhooks, event);
        }
    }

    /// Spawn the workflow for a round; its result comes back through
    /// `complete_workflow`.
    fn launch(&self, slot: Arc<RunSlot>, launch: Launch) {
        let controller = self.clone();
        tokio::spawn(async move {
            let Launch {
                round,
                config,
                input,
                cancel,
            } = launch;
            tracing::debug!("Run {} round {}: executing workflow", slot.id, round);
            let result = controller
                .inner
                .runner
                .execute(round, &config, &input, cancel)
                .await;
            controller.complete_workflow(&slot, round, result).await;
        });
    }

    async fn complete_workflow(
        &self,
        slot: &RunSlot,
        round: u32,
        result: Result<WorkflowOutcome, WorkflowError>,
    ) {
        let run_id = &slot.id;
        let _persisted = slot.persist.lock().await;

        let events = {
            let mut st = slot.state();
            if st.phase != RunPhase::RunningWorkflow || st.current_round != round {
                tracing::warn!(
                    "Run {}: discarding stale workflow result for round {} ({})",
                    run_id,
                    round,
                    st.phase
                );
                return;
            }
            st.cancel = None;

            let result = match result {
                Ok(_) if st.stop_requested => {
                    Err(WorkflowError::cancelled("run stopped by request"))
                }
                other => other,
            };

            let mut events = Vec::new();
            match result {
                Ok(outcome) => {
                    let selected: Vec<String> = outcome
                        .selected_samples
                        .iter()
                        .map(|s| s.sample_id.clone())
                        .collect();
                    if let Some(r) = st.round_mut(round) {
                        r.state = RoundState::AwaitingLabels;
                        r.selected = selected.clone();
                        r.model_artifact = outcome.model_artifact.clone();
                        r.metrics = outcome.metrics.clone();
                    }
                    if let Some(artifact) = st.live.as_mut() {
                        artifact.selected_samples = outcome.selected_samples;
                        artifact.model_artifact = outcome.model_artifact;
                        artifact.artifacts = outcome.artifacts;
                        artifact.metrics = outcome.metrics;
                        artifact.timing = Some(outcome.timing);
                    }

                    if selected.is_empty() {
                        tracing::info!(
                            "Run {} round {}: workflow selected nothing, pool exhausted",
                            run_id,
                            round
                        );
                        events.extend(st.finalize_round(run_id, RoundState::Completed));
                        events.push(st.finish(
                            run_id,
                            RunPhase::Completed {
                                reason: CompletionReason::PoolExhausted,
                            },
                        ));
                    } else {
                        st.phase = RunPhase::AwaitingLabels;
                        st.touch();
                        tracing::info!(
                            "Run {} round {}: {} samples awaiting labels",
                            run_id,
                            round,
                            selected.len()
                        );
                    }
                }
                Err(e) => {
                    let phase = if st.stop_requested {
                        RunPhase::Stopped
                    } else {
                        RunPhase::Failed {
                            kind: e.kind,
                            detail: e.detail.clone(),
                        }
                    };
                    events.extend(st.finalize_round(
                        run_id,
                        RoundState::Failed {
                            kind: e.kind,
                            detail: e.detail,
                        },
                    ));
                    events.push(st.finish(run_id, phase));
                    tracing::warn!("Run {} round {} ended the run: {}", run_id, round, st.phase);
                }
            }
            events
        };

        if let Err(e) = self.save_snapshot(slot).await {
            tracing::error!("Run {}: persisting round {} failed: {}", run_id, round, e);
        }
        self.fire(events);
    }

    async fn persist(&self, slot: &RunSlot) -> Result<(), ResultError> {
        let _persisted = slot.persist.lock().await;
        self.save_snapshot(slot).await
    }

    /// Persist a transition that begins `round`. If the store refuses it the
    /// round is undone before the persist lock is released.
    async fn persist_launch(&self, slot: &RunSlot, round: Option<u32>) -> Result<(), ResultError> {
        let _persisted = slot.persist.lock().await;
        let saved = self.save_snapshot(slot).await;
        if let (Err(_), Some(round)) = (&saved, round) {
            slot.state().abort_round(round);
        }
        saved
    }

    /// Wait for in-flight snapshots, then retry one that failed earlier.
    async fn settled<'a>(&self, slot: &'a RunSlot) -> tokio::sync::MutexGuard<'a, ()> {
        let guard = slot.persist.lock().await;
        let unsaved = slot.state().unsaved;
        if unsaved {
            match self.save_snapshot(slot).await {
                Ok(()) => tracing::info!("Run {}: pending state written to the result store", slot.id),
                Err(e) => tracing::warn!("Run {}: result store still failing: {}", slot.id, e),
            }
        }
        guard
    }

    /// Write the run record, queued final rounds and the live round.
    /// Callers hold `slot.persist`. On failure the unwritten final rounds go
    /// back on the queue and the run is marked unsaved.
    async fn save_snapshot(&self, slot: &RunSlot) -> Result<(), ResultError> {
        let (record, finished, live) = {
            let mut st = slot.state();
            let finished = std::mem::take(&mut st.finished);
            let live = st.live.clone().map(|mut artifact| {
                if let Some(round) = st.rounds.iter().find(|r| r.index == artifact.round_index) {
                    artifact.apply(round);
                }
                artifact
            });
            (st.record(&slot.id), finished, live)
        };

        let written = self.write_snapshot(record, &finished, live).await;

        let mut st = slot.state();
        match written {
            Ok(()) => {
                st.unsaved = false;
                Ok(())
            }
            Err((saved, e)) => {
                let mut requeue: Vec<RoundArtifact> = finished.into_iter().skip(saved).collect();
                requeue.append(&mut st.finished);
                st.finished = requeue;
                st.unsaved = true;
                Err(e)
            }
        }
    }

    /// Returns how many of `finished` were stored alongside the error.
    async fn write_snapshot(
        &self,
        record: RunRecord,
        finished: &[RoundArtifact],
        live: Option<RoundArtifact>,
    ) -> Result<(), (usize, ResultError)> {
        let store = &self.inner.store;
        store.save_run(record).await.map_err(|e| (0, e))?;
        for (saved, artifact) in finished.iter().enumerate() {
            match store.save_round(artifact.clone()).await {
                Ok(()) => {}
                Err(ResultError::AlreadyFinalized { run_id, round }) => {
                    tracing::debug!("Round {} of run {} was already final", round, run_id);
                }
                Err(e) => return Err((saved, e)),
            }
        }
        if let Some(artifact) = live {
            store
                .save_round(artifact)
                .await
                .map_err(|e| (finished.len(), e))?;
        }
        Ok(())
    }
}
