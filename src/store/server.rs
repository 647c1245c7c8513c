// src/store/server.rs — Async message passing for Store
//
// A single task owns the SQLite connection; every read and write is a
// command on its channel, so writes are serialized per store.

use tokio::sync::{mpsc, oneshot};

use super::db::Store;
use crate::core::types::{LabeledSample, Metrics, RoundArtifact, RunHandle, RunRecord};
use crate::infra::errors::ResultError;

type Reply<T> = oneshot::Sender<Result<T, ResultError>>;

#[derive(Debug)]
pub enum StoreCommand {
    SaveRun {
        record: RunRecord,
        resp: Reply<()>,
    },
    LoadRuns {
        resp: Reply<Vec<RunRecord>>,
    },
    SaveRound {
        artifact: RoundArtifact,
        resp: Reply<()>,
    },
    GetRound {
        run_id: RunHandle,
        round: u32,
        resp: Reply<RoundArtifact>,
    },
    ListRounds {
        run_id: RunHandle,
        resp: Reply<Vec<RoundArtifact>>,
    },
    Performance {
        run_id: RunHandle,
        round: u32,
        resp: Reply<Metrics>,
    },
    SaveLabels {
        run_id: RunHandle,
        round: u32,
        labels: Vec<LabeledSample>,
        resp: Reply<()>,
    },
    Labels {
        run_id: RunHandle,
        resp: Reply<Vec<LabeledSample>>,
    },
}

/// A handle to the Store that uses message passing. This is the result
/// store as seen by the controller and the API.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> StoreCommand,
    ) -> Result<T, ResultError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(make(resp_tx))
            .await
            .map_err(|_| ResultError::Unavailable)?;
        resp_rx.await.map_err(|_| ResultError::Unavailable)?
    }

    pub async fn save_run(&self, record: RunRecord) -> Result<(), ResultError> {
        self.request(|resp| StoreCommand::SaveRun { record, resp })
            .await
    }

    pub async fn load_runs(&self) -> Result<Vec<RunRecord>, ResultError> {
        self.request(|resp| StoreCommand::LoadRuns { resp }).await
    }

    pub async fn save_round(&self, artifact: RoundArtifact) -> Result<(), ResultError> {
        self.request(|resp| StoreCommand::SaveRound { artifact, resp })
            .await
    }

    pub async fn get_round(
        &self,
        run_id: &RunHandle,
        round: u32,
    ) -> Result<RoundArtifact, ResultError> {
        let run_id = run_id.clone();
        self.request(|resp| StoreCommand::GetRound {
            run_id,
            round,
            resp,
        })
        .await
    }

    pub async fn list_rounds(&self, run_id: &RunHandle) -> Result<Vec<RoundArtifact>, ResultError> {
        let run_id = run_id.clone();
        self.request(|resp| StoreCommand::ListRounds { run_id, resp })
            .await
    }

    pub async fn performance(&self, run_id: &RunHandle, round: u32) -> Result<Metrics, ResultError> {
        let run_id = run_id.clone();
        self.request(|resp| StoreCommand::Performance {
            run_id,
            round,
            resp,
        })
        .await
    }

    pub async fn save_labels(
        &self,
        run_id: &RunHandle,
        round: u32,
        labels: Vec<LabeledSample>,
    ) -> Result<(), ResultError> {
        let run_id = run_id.clone();
        self.request(|resp| StoreCommand::SaveLabels {
            run_id,
            round,
            labels,
            resp,
        })
        .await
    }

    pub async fn labels(&self, run_id: &RunHandle) -> Result<Vec<LabeledSample>, ResultError> {
        let run_id = run_id.clone();
        self.request(|resp| StoreCommand::Labels { run_id, resp })
            .await
    }
}

pub fn spawn_store_server(store: Store) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(100);
    let handle = StoreHandle::new(tx);
    let join_handle = tokio::spawn(run_store_server(store, rx));
    (handle, join_handle)
}

pub async fn run_store_server(store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::SaveRun { record, resp } => {
                let _ = resp.send(store.save_run(&record));
            }
            StoreCommand::LoadRuns { resp } => {
                let _ = resp.send(store.load_runs());
            }
            StoreCommand::SaveRound { artifact, resp } => {
                let _ = resp.send(store.save_round(&artifact));
            }
            StoreCommand::GetRound {
                run_id,
                round,
                resp,
            } => {
                let _ = resp.send(store.get_round(&run_id, round));
            }
            StoreCommand::ListRounds { run_id, resp } => {
                let _ = resp.send(store.list_rounds(&run_id));
            }
            StoreCommand::Performance {
                run_id,
                round,
                resp,
            } => {
                let _ = resp.send(store.performance(&run_id, round));
            }
            StoreCommand::SaveLabels {
                run_id,
                round,
                labels,
                resp,
            } => {
                let _ = resp.send(store.save_labels(&run_id, round, &labels));
            }
            StoreCommand::Labels { run_id, resp } => {
                let _ = resp.send(store.labels(&run_id));
            }
        }
    }
    tracing::debug!("Result store server shutting down");
}
