// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// Result store throughput:
//   1. Startup — open + schema migration
//   2. Round persistence — save a round artifact with a full batch selection
//   3. History reads — list the rounds of a long run, load its labels

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use al_engine::core::run_config::{RunConfig, WorkflowSpec};
use al_engine::core::types::*;
use al_engine::store::{self, Store};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn config() -> RunConfig {
    RunConfig {
        project_id: "bench".into(),
        dataset: "pool.csv".into(),
        query_strategy: "uncertainty".into(),
        batch_size: 100,
        max_rounds: None,
        workflow: WorkflowSpec {
            definition: "al.cwl".into(),
            runner: "cwltool".into(),
            args: vec![],
            env: Default::default(),
            timeout_secs: 3600,
        },
        early_stop: None,
        label_space: vec![],
        strategy_params: Default::default(),
        auto_advance: true,
    }
}

fn setup_store(run: &RunHandle) -> Store {
    let store = store::open_in_memory().expect("open in-memory db");
    let now = Utc::now();
    store
        .save_run(&RunRecord {
            run_id: run.clone(),
            config: config(),
            phase: RunPhase::RunningWorkflow,
            current_round: 0,
            stop_requested: false,
            created_at: now,
            updated_at: now,
        })
        .expect("save run");
    store
}

fn round_artifact(run: &RunHandle, index: u32, batch: usize) -> RoundArtifact {
    let round = Round::started(index);
    let mut artifact = RoundArtifact::started(run.clone(), &round);
    artifact.state = RoundState::AwaitingLabels;
    artifact.selected_samples = (0..batch)
        .map(|i| SelectedSample {
            sample_id: format!("r{index}-s{i}"),
            sample_data: Some(serde_json::json!({ "text": format!("sample text {i}") })),
            original_index: Some((index as u64) * 1000 + i as u64),
        })
        .collect();
    artifact.metrics.insert("accuracy".into(), 0.5 + index as f64 / 1000.0);
    artifact.model_artifact = Some(format!("/work/{run}/round_{index}/model.pkl"));
    artifact
}

/// Populate a store with `rounds` rounds of `batch` samples, all labeled.
fn populate(store: &Store, run: &RunHandle, rounds: u32, batch: usize) {
    for index in 0..rounds {
        let mut artifact = round_artifact(run, index, batch);
        let labels: Vec<LabeledSample> = artifact
            .selected_samples
            .iter()
            .map(|s| LabeledSample::new(s.sample_id.clone(), "cat"))
            .collect();
        store.save_labels(run, index, &labels).expect("save labels");
        artifact.state = RoundState::Completed;
        artifact.labels_received = labels.len() as u32;
        artifact.finalized = true;
        store.save_round(&artifact).expect("save round");
    }
}

// ─── Benchmarks ─────────────────────────────────────────────────────────────

fn bench_startup(c: &mut Criterion) {
    c.bench_function("store_open_in_memory", |b| {
        b.iter(|| {
            let store = store::open_in_memory().expect("open");
            black_box(store);
        })
    });
}

fn bench_save_round(c: &mut Criterion) {
    let run = RunHandle::from("bench-run");
    let store = setup_store(&run);
    let artifact = round_artifact(&run, 0, 100);

    c.bench_function("save_round_batch_100", |b| {
        b.iter(|| {
            store.save_round(black_box(&artifact)).expect("save round");
        })
    });
}

fn bench_history(c: &mut Criterion) {
    let run = RunHandle::from("bench-run");
    let store = setup_store(&run);
    populate(&store, &run, 50, 100);

    c.bench_function("list_rounds_50x100", |b| {
        b.iter(|| {
            let rounds = store.list_rounds(black_box(&run)).expect("list rounds");
            black_box(rounds);
        })
    });

    c.bench_function("load_labels_5000", |b| {
        b.iter(|| {
            let labels = store.labels(black_box(&run)).expect("labels");
            black_box(labels);
        })
    });
}

criterion_group!(benches, bench_startup, bench_save_round, bench_history);
criterion_main!(benches);
