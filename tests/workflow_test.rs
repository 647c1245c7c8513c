// tests/workflow_test.rs — Integration test: process workflow runner driven by sh scripts

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use al_engine::core::run_config::{RunConfig, WorkflowSpec};
use al_engine::core::types::{InputSnapshot, LabeledSample, RunHandle};
use al_engine::core::workflow::{cancel_pair, ProcessWorkflowRunner, WorkflowRunner, INPUT_FILE};
use al_engine::infra::errors::WorkflowErrorKind;

fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    path
}

fn config(script: &Path, batch_size: u32, timeout_secs: u64) -> RunConfig {
    RunConfig {
        project_id: "proj".into(),
        dataset: "pool.csv".into(),
        query_strategy: "uncertainty".into(),
        batch_size,
        max_rounds: Some(3),
        workflow: WorkflowSpec {
            definition: script.to_path_buf(),
            runner: "sh".into(),
            args: vec!["{definition}".into(), "{input}".into(), "{output_dir}".into()],
            env: [("AL_TEST_FLAVOR".to_string(), "vanilla".to_string())]
                .into_iter()
                .collect(),
            timeout_secs,
        },
        early_stop: None,
        label_space: vec![],
        strategy_params: Default::default(),
        auto_advance: true,
    }
}

fn input(run: &str, round: u32) -> InputSnapshot {
    InputSnapshot {
        run_id: RunHandle::from(run),
        round_index: round,
        labeled_samples: vec![LabeledSample::new("s0", "cat")],
        pending_samples: vec!["s9".into()],
        previous_model: None,
    }
}

#[tokio::test]
async fn test_successful_round() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "ok.sh",
        r#"grep -q '"sample_id": "s0"' "$1" || exit 3
cat > "$2/output.json" <<EOF
{"selected_samples": ["s1", {"sample_id": "s2", "original_index": 7}],
 "model_path": "model-$AL_ENGINE_ROUND-$AL_TEST_FLAVOR.pkl",
 "metrics": {"accuracy": 0.81},
 "artifacts": {"log": "train.log"}}
EOF"#,
    );
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (_cancel, signal) = cancel_pair();

    let outcome = runner
        .execute(2, &config(&script, 2, 30), &input("run-a", 2), signal)
        .await
        .unwrap();

    let ids: Vec<&str> = outcome
        .selected_samples
        .iter()
        .map(|s| s.sample_id.as_str())
        .collect();
    assert_eq!(ids, vec!["s1", "s2"]);
    assert_eq!(outcome.selected_samples[1].original_index, Some(7));
    assert_eq!(outcome.metrics["accuracy"], 0.81);

    let round_dir = std::path::absolute(runner.round_dir(&RunHandle::from("run-a"), 2)).unwrap();
    assert_eq!(
        outcome.model_artifact.as_deref(),
        Some(round_dir.join("model-2-vanilla.pkl").to_str().unwrap())
    );
    assert!(round_dir.join(INPUT_FILE).exists());
    assert!(outcome.timing.finished_at >= outcome.timing.started_at);
}

#[tokio::test]
async fn test_nonzero_exit_reports_stderr_and_discards_round() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "crash.sh",
        "echo 'ValueError: pool is empty' >&2\nexit 4",
    );
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (_cancel, signal) = cancel_pair();

    let err = runner
        .execute(0, &config(&script, 2, 30), &input("run-b", 0), signal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::ExecutionFailed);
    assert!(err.detail.contains("status 4"), "{}", err.detail);
    assert!(err.detail.contains("pool is empty"), "{}", err.detail);
    assert!(!runner.round_dir(&RunHandle::from("run-b"), 0).exists());
}

#[tokio::test]
async fn test_oversized_selection_is_malformed() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "greedy.sh",
        r#"echo '{"selected_samples": ["a", "b", "c"]}' > "$2/output.json""#,
    );
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (_cancel, signal) = cancel_pair();

    let err = runner
        .execute(0, &config(&script, 2, 30), &input("run-c", 0), signal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::MalformedOutput);
}

#[tokio::test]
async fn test_missing_output_is_malformed() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(tmp.path(), "silent.sh", "exit 0");
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (_cancel, signal) = cancel_pair();

    let err = runner
        .execute(0, &config(&script, 2, 30), &input("run-d", 0), signal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::MalformedOutput);
}

#[tokio::test]
async fn test_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(tmp.path(), "slow.sh", "sleep 30");
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (_cancel, signal) = cancel_pair();

    let started = std::time::Instant::now();
    let err = runner
        .execute(0, &config(&script, 2, 1), &input("run-e", 0), signal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[tokio::test]
async fn test_cancel_kills_workflow() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(tmp.path(), "slow.sh", "sleep 30");
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (cancel, signal) = cancel_pair();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let err = runner
        .execute(0, &config(&script, 2, 60), &input("run-f", 0), signal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::Cancelled);
}

#[tokio::test]
async fn test_missing_runner_binary() {
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(tmp.path(), "ok.sh", "exit 0");
    let mut cfg = config(&script, 2, 30);
    cfg.workflow.runner = "definitely-not-a-real-runner-binary".into();
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (_cancel, signal) = cancel_pair();

    let err = runner
        .execute(0, &cfg, &input("run-g", 0), signal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::ExecutionFailed);
    assert!(err.detail.contains("not found"));
}

#[cfg(target_os = "linux")]
fn process_gone(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // Zombies are dead but wait for their new parent to reap them
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_spawned_tools() {
    let tmp = tempfile::tempdir().unwrap();
    let pid_file = tmp.path().join("tool.pid");
    let script = write_script(
        tmp.path(),
        "spawner.sh",
        "sleep 30 &\necho $! > \"$AL_TEST_PIDFILE\"\nwait",
    );
    let mut cfg = config(&script, 2, 1);
    cfg.workflow.env.insert(
        "AL_TEST_PIDFILE".into(),
        pid_file.to_string_lossy().into_owned(),
    );
    let runner = ProcessWorkflowRunner::new(tmp.path().join("work"));
    let (_cancel, signal) = cancel_pair();

    let err = runner
        .execute(0, &cfg, &input("run-h", 0), signal)
        .await
        .unwrap_err();
    assert_eq!(err.kind, WorkflowErrorKind::Timeout);

    let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !process_gone(&pid) {
        assert!(std::time::Instant::now() < deadline, "tool {pid} outlived the workflow");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
