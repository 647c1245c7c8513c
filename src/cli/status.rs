// src/cli/status.rs — Read-only views of the persisted result store

use crate::core::types::{RoundArtifact, RoundState, RunHandle};
use crate::infra::config::Config;
use crate::store;

/// List persisted runs.
pub fn show_runs(config: &Config) -> anyhow::Result<()> {
    let Some(store) = open_existing(config)? else {
        return Ok(());
    };
    let runs = store.load_runs()?;
    if runs.is_empty() {
        println!("No runs.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<22}  {:>5}  CREATED",
        "RUN", "PROJECT", "PHASE", "ROUND"
    );
    for run in runs {
        println!(
            "{:<36}  {:<16}  {:<22}  {:>5}  {}",
            run.run_id,
            truncate(&run.config.project_id, 16),
            run.phase.to_string(),
            run.current_round,
            run.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Show the round history of one run.
pub fn show_rounds(config: &Config, run_id: &str, json: bool) -> anyhow::Result<()> {
    let Some(store) = open_existing(config)? else {
        return Ok(());
    };
    let rounds = store.list_rounds(&RunHandle::from(run_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rounds)?);
        return Ok(());
    }
    if rounds.is_empty() {
        println!("No rounds recorded for run '{run_id}'.");
        return Ok(());
    }
    for round in &rounds {
        println!("{}", format_round(round));
    }
    Ok(())
}

fn open_existing(config: &Config) -> anyhow::Result<Option<store::Store>> {
    let db_path = config.storage.resolved_db_path();
    if !db_path.exists() {
        println!("No result store at {} (run `al-engine serve` first).", db_path.display());
        return Ok(None);
    }
    Ok(Some(store::open_read_only(&db_path)?))
}

fn format_round(round: &RoundArtifact) -> String {
    let state = match &round.state {
        RoundState::Failed { kind, detail } => format!("failed ({kind}: {detail})"),
        RoundState::Running => "running".into(),
        RoundState::AwaitingLabels => "awaiting labels".into(),
        RoundState::Aggregating => "aggregating".into(),
        RoundState::Completed => "completed".into(),
    };
    let metrics = round
        .metrics
        .iter()
        .map(|(k, v)| format!("{k}={v:.4}"))
        .collect::<Vec<_>>()
        .join(" ");

    let mut line = format!(
        "  round {:>3}  {:<18}  selected {:>4}  labeled {:>4}",
        round.round_index,
        state,
        round.selected_samples.len(),
        round.labels_received
    );
    if !metrics.is_empty() {
        line.push_str("  ");
        line.push_str(&metrics);
    }
    line
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Round;
    use crate::infra::errors::WorkflowErrorKind;

    #[test]
    fn test_format_round() {
        let round = Round::started(1);
        let mut artifact = RoundArtifact::started(RunHandle::from("r"), &round);
        artifact.metrics.insert("accuracy".into(), 0.8125);
        artifact.labels_received = 3;
        let line = format_round(&artifact);
        assert!(line.contains("round   1"));
        assert!(line.contains("running"));
        assert!(line.contains("accuracy=0.8125"));

        artifact.state = RoundState::Failed {
            kind: WorkflowErrorKind::Timeout,
            detail: "exceeded 5s".into(),
        };
        assert!(format_round(&artifact).contains("failed (timeout: exceeded 5s)"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 16), "short");
        assert_eq!(truncate("a-very-long-project-name", 8), "a-very-…");
    }
}
