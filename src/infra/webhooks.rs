// src/infra/webhooks.rs — Outbound callbacks for provenance listeners
//
// Fires HTTP POST requests to configured URLs when a round reaches a final
// state or a run terminates. Non-blocking (spawns a tokio task); the engine
// never depends on delivery succeeding.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::types::{RoundState, RunHandle, RunPhase, RunStatus};
use crate::infra::config::WebhookConfig;

/// Lifecycle event that can trigger a webhook.
#[derive(Debug, Clone)]
pub enum RoundEvent {
    /// A round was completed or failed; its artifacts will not change again.
    RoundFinalized {
        run_id: RunHandle,
        round: u32,
        state: RoundState,
        model_artifact: Option<String>,
        artifacts: BTreeMap<String, String>,
    },
    /// A run reached a terminal phase.
    RunFinished {
        run_id: RunHandle,
        project_id: String,
        status: RunStatus,
        phase: RunPhase,
        rounds: usize,
    },
}

/// JSON payload sent to the webhook URL.
#[derive(Debug, Serialize)]
struct WebhookPayload {
    event: String,
    timestamp: String,
    data: serde_json::Value,
}

/// Fire a webhook if a URL is configured for the given event type.
///
/// This spawns a background tokio task so it never blocks the caller.
pub fn fire_webhook(config: &WebhookConfig, event: RoundEvent) {
    let url = match &event {
        RoundEvent::RoundFinalized { .. } => config.on_round_finalized.clone(),
        RoundEvent::RunFinished { .. } => config.on_run_finished.clone(),
    };

    let Some(url) = url else {
        return;
    };

    let payload = build_payload(&event);

    tokio::spawn(async move {
        if let Err(e) = send_webhook(&url, &payload).await {
            tracing::warn!("Webhook delivery to {} failed: {}", url, e);
        }
    });
}

/// Build the JSON payload for an event.
fn build_payload(event: &RoundEvent) -> WebhookPayload {
    let (event_name, data) = match event {
        RoundEvent::RoundFinalized {
            run_id,
            round,
            state,
            model_artifact,
            artifacts,
        } => (
            "round.finalized",
            serde_json::json!({
                "run_id": run_id,
                "round": round,
                "state": state,
                "model_artifact": model_artifact,
                "artifacts": artifacts,
            }),
        ),
        RoundEvent::RunFinished {
            run_id,
            project_id,
            status,
            phase,
            rounds,
        } => (
            "run.finished",
            serde_json::json!({
                "run_id": run_id,
                "project_id": project_id,
                "status": status,
                "phase": phase,
                "rounds": rounds,
            }),
        ),
    };

    WebhookPayload {
        event: event_name.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        data,
    }
}

/// Send the webhook POST request.
async fn send_webhook(url: &str, payload: &WebhookPayload) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .post(url)
        .header("content-type", "application/json")
        .header("user-agent", format!("al-engine/{}", env!("CARGO_PKG_VERSION")))
        .json(payload)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        tracing::warn!("Webhook {} returned HTTP {}", url, status.as_u16());
    } else {
        tracing::debug!("Webhook delivered to {} (HTTP {})", url, status.as_u16());
    }

    Ok(())
}
