// src/cli/serve.rs — Long-running engine: store actor, controller, HTTP API

use std::sync::Arc;

use crate::api::{self, ApiState};
use crate::core::run_config::ConfigStore;
use crate::core::workflow::ProcessWorkflowRunner;
use crate::core::IterationController;
use crate::infra::config::Config;
use crate::infra::paths;
use crate::store;

pub async fn run_serve(config: &Config, port: Option<u16>) -> anyhow::Result<()> {
    let mut api_config = config.api.clone();
    if let Some(port) = port {
        api_config.port = port;
    }
    if !api_config.enabled {
        anyhow::bail!("The HTTP API is disabled ([api].enabled = false); nothing to serve");
    }

    let db_path = config.storage.resolved_db_path();
    let work_dir = config.storage.resolved_work_dir();
    let mut dirs = vec![work_dir.clone()];
    if let Some(parent) = db_path.parent() {
        dirs.push(parent.to_path_buf());
    }
    paths::ensure_dirs(&dirs).await?;

    let store = store::open(&db_path)?;
    let (store_handle, _store_task) = store::spawn_store_server(store);
    tracing::info!("Result store at {}", db_path.display());

    let runner = Arc::new(ProcessWorkflowRunner::new(&work_dir));
    let controller =
        IterationController::new(runner, store_handle, config.webhooks.clone());
    let recovered = controller.recover().await?;
    if recovered > 0 {
        println!("Recovered {recovered} run(s)");
    }

    let state = ApiState {
        controller,
        config_store: ConfigStore::new(config.workflow.clone()),
        token: api_config.token.clone(),
    };

    println!(
        "al-engine v{} serving on http://{}:{}",
        env!("CARGO_PKG_VERSION"),
        api_config.bind,
        api_config.port
    );
    api::start_server(&api_config, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    })
    .await
}
