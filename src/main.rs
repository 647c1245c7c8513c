// src/main.rs — al-engine entry point

use clap::Parser;

use al_engine::cli::{Cli, Commands};
use al_engine::infra::config::Config;
use al_engine::infra::logger;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG)
    logger::init_logging("info");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    match cli.command {
        Commands::Serve { port } => al_engine::cli::serve::run_serve(&config, port).await,
        Commands::Validate { file, no_env } => {
            al_engine::cli::validate::run_validate(&config, &file, no_env)
        }
        Commands::Runs => al_engine::cli::status::show_runs(&config),
        Commands::Rounds { run_id, json } => {
            al_engine::cli::status::show_rounds(&config, &run_id, json)
        }
    }
}
