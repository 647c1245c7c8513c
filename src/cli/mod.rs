// src/cli/mod.rs — CLI definition (clap derive)

pub mod serve;
pub mod status;
pub mod validate;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "al-engine",
    about = "Active learning iteration engine",
    version
)]
pub struct Cli {
    /// Engine config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recover persisted runs and serve the HTTP API until Ctrl+C
    Serve {
        /// Port to listen on (overrides [api].port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Parse and validate a run config file (json, toml or yaml)
    Validate {
        /// Path to the run config
        file: String,
        /// Ignore AL_ENGINE_RUN_* environment overrides
        #[arg(long)]
        no_env: bool,
    },
    /// List persisted runs
    Runs,
    /// Show the persisted round history of a run
    Rounds {
        /// Run ID
        run_id: String,
        /// Print rounds as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_port() {
        let cli = Cli::try_parse_from(["al-engine", "serve", "--port", "8080"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { port: Some(8080) }));
    }

    #[test]
    fn test_parse_rounds_json_with_global_config() {
        let cli = Cli::try_parse_from([
            "al-engine",
            "rounds",
            "abc",
            "--json",
            "--config",
            "/tmp/engine.toml",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/engine.toml"));
        match cli.command {
            Commands::Rounds { run_id, json } => {
                assert_eq!(run_id, "abc");
                assert!(json);
            }
            _ => panic!("expected rounds"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["al-engine"]).is_err());
    }
}
