// src/cli/validate.rs — Check a run config without starting a run

use std::path::PathBuf;

use crate::core::run_config::{ConfigSource, ConfigStore};
use crate::infra::config::Config;

pub fn run_validate(config: &Config, file: &str, no_env: bool) -> anyhow::Result<()> {
    let store = ConfigStore::new(config.workflow.clone());
    let source = ConfigSource::File(PathBuf::from(file));

    let run_config = if no_env {
        store.load_with_env(&source, |_| None)?
    } else {
        store.load(&source)?
    };

    println!("{file}: valid");
    println!("  project:        {}", run_config.project_id);
    println!("  dataset:        {}", run_config.dataset);
    println!("  query strategy: {}", run_config.query_strategy);
    println!("  batch size:     {}", run_config.batch_size);
    match run_config.max_rounds {
        Some(n) => println!("  max rounds:     {n}"),
        None => println!("  max rounds:     unbounded"),
    }
    if let Some(es) = &run_config.early_stop {
        println!("  early stop:     {} >= {}", es.metric, es.target);
    }
    println!(
        "  workflow:       {} {} (timeout {}s)",
        run_config.workflow.runner,
        run_config.workflow.definition.display(),
        run_config.workflow.timeout_secs
    );
    Ok(())
}
