// src/infra/paths.rs — Engine home and data layout
//
// All paths respect the AL_ENGINE_HOME environment variable for isolation.
// When AL_ENGINE_HOME is set, config and data live under that directory.
// When unset, config uses ~/.al-engine/ and data uses XDG_DATA_HOME/al-engine.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the AL_ENGINE_HOME override, if set.
fn engine_home() -> Option<PathBuf> {
    std::env::var_os("AL_ENGINE_HOME").map(PathBuf::from)
}

/// Home directory, or the current directory if none can be determined.
pub fn dirs_home() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $AL_ENGINE_HOME/ or ~/.al-engine/
pub fn config_dir() -> PathBuf {
    if let Some(home) = engine_home() {
        return home;
    }
    dirs_home().join(".al-engine")
}

/// Data directory: $AL_ENGINE_HOME/data/ or ~/.local/share/al-engine/
pub fn data_dir() -> PathBuf {
    if let Some(home) = engine_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "al-engine")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Result store database
pub fn db_path() -> PathBuf {
    data_dir().join("al-engine.db")
}

/// Root of round-scoped workflow directories
pub fn work_dir() -> PathBuf {
    data_dir().join("rounds")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure the given directories exist.
pub async fn ensure_dirs(extra: &[PathBuf]) -> anyhow::Result<()> {
    let mut dirs = vec![config_dir(), data_dir()];
    dirs.extend(extra.iter().cloned());

    for dir in &dirs {
        tokio::fs::create_dir_all(dir).await?;
    }

    Ok(())
}
