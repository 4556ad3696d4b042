//! Shared helpers for command modules: store/config resolution and file IO.

use std::path::{Path, PathBuf};

use mc3d_recon::{JsonDirStore, ReconConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::exit_codes::{EXIT_INVALID_CONFIG, EXIT_RUNTIME};
use crate::CliError;

/// Explicit `--store` / `$MC3D_STORE`, else `<data dir>/mc3d-source`.
pub fn store_dir(store: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match store {
        Some(dir) => Ok(dir),
        None => dirs::data_dir()
            .map(|d| d.join("mc3d-source"))
            .ok_or_else(|| {
                CliError::args("cannot determine a data directory")
                    .with_hint("pass --store DIR or set MC3D_STORE")
            }),
    }
}

pub fn open_store(store: Option<PathBuf>) -> Result<JsonDirStore, CliError> {
    let dir = store_dir(store)?;
    tracing::debug!(store = %dir.display(), "opening store");
    Ok(JsonDirStore::open(dir)?)
}

/// Load and validate a config file. Without a path, defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<ReconConfig, CliError> {
    let Some(path) = path else {
        return Ok(ReconConfig::default());
    };
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        CliError::new(EXIT_INVALID_CONFIG, format!("cannot read config {}: {e}", path.display()))
    })?;
    Ok(ReconConfig::from_toml(&config_str)?)
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| CliError::args(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&data)
        .map_err(|e| CliError::args(format!("invalid JSON in {}: {e}", path.display())))
}

pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))
}

/// Write `contents` to `path` (atomic: write .tmp then rename).
pub fn write_output(path: &Path, contents: &str) -> Result<(), CliError> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)
        .map_err(|e| CliError::new(EXIT_RUNTIME, format!("cannot write output: {e}")))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        CliError::new(EXIT_RUNTIME, format!("failed to rename tmp to output: {e}"))
    })?;
    eprintln!("wrote {}", path.display());
    Ok(())
}
