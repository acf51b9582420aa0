// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{PipelineConfig, RawPipelineFile, parent_dir};
use crate::errors::Result;

/// Load a definition file and return the raw `RawPipelineFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (DAG correctness, durations, etc.). Use [`load_and_validate`]
/// for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawPipelineFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), tasks = raw.tasks.len(), "loaded pipeline definition");

    Ok(raw)
}

/// Load a definition file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Checks for:
///   - at least one task,
///   - duplicate ids, unknown `after` references and cycles,
///   - parseable durations and sane pool/concurrency sizes.
///
/// Relative storage roots are resolved against the file's directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let config = PipelineConfig::try_from(raw)?;
    Ok(config.with_base_dir(parent_dir(path)))
}

/// `Pipeline.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipeline.toml")
}
