use std::path::Path;

use concerto_protocol::RunHandoff;
use concerto_protocol::is_run_handoff;
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;

pub const HANDOFF_FILENAME: &str = "handoff.json";

/// Write a JSON document atomically: serialize to a sibling temp file,
/// then rename over the target. Readers never observe a partial
/// document; the run lease already excludes concurrent writers.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let mut contents = serde_json::to_vec_pretty(value)?;
    contents.push(b'\n');
    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .ok_or_else(|| EngineError::Validation(format!("invalid artifact path {}", path.display())))?;
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub fn handoff_path(run_dir: &Path) -> std::path::PathBuf {
    run_dir.join(HANDOFF_FILENAME)
}

/// Read and validate the run's handoff document.
///
/// Parsing is tolerant (unknown fields pass through), but a document
/// failing the shape check is a validation error, not a parse error.
pub async fn read_handoff(run_dir: &Path) -> Result<RunHandoff, EngineError> {
    let path = handoff_path(run_dir);
    let contents = tokio::fs::read_to_string(&path).await?;
    let value: Value = serde_json::from_str(&contents)?;
    if !is_run_handoff(&value) {
        return Err(EngineError::Validation(format!(
            "not a run handoff: {}",
            path.display()
        )));
    }
    Ok(serde_json::from_value(value)?)
}

pub async fn write_handoff(run_dir: &Path, handoff: &RunHandoff) -> Result<(), EngineError> {
    write_json_atomic(&handoff_path(run_dir), handoff).await
}
