use std::path::Path;

use chrono::Utc;
use concerto_protocol::ErrorArtifact;
use concerto_protocol::Phase;
use concerto_protocol::error_artifact_name;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;
use crate::handoff_io::write_json_atomic;

/// Write one phase artifact into the run directory.
pub async fn write_artifact<T: Serialize>(
    run_dir: &Path,
    name: &str,
    value: &T,
) -> Result<(), EngineError> {
    write_json_atomic(&run_dir.join(name), value).await
}

pub async fn read_artifact<T: DeserializeOwned>(
    run_dir: &Path,
    name: &str,
) -> Result<T, EngineError> {
    let contents = tokio::fs::read_to_string(run_dir.join(name)).await?;
    Ok(serde_json::from_str(&contents)?)
}

/// Like [`read_artifact`] but maps a missing file to `None`.
pub async fn try_read_artifact<T: DeserializeOwned>(
    run_dir: &Path,
    name: &str,
) -> Result<Option<T>, EngineError> {
    match tokio::fs::read_to_string(run_dir.join(name)).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Record a phase failure as the `*.error.json` sibling of the phase
/// artifact.
pub async fn write_error_artifact(
    run_dir: &Path,
    phase: Phase,
    message: &str,
) -> Result<(), EngineError> {
    let artifact = ErrorArtifact {
        phase,
        message: message.to_string(),
        at: Utc::now(),
    };
    write_artifact(run_dir, error_artifact_name(phase).as_str(), &artifact).await
}
