use std::path::Path;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskInputError {
    #[error("failed to read task file {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("task file {path} is not valid JSON: {source}")]
    InvalidJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("task file {path} contains no task text")]
    MissingTask { path: String },
    #[error("task description is empty")]
    Empty,
}

/// Resolve the task argument the CLI received into the task prompt.
///
/// The argument is normally the task text itself, but may instead point to
/// a `.md` file (used verbatim, trimmed) or a `.json` file containing
/// either a string or an object with one of `task` / `description` /
/// `prompt`, possibly nested one level under `task`.
pub fn resolve_task_input(raw: &str) -> Result<String, TaskInputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TaskInputError::Empty);
    }

    let path = Path::new(trimmed);
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(str::to_ascii_lowercase);
    let looks_like_file = matches!(extension.as_deref(), Some("md" | "json"));
    if !looks_like_file || !path.is_file() {
        return Ok(trimmed.to_string());
    }

    let contents = std::fs::read_to_string(path).map_err(|source| TaskInputError::Unreadable {
        path: trimmed.to_string(),
        source,
    })?;
    if extension.as_deref() == Some("md") {
        let text = contents.trim();
        if text.is_empty() {
            return Err(TaskInputError::MissingTask {
                path: trimmed.to_string(),
            });
        }
        return Ok(text.to_string());
    }

    let value: Value =
        serde_json::from_str(&contents).map_err(|source| TaskInputError::InvalidJson {
            path: trimmed.to_string(),
            source,
        })?;
    task_from_json(&value)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TaskInputError::MissingTask {
            path: trimmed.to_string(),
        })
}

fn task_from_json(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => Some(text.as_str()),
        Value::Object(object) => {
            for key in ["task", "description", "prompt"] {
                if let Some(text) = object.get(key).and_then(Value::as_str) {
                    return Some(text);
                }
            }
            // `task` may itself be an object holding the text.
            object
                .get("task")
                .filter(|nested| nested.is_object())
                .and_then(task_from_json)
        }
        _ => None,
    }
}
