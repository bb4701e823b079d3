//! Function dumps written for offline inspection.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExecutorError, ExecutorResult};
use crate::function::Function;

pub fn function_path(dir: &Path, unit: &str) -> PathBuf {
    dir.join(format!("function_{unit}.json"))
}

pub fn error_function_path(dir: &Path, unit: &str) -> PathBuf {
    dir.join(format!("function_error_{unit}.json"))
}

pub fn write_function(path: &Path, function: &Function) -> ExecutorResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                ExecutorError::Serialization(format!("creating {}: {err}", parent.display()))
            })?;
        }
    }
    let text = function.to_json()?;
    fs::write(path, text)
        .map_err(|err| ExecutorError::Serialization(format!("writing {}: {err}", path.display())))
}

/// Writes the dump, logging instead of failing. Returns the path on success.
pub fn write_function_best_effort(path: PathBuf, function: &Function) -> Option<PathBuf> {
    match write_function(&path, function) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "wrote function dump");
            Some(path)
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to write function dump");
            None
        }
    }
}
