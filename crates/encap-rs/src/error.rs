//! Error taxonomy shared by every execution unit.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by signature computation, compilation and execution.
///
/// Every variant carries enough context (unit, backend, signature) to be
/// correlated with the diagnostics written during compilation.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The named backend is not registered or cannot serve this unit.
    #[error("backend '{name}' is not available")]
    BackendUnavailable { name: String },

    /// The backend failed to translate, compile or load a function.
    #[error("error compiling '{unit}' on backend '{backend}' for signature '{signature}': {message}")]
    CompileFailed {
        unit: String,
        backend: String,
        signature: String,
        message: String,
        dump: Option<PathBuf>,
    },

    /// A bounded resource (pipeline group, cached tensors) ran out.
    #[error("resource exhausted in '{unit}': {message}")]
    ResourceExhausted { unit: String, message: String },

    /// Configuration or AOT attributes are inconsistent.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The subgraph handed to the unit is malformed.
    #[error("malformed graph: {0}")]
    Construction(String),

    /// Unexpected state such as a cache miss for a known artifact or a failed copy.
    #[error("internal error in '{unit}': {message}")]
    Internal { unit: String, message: String },

    /// A tensor value could not be serialized into a signature.
    #[error("failed to serialize tensor value: {0}")]
    Serialization(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ExecutorError {
    pub fn internal(unit: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutorError::Internal {
            unit: unit.into(),
            message: message.into(),
        }
    }

    pub fn exhausted(unit: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutorError::ResourceExhausted {
            unit: unit.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ExecutorError::ConfigInvalid(message.into())
    }

    pub fn construction(message: impl Into<String>) -> Self {
        ExecutorError::Construction(message.into())
    }

    /// Compile errors leave the cache untouched, so the same call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::CompileFailed { .. } | ExecutorError::ResourceExhausted { .. }
        )
    }
}

/// Convenience alias for results returned by the executor and its components.
pub type ExecutorResult<T> = Result<T, ExecutorError>;
