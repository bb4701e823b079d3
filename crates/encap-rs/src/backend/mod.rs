//! Capability interface the executor consumes from a backend library.
//!
//! A backend compiles [`Function`]s into executables, hands out tensors and,
//! when its executables own allocation, pre-creates pipelined tensor groups.

pub mod manager;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::function::Function;
use crate::tensor::{HostTensor, TensorSpec};

pub use manager::{
    get_backend, has_backend, list_backends, register_backend, unregister_backend,
    with_backend_lock,
};

/// Error raised by backend routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Free-form options forwarded from unit attributes to the backend.
pub type BackendOptions = BTreeMap<String, String>;

/// Where a backend keeps tensor storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Tensors alias host buffers directly; no host-to-device copies happen.
    Host,
    /// Tensors own private storage that has to be written from the host.
    Device,
}

impl Placement {
    pub fn is_host_bound(self) -> bool {
        matches!(self, Placement::Host)
    }
}

/// Backend-native tensor handle.
///
/// Handles are shared through `Arc`, so mutation goes through `&self`.
pub trait BackendTensor: Send + Sync {
    fn spec(&self) -> &TensorSpec;

    fn element_count(&self) -> usize {
        self.spec().element_count()
    }

    /// Bytes of storage held by this tensor.
    fn size_in_bytes(&self) -> usize {
        self.spec().byte_len()
    }

    /// Copies `src` into the tensor starting at byte `offset`.
    fn write(&self, src: &[u8], offset: usize) -> BackendResult<()>;

    /// Copies tensor contents starting at byte `offset` into `dst`.
    fn read(&self, dst: &mut [u8], offset: usize) -> BackendResult<()>;

    fn is_stale(&self) -> bool;

    fn set_stale(&self, stale: bool);
}

/// Compiled, invocable form of a [`Function`].
pub trait Executable: Send + Sync {
    type Tensor: BackendTensor;

    fn parameters(&self) -> &[TensorSpec];

    fn results(&self) -> &[TensorSpec];

    /// Runs the executable. `None` entries are positions bound to external storage.
    fn call(
        &self,
        outputs: &[Option<Arc<Self::Tensor>>],
        inputs: &[Option<Arc<Self::Tensor>>],
    ) -> BackendResult<()>;

    /// Creates `depth` tensors for input `position`, one per pipeline slot.
    fn create_input_tensors(
        &self,
        position: usize,
        depth: usize,
    ) -> BackendResult<Vec<Arc<Self::Tensor>>> {
        let _ = (position, depth);
        Err(BackendError::unimplemented(
            "create_input_tensors",
            "executable does not own tensor allocation",
        ))
    }

    /// Creates `depth` tensors for output `position`, one per pipeline slot.
    fn create_output_tensors(
        &self,
        position: usize,
        depth: usize,
    ) -> BackendResult<Vec<Arc<Self::Tensor>>> {
        let _ = (position, depth);
        Err(BackendError::unimplemented(
            "create_output_tensors",
            "executable does not own tensor allocation",
        ))
    }

    /// Serialized form accepted by [`Backend::load`].
    fn serialize(&self) -> BackendResult<Vec<u8>>;
}

/// A named backend instance shared by every execution unit that targets it.
pub trait Backend: Send + Sync + 'static {
    type Tensor: BackendTensor + 'static;
    type Executable: Executable<Tensor = Self::Tensor> + 'static;

    /// Returns a human-readable backend identifier (e.g., `"CPU"`).
    fn backend_name(&self) -> &str;

    fn placement(&self) -> Placement;

    /// Whether executables pre-create pipelined tensor groups.
    fn executable_can_create_tensors(&self) -> bool {
        false
    }

    fn compile(&self, function: &Function) -> BackendResult<Arc<Self::Executable>>;

    fn load(&self, serialized: &[u8]) -> BackendResult<Arc<Self::Executable>>;

    /// Releases resources the backend keeps for `executable`.
    fn remove_compiled_function(&self, executable: &Arc<Self::Executable>);

    /// Creates a tensor. Host-bound backends alias `host` when it is given.
    fn create_tensor(
        &self,
        spec: &TensorSpec,
        host: Option<&HostTensor>,
    ) -> BackendResult<Arc<Self::Tensor>>;

    fn set_config(&self, options: &BackendOptions) -> BackendResult<()> {
        let _ = options;
        Ok(())
    }
}
