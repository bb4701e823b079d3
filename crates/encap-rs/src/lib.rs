//! Signature-keyed compilation cache and tensor pipeline executor.
//!
//! An [`Executor`] wraps one clustered subgraph bound to a named backend. Each
//! call computes a signature from input shapes and static input values,
//! compiles on a cache miss, resolves backend tensors while eliding
//! redundant host copies, and invokes the compiled artifact.

pub mod aot;
pub mod backend;
pub mod config;
mod env;
pub mod error;
pub mod freshness;
pub mod function;
pub mod graph;
pub mod memory;
pub mod profiling;
pub mod runtime;
pub mod signature;
pub mod tensor;
pub mod translate;

pub use aot::{parse_unit_attributes, AotTable, UnitAttributes};
pub use backend::{
    Backend, BackendError, BackendOptions, BackendResult, BackendTensor, Executable, Placement,
};
pub use config::ExecutorConfig;
pub use error::{ExecutorError, ExecutorResult};
pub use freshness::{FreshnessRegistry, FreshnessTracker, NeverFresh};
pub use function::{Function, Instruction, OpKind, ValueRef};
pub use graph::{Graph, NodeId, StaticInputs};
pub use runtime::{
    ArtifactId, ExecutionReport, ExecutionUnit, Executor, ExecutorStats, OutputBuffers,
};
pub use signature::{compute_signature, ComputedSignature, Signature};
pub use tensor::{DType, HostPtr, HostTensor, Shape, TensorSpec};
pub use translate::Translator;
