pub mod cache;
pub mod dump;
pub mod executor;
pub mod outputs;
pub mod pipeline;
pub mod slots;

pub use cache::{Artifact, ArtifactId, CompilationCache};
pub use executor::{
    ExecutableLookup, ExecutionReport, ExecutionUnit, Executor, ExecutorBuilder, ExecutorStats,
    InputTensors, OutputTensors,
};
pub use outputs::OutputBuffers;
pub use pipeline::{PipelineError, PipelinedGroup, PipelinedTensorStore};
pub use slots::{SlotKind, SlotResolution, TensorSlotCache};
