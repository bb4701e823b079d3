pub mod dtype;
pub mod host;
pub mod shape;

pub use dtype::DType;
pub use host::{HostPtr, HostStorage, HostTensor};
pub use shape::{Shape, TensorSpec};
