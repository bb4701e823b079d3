use crate::error::ExecutorResult;
use crate::function::Function;
use crate::graph::Graph;
use crate::tensor::{HostTensor, TensorSpec};

/// Lowers a unit's graph into a [`Function`] for one concrete signature.
///
/// `static_values[i]` holds the tensor at input `i` when that position is
/// static, so the translator may fold it into the body.
pub trait Translator: Send + Sync {
    fn translate(
        &self,
        graph: &Graph,
        inputs: &[TensorSpec],
        static_values: &[Option<HostTensor>],
    ) -> ExecutorResult<Function>;
}
