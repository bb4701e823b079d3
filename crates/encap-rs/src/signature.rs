//! Cache keys derived from input shapes and static input values.

use std::fmt::{self, Write as _};

use crate::error::{ExecutorError, ExecutorResult};
use crate::graph::StaticInputs;
use crate::tensor::{DType, HostTensor, TensorSpec};

/// Opaque, totally ordered cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(String);

impl Signature {
    pub fn new(raw: impl Into<String>) -> Self {
        Signature(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Signature {
    fn from(raw: &str) -> Self {
        Signature(raw.to_string())
    }
}

/// Result of [`compute_signature`].
#[derive(Debug, Clone)]
pub struct ComputedSignature {
    /// Spec of every input, in position order.
    pub input_shapes: Vec<TensorSpec>,
    /// Static inputs by position; `None` for dynamic positions.
    pub static_values: Vec<Option<HostTensor>>,
    pub signature: Signature,
}

/// Builds the cache key for one call.
///
/// Each input contributes its dimensions (each followed by `,`) and a `;`.
/// A `/` closes the shape section, after which every static input
/// contributes its value dump followed by `;`. Only shapes and static values
/// are read.
pub fn compute_signature(
    inputs: &[HostTensor],
    static_inputs: &StaticInputs,
) -> ExecutorResult<ComputedSignature> {
    let mut raw = String::new();
    let mut input_shapes = Vec::with_capacity(inputs.len());
    for input in inputs {
        for dim in input.shape().dims() {
            let _ = write!(raw, "{dim},");
        }
        raw.push(';');
        input_shapes.push(input.spec().clone());
    }
    raw.push('/');

    let mut static_values = vec![None; inputs.len()];
    for (position, input) in inputs.iter().enumerate() {
        if !static_inputs.is_static(position) {
            continue;
        }
        dump_value(input, &mut raw)?;
        raw.push(';');
        static_values[position] = Some(input.clone());
    }

    Ok(ComputedSignature {
        input_shapes,
        static_values,
        signature: Signature(raw),
    })
}

/// Appends the canonical text form of `tensor`'s elements, comma separated.
pub fn dump_value(tensor: &HostTensor, out: &mut String) -> ExecutorResult<()> {
    let dtype = tensor.dtype();
    let bytes = tensor.bytes();
    let width = dtype.size_in_bytes();
    if bytes.len() != tensor.byte_len() {
        return Err(ExecutorError::Serialization(format!(
            "tensor {} holds {} bytes, expected {}",
            tensor.spec(),
            bytes.len(),
            tensor.byte_len()
        )));
    }
    for (idx, chunk) in bytes.chunks_exact(width).enumerate() {
        if idx > 0 {
            out.push(',');
        }
        let _ = match dtype {
            DType::F32 => write!(
                out,
                "{:?}",
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
            ),
            DType::F64 => write!(out, "{:?}", f64::from_le_bytes(le8(chunk))),
            DType::I32 => write!(
                out,
                "{}",
                i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
            ),
            DType::I64 => write!(out, "{}", i64::from_le_bytes(le8(chunk))),
            DType::U8 => write!(out, "{}", chunk[0]),
            DType::Bool => write!(out, "{}", chunk[0] != 0),
        };
    }
    Ok(())
}

fn le8(chunk: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(chunk);
    raw
}
