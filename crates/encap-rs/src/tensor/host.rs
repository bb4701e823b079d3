//! Host-side tensors whose buffer identity drives copy elision.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::dtype::DType;
use super::shape::{Shape, TensorSpec};
use crate::error::{ExecutorError, ExecutorResult};

/// Address of a host buffer, used as its identity between executions.
///
/// Two host tensors share a `HostPtr` exactly when they share storage. A new
/// buffer normally gets a new address, but an allocator may hand a freed
/// address back out, so this is a heuristic rather than a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPtr(usize);

impl HostPtr {
    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for HostPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Dense byte storage behind one or more [`HostTensor`] views.
#[derive(Debug)]
pub struct HostStorage {
    bytes: RwLock<Vec<u8>>,
}

/// Host tensor with shared, dense, little-endian storage.
///
/// Cloning a `HostTensor` shares its storage, so the clone reports the same
/// [`HostPtr`].
#[derive(Debug, Clone)]
pub struct HostTensor {
    spec: TensorSpec,
    storage: Arc<HostStorage>,
}

impl HostTensor {
    /// Wraps raw bytes, validating the length against the spec.
    pub fn from_bytes(spec: TensorSpec, bytes: Vec<u8>) -> ExecutorResult<Self> {
        if bytes.len() != spec.byte_len() {
            return Err(ExecutorError::construction(format!(
                "host buffer of {} bytes does not match tensor {spec} ({} bytes)",
                bytes.len(),
                spec.byte_len()
            )));
        }
        Ok(HostTensor {
            spec,
            storage: Arc::new(HostStorage {
                bytes: RwLock::new(bytes),
            }),
        })
    }

    pub fn from_f32(shape: impl Into<Shape>, data: Vec<f32>) -> ExecutorResult<Self> {
        let bytes = data.iter().flat_map(|value| value.to_le_bytes()).collect();
        Self::from_bytes(TensorSpec::new(DType::F32, shape), bytes)
    }

    pub fn from_i32(shape: impl Into<Shape>, data: Vec<i32>) -> ExecutorResult<Self> {
        let bytes = data.iter().flat_map(|value| value.to_le_bytes()).collect();
        Self::from_bytes(TensorSpec::new(DType::I32, shape), bytes)
    }

    pub fn from_i64(shape: impl Into<Shape>, data: Vec<i64>) -> ExecutorResult<Self> {
        let bytes = data.iter().flat_map(|value| value.to_le_bytes()).collect();
        Self::from_bytes(TensorSpec::new(DType::I64, shape), bytes)
    }

    /// Zero-initialised tensor of the requested spec.
    pub fn zeros(spec: TensorSpec) -> Self {
        let len = spec.byte_len();
        HostTensor {
            spec,
            storage: Arc::new(HostStorage {
                bytes: RwLock::new(vec![0u8; len]),
            }),
        }
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn shape(&self) -> &Shape {
        &self.spec.shape
    }

    pub fn dtype(&self) -> DType {
        self.spec.dtype
    }

    pub fn byte_len(&self) -> usize {
        self.spec.byte_len()
    }

    /// Identity of the underlying buffer.
    pub fn host_ptr(&self) -> HostPtr {
        HostPtr(Arc::as_ptr(&self.storage) as *const u8 as usize)
    }

    pub fn shares_storage(&self, other: &HostTensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn bytes(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.storage
            .bytes
            .read()
            .expect("host tensor storage poisoned")
    }

    /// Mutable access for backends that write results straight into host memory.
    pub fn bytes_mut(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.storage
            .bytes
            .write()
            .expect("host tensor storage poisoned")
    }

    pub fn to_f32_vec(&self) -> ExecutorResult<Vec<f32>> {
        self.expect_dtype(DType::F32)?;
        Ok(self
            .bytes()
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Reads integer contents (`I32`, `I64` or `U8`) widened to `i64`.
    pub fn to_i64_vec(&self) -> ExecutorResult<Vec<i64>> {
        let bytes = self.bytes();
        match self.spec.dtype {
            DType::I32 => Ok(bytes
                .chunks_exact(4)
                .map(|chunk| i64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
                .collect()),
            DType::I64 => Ok(bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    i64::from_le_bytes(raw)
                })
                .collect()),
            DType::U8 => Ok(bytes.iter().map(|value| i64::from(*value)).collect()),
            other => Err(ExecutorError::Serialization(format!(
                "expected an integer tensor, found {}",
                other.name()
            ))),
        }
    }

    fn expect_dtype(&self, dtype: DType) -> ExecutorResult<()> {
        if self.spec.dtype != dtype {
            return Err(ExecutorError::Serialization(format!(
                "expected {} tensor, found {}",
                dtype.name(),
                self.spec
            )));
        }
        Ok(())
    }
}
