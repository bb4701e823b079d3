use crate::tensor::{HostTensor, TensorSpec};

/// Host buffers receiving a unit's results.
///
/// Buffers are reused across calls whose result specs match, which keeps
/// their host pointers stable and lets cached output tensors be reused.
#[derive(Debug, Default, Clone)]
pub struct OutputBuffers {
    buffers: Vec<HostTensor>,
}

impl OutputBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes one buffer per spec available. Returns how many were (re)allocated.
    pub fn prepare(&mut self, specs: &[TensorSpec]) -> usize {
        self.buffers.truncate(specs.len());
        let mut allocated = 0;
        for (idx, spec) in specs.iter().enumerate() {
            match self.buffers.get(idx) {
                Some(buffer) if buffer.spec() == spec => {}
                Some(_) => {
                    self.buffers[idx] = HostTensor::zeros(spec.clone());
                    allocated += 1;
                }
                None => {
                    self.buffers.push(HostTensor::zeros(spec.clone()));
                    allocated += 1;
                }
            }
        }
        allocated
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&HostTensor> {
        self.buffers.get(idx)
    }

    pub fn as_slice(&self) -> &[HostTensor] {
        &self.buffers
    }

    /// Hands the buffers to the caller; the next call allocates new ones.
    pub fn take(&mut self) -> Vec<HostTensor> {
        std::mem::take(&mut self.buffers)
    }
}
