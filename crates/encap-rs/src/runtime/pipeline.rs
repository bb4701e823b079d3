//! Fixed-depth ring of pre-created tensor groups for backends whose
//! executables own tensor allocation.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;

use super::slots::SlotKind;
use crate::backend::BackendTensor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("bad input/output length, inputs: {inputs} outputs: {outputs}")]
    EmptyIo { inputs: usize, outputs: usize },
    #[error("{kind} {position} has {found} pipelined tensors, expected {depth}")]
    Ragged {
        kind: SlotKind,
        position: usize,
        found: usize,
        depth: usize,
    },
    #[error("pipeline depth must be at least 1")]
    ZeroDepth,
    #[error("buffer index {index} is not in flight")]
    NotInFlight { index: usize },
}

/// One set of input and output tensors sharing a buffer index.
pub struct PipelinedGroup<T> {
    pub index: usize,
    pub inputs: Vec<Arc<T>>,
    pub outputs: Vec<Arc<T>>,
}

pub struct PipelinedTensorStore<T> {
    inputs: Vec<Vec<Arc<T>>>,
    outputs: Vec<Vec<Arc<T>>>,
    depth: usize,
    free: VecDeque<usize>,
    in_flight: Vec<bool>,
}

impl<T: BackendTensor> PipelinedTensorStore<T> {
    /// Builds the store from `[num_inputs][depth]` and `[num_outputs][depth]` matrices.
    pub fn new(
        inputs: Vec<Vec<Arc<T>>>,
        outputs: Vec<Vec<Arc<T>>>,
        depth: usize,
    ) -> Result<Self, PipelineError> {
        if inputs.is_empty() || outputs.is_empty() {
            return Err(PipelineError::EmptyIo {
                inputs: inputs.len(),
                outputs: outputs.len(),
            });
        }
        if depth == 0 {
            return Err(PipelineError::ZeroDepth);
        }
        let rows = inputs
            .iter()
            .enumerate()
            .map(|(position, row)| (SlotKind::Input, position, row))
            .chain(
                outputs
                    .iter()
                    .enumerate()
                    .map(|(position, row)| (SlotKind::Output, position, row)),
            );
        for (kind, position, row) in rows {
            if row.len() != depth {
                return Err(PipelineError::Ragged {
                    kind,
                    position,
                    found: row.len(),
                    depth,
                });
            }
        }
        Ok(Self {
            inputs,
            outputs,
            depth,
            free: (0..depth).collect(),
            in_flight: vec![false; depth],
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn in_flight(&self) -> usize {
        self.depth - self.free.len()
    }

    /// Hands out the next free group, or `None` when every group is in flight.
    pub fn get_tensors(&mut self) -> Option<PipelinedGroup<T>> {
        let index = self.free.pop_front()?;
        self.in_flight[index] = true;
        Some(PipelinedGroup {
            index,
            inputs: self.inputs.iter().map(|row| Arc::clone(&row[index])).collect(),
            outputs: self.outputs.iter().map(|row| Arc::clone(&row[index])).collect(),
        })
    }

    pub fn return_tensors(&mut self, index: usize) -> Result<(), PipelineError> {
        match self.in_flight.get_mut(index) {
            Some(flag) if *flag => {
                *flag = false;
                self.free.push_back(index);
                Ok(())
            }
            _ => Err(PipelineError::NotInFlight { index }),
        }
    }

    pub fn input_size_in_bytes(&self) -> usize {
        matrix_bytes(&self.inputs)
    }

    pub fn output_size_in_bytes(&self) -> usize {
        matrix_bytes(&self.outputs)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.input_size_in_bytes() + self.output_size_in_bytes()
    }
}

fn matrix_bytes<T: BackendTensor>(matrix: &[Vec<Arc<T>>]) -> usize {
    matrix
        .iter()
        .flatten()
        .map(|tensor| tensor.size_in_bytes())
        .sum()
}
