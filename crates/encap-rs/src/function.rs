//! Translated function IR handed to backend compilers.
//!
//! A function is a flat SSA body over its parameters. Every graph input is a
//! parameter, including static ones whose values were folded into the body.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, ExecutorResult};
use crate::tensor::TensorSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Neg,
    Identity,
    /// Reinterprets the operand with the instruction's result shape.
    Reshape,
}

impl OpKind {
    pub fn arity(self) -> usize {
        match self {
            OpKind::Add | OpKind::Sub | OpKind::Mul => 2,
            OpKind::Neg | OpKind::Identity | OpKind::Reshape => 1,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Neg => "neg",
            OpKind::Identity => "identity",
            OpKind::Reshape => "reshape",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueRef {
    Parameter(usize),
    Instruction(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpKind,
    pub operands: Vec<ValueRef>,
    pub spec: TensorSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<TensorSpec>,
    pub results: Vec<TensorSpec>,
    pub body: Vec<Instruction>,
    pub outputs: Vec<ValueRef>,
}

impl Function {
    /// Node count reported in compile diagnostics.
    pub fn graph_size(&self) -> usize {
        self.parameters.len() + self.body.len()
    }

    /// Checks operand arity and that every reference points backwards.
    pub fn validate(&self) -> ExecutorResult<()> {
        let check = |value: ValueRef, limit: usize| -> ExecutorResult<()> {
            let ok = match value {
                ValueRef::Parameter(idx) => idx < self.parameters.len(),
                ValueRef::Instruction(idx) => idx < limit,
            };
            if ok {
                Ok(())
            } else {
                Err(ExecutorError::construction(format!(
                    "function '{}' references undefined value {value:?}",
                    self.name
                )))
            }
        };
        for (idx, inst) in self.body.iter().enumerate() {
            if inst.operands.len() != inst.op.arity() {
                return Err(ExecutorError::construction(format!(
                    "instruction {idx} ({}) expects {} operands, got {}",
                    inst.op,
                    inst.op.arity(),
                    inst.operands.len()
                )));
            }
            for operand in &inst.operands {
                check(*operand, idx)?;
            }
        }
        if self.outputs.len() != self.results.len() {
            return Err(ExecutorError::construction(format!(
                "function '{}' declares {} results but returns {} values",
                self.name,
                self.results.len(),
                self.outputs.len()
            )));
        }
        for output in &self.outputs {
            check(*output, self.body.len())?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> ExecutorResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| ExecutorError::Serialization(err.to_string()))
    }

    pub fn from_json(text: &str) -> ExecutorResult<Self> {
        serde_json::from_str(text).map_err(|err| ExecutorError::Serialization(err.to_string()))
    }
}
