//! Detection of inputs whose values must be known when compiling.
//!
//! An `_Arg` is static when any op consuming it reads that operand at
//! compile time (a target shape, a permutation, reduction axes...). The
//! answer is computed once per unit and never changes afterwards.

use super::{Graph, Node, STATIC_INPUTS_ATTR};
use crate::error::ExecutorResult;

/// Answers whether operand `input` of `node` is consumed at compile time.
pub trait StaticInputQuery: Send + Sync {
    fn input_is_static(&self, node: &Node, input: usize) -> bool;
}

/// Reads the `_static_inputs` node attribute and falls back to a table of
/// well-known shape-driving operands.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStaticInputs;

impl DefaultStaticInputs {
    fn table(op: &str) -> &'static [usize] {
        match op {
            "Fill" => &[0],
            "Reshape" | "Tile" | "Transpose" | "Pad" | "ExpandDims" | "OneHot" | "Sum"
            | "Mean" | "Max" | "Min" | "Prod" | "All" | "Any" | "ArgMax" | "ArgMin"
            | "BroadcastTo" | "Squeeze" | "ResizeBilinear" => &[1],
            "Slice" => &[1, 2],
            "StridedSlice" => &[1, 2, 3],
            "ScatterNd" => &[2],
            "Conv2DBackpropInput" => &[0],
            "Conv2DBackpropFilter" => &[1],
            _ => &[],
        }
    }
}

impl StaticInputQuery for DefaultStaticInputs {
    fn input_is_static(&self, node: &Node, input: usize) -> bool {
        if let Some(positions) = node.attr_int_list(STATIC_INPUTS_ATTR) {
            return positions.iter().any(|position| *position == input as i64);
        }
        Self::table(&node.op).contains(&input)
    }
}

/// One flag per input position, `true` when the position's value feeds the signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticInputs {
    flags: Vec<bool>,
}

impl StaticInputs {
    pub fn from_flags(flags: Vec<bool>) -> Self {
        Self { flags }
    }

    /// Scans every `_Arg` node of `graph`.
    ///
    /// The collection has `max_index + 1` entries; positions without an
    /// `_Arg` node stay non-static. Control edges and edges into boundary
    /// nodes are ignored.
    pub fn analyze(graph: &Graph, query: &dyn StaticInputQuery) -> ExecutorResult<Self> {
        let mut args = Vec::new();
        let mut size = 0usize;
        for node in graph.arg_nodes() {
            let index = node.index()?;
            size = size.max(index + 1);
            args.push((node, index));
        }

        let mut flags = vec![false; size];
        for (node, index) in args {
            let is_static = graph.out_edges(node.id).any(|edge| {
                if edge.control {
                    return false;
                }
                match graph.node(edge.dst) {
                    Some(dst) if dst.is_op() => query.input_is_static(dst, edge.dst_input),
                    _ => false,
                }
            });
            tracing::trace!(arg = index, is_static, "static input analysis");
            flags[index] = is_static;
        }
        Ok(Self { flags })
    }

    /// Positions beyond the analysed range are treated as dynamic.
    pub fn is_static(&self, position: usize) -> bool {
        self.flags.get(position).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.flags
    }

    pub fn static_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag)
            .map(|(idx, _)| idx)
    }
}
