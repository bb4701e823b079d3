//! Minimal dataflow subgraph handed to an execution unit.
//!
//! The graph is produced by the clustering pass outside this crate. Inputs
//! are `_Arg` nodes and outputs are `_Retval` nodes, each carrying an
//! `index` attribute that fixes its position.

pub mod static_inputs;

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, ExecutorResult};
use crate::tensor::DType;

pub use static_inputs::{DefaultStaticInputs, StaticInputQuery, StaticInputs};

/// Op name of graph input nodes.
pub const ARG_OP: &str = "_Arg";
/// Op name of graph output nodes.
pub const RETVAL_OP: &str = "_Retval";
/// Attribute holding the position of an `_Arg`/`_Retval` node.
pub const INDEX_ATTR: &str = "index";
/// Per-node override listing which of its inputs must be known at compile time.
pub const STATIC_INPUTS_ATTR: &str = "_static_inputs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Str(String),
    Bool(bool),
    IntList(Vec<i64>),
    Type(DType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Node {
    pub fn is_arg(&self) -> bool {
        self.op == ARG_OP
    }

    pub fn is_retval(&self) -> bool {
        self.op == RETVAL_OP
    }

    /// True for computational nodes, i.e. anything that is not a graph boundary.
    pub fn is_op(&self) -> bool {
        !self.is_arg() && !self.is_retval()
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(AttrValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn attr_int_list(&self, name: &str) -> Option<&[i64]> {
        match self.attrs.get(name) {
            Some(AttrValue::IntList(values)) => Some(values),
            _ => None,
        }
    }

    /// Position of a boundary node; a missing or negative `index` makes the graph unusable.
    pub fn index(&self) -> ExecutorResult<usize> {
        let index = self.attr_int(INDEX_ATTR).ok_or_else(|| {
            ExecutorError::construction(format!(
                "error getting node attribute index of '{}' ({})",
                self.name, self.op
            ))
        })?;
        usize::try_from(index).map_err(|_| {
            ExecutorError::construction(format!(
                "node '{}' has negative index {index}",
                self.name
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeId,
    pub src_output: usize,
    pub dst: NodeId,
    pub dst_input: usize,
    #[serde(default)]
    pub control: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>, op: impl Into<String>) -> NodeId {
        self.add_node_with_attrs(name, op, BTreeMap::new())
    }

    pub fn add_node_with_attrs(
        &mut self,
        name: impl Into<String>,
        op: impl Into<String>,
        attrs: BTreeMap<String, AttrValue>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            name: name.into(),
            op: op.into(),
            attrs,
        });
        id
    }

    /// Adds an `_Arg` node bound to input position `index`.
    pub fn add_arg(&mut self, name: impl Into<String>, index: usize) -> NodeId {
        let mut attrs = BTreeMap::new();
        attrs.insert(INDEX_ATTR.to_string(), AttrValue::Int(index as i64));
        self.add_node_with_attrs(name, ARG_OP, attrs)
    }

    /// Adds a `_Retval` node bound to output position `index`.
    pub fn add_retval(&mut self, name: impl Into<String>, index: usize) -> NodeId {
        let mut attrs = BTreeMap::new();
        attrs.insert(INDEX_ATTR.to_string(), AttrValue::Int(index as i64));
        self.add_node_with_attrs(name, RETVAL_OP, attrs)
    }

    pub fn set_attr(&mut self, node: NodeId, name: impl Into<String>, value: AttrValue) {
        if let Some(node) = self.nodes.get_mut(node.0) {
            node.attrs.insert(name.into(), value);
        }
    }

    pub fn add_edge(&mut self, src: NodeId, src_output: usize, dst: NodeId, dst_input: usize) {
        self.edges.push(Edge {
            src,
            src_output,
            dst,
            dst_input,
            control: false,
        });
    }

    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) {
        self.edges.push(Edge {
            src,
            src_output: 0,
            dst,
            dst_input: 0,
            control: true,
        });
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn out_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |edge| edge.src == id)
    }

    /// Data inputs of `id`, ordered by input slot.
    pub fn data_inputs(&self, id: NodeId) -> Vec<&Edge> {
        let mut inputs: Vec<&Edge> = self
            .edges
            .iter()
            .filter(|edge| edge.dst == id && !edge.control)
            .collect();
        inputs.sort_by_key(|edge| edge.dst_input);
        inputs
    }

    pub fn arg_nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter(|node| node.is_arg())
    }

    /// Kahn ordering over data and control edges; cycles are a construction error.
    pub fn topological_order(&self) -> ExecutorResult<Vec<NodeId>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            let slot = in_degree.get_mut(edge.dst.0).ok_or_else(|| {
                ExecutorError::construction(format!("edge targets unknown node {}", edge.dst.0))
            })?;
            *slot += 1;
        }
        let mut ready: VecDeque<NodeId> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| NodeId(idx))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for edge in self.out_edges(id) {
                let degree = &mut in_degree[edge.dst.0];
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(edge.dst);
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(ExecutorError::construction("graph contains a cycle"));
        }
        Ok(order)
    }
}
