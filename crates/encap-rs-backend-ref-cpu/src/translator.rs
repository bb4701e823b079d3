//! Lowers graphs built from elementwise ops and `Reshape` into functions.

use std::collections::HashMap;

use encap_rs::error::{ExecutorError, ExecutorResult};
use encap_rs::function::{Function, Instruction, OpKind, ValueRef};
use encap_rs::graph::{Graph, Node, NodeId};
use encap_rs::tensor::{HostTensor, Shape, TensorSpec};
use encap_rs::translate::Translator;

#[derive(Debug, Default, Clone, Copy)]
pub struct RefTranslator;

impl RefTranslator {
    fn op_kind(node: &Node) -> ExecutorResult<OpKind> {
        match node.op.as_str() {
            "Add" => Ok(OpKind::Add),
            "Sub" => Ok(OpKind::Sub),
            "Mul" => Ok(OpKind::Mul),
            "Neg" => Ok(OpKind::Neg),
            "Identity" => Ok(OpKind::Identity),
            "Reshape" => Ok(OpKind::Reshape),
            other => Err(ExecutorError::construction(format!(
                "unsupported op '{other}' on node '{}'",
                node.name
            ))),
        }
    }
}

struct Lowering<'a> {
    graph: &'a Graph,
    inputs: &'a [TensorSpec],
    static_values: &'a [Option<HostTensor>],
    body: Vec<Instruction>,
    values: HashMap<(NodeId, usize), (ValueRef, TensorSpec)>,
}

impl Lowering<'_> {
    fn operand(&self, node: &Node, input: usize) -> ExecutorResult<(NodeId, ValueRef, TensorSpec)> {
        let edges = self.graph.data_inputs(node.id);
        let edge = edges
            .iter()
            .find(|edge| edge.dst_input == input)
            .ok_or_else(|| {
                ExecutorError::construction(format!("node '{}' is missing input {input}", node.name))
            })?;
        let (value, spec) = self
            .values
            .get(&(edge.src, edge.src_output))
            .cloned()
            .ok_or_else(|| {
                ExecutorError::construction(format!(
                    "input {input} of node '{}' is produced by an unlowered node",
                    node.name
                ))
            })?;
        Ok((edge.src, value, spec))
    }

    /// Target shape of a `Reshape`, read from the static value feeding input 1.
    fn reshape_target(&self, node: &Node, element_count: usize) -> ExecutorResult<Shape> {
        let (src, _, _) = self.operand(node, 1)?;
        let position = self
            .graph
            .node(src)
            .filter(|src| src.is_arg())
            .map(|src| src.index())
            .transpose()?
            .ok_or_else(|| {
                ExecutorError::construction(format!(
                    "shape of reshape '{}' must come straight from a graph input",
                    node.name
                ))
            })?;
        let tensor = self
            .static_values
            .get(position)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                ExecutorError::construction(format!(
                    "shape of reshape '{}' (input {position}) is not a static input",
                    node.name
                ))
            })?;
        let requested = tensor.to_i64_vec()?;

        let known: i64 = requested.iter().filter(|dim| **dim >= 0).product();
        let mut dims = Vec::with_capacity(requested.len());
        let mut inferred = false;
        for dim in requested {
            if dim == -1 && !inferred && known > 0 {
                inferred = true;
                dims.push(element_count / known as usize);
            } else if dim >= 0 {
                dims.push(dim as usize);
            } else {
                return Err(ExecutorError::construction(format!(
                    "invalid reshape dimension {dim} on '{}'",
                    node.name
                )));
            }
        }
        let shape = Shape::new(dims);
        if shape.num_elements() != element_count {
            return Err(ExecutorError::construction(format!(
                "cannot reshape {element_count} elements into {shape} on '{}'",
                node.name
            )));
        }
        Ok(shape)
    }

    fn lower_op(&mut self, node: &Node) -> ExecutorResult<()> {
        let op = RefTranslator::op_kind(node)?;
        let (_, first, first_spec) = self.operand(node, 0)?;
        let (operands, spec) = match op {
            OpKind::Add | OpKind::Sub | OpKind::Mul => {
                let (_, second, second_spec) = self.operand(node, 1)?;
                if first_spec != second_spec {
                    return Err(ExecutorError::construction(format!(
                        "operands of '{}' disagree: {first_spec} vs {second_spec}",
                        node.name
                    )));
                }
                (vec![first, second], first_spec)
            }
            OpKind::Neg | OpKind::Identity => (vec![first], first_spec),
            OpKind::Reshape => {
                let shape = self.reshape_target(node, first_spec.element_count())?;
                (vec![first], TensorSpec::new(first_spec.dtype, shape))
            }
        };
        let value = ValueRef::Instruction(self.body.len());
        self.body.push(Instruction {
            op,
            operands,
            spec: spec.clone(),
        });
        self.values.insert((node.id, 0), (value, spec));
        Ok(())
    }
}

impl Translator for RefTranslator {
    fn translate(
        &self,
        graph: &Graph,
        inputs: &[TensorSpec],
        static_values: &[Option<HostTensor>],
    ) -> ExecutorResult<Function> {
        let mut lowering = Lowering {
            graph,
            inputs,
            static_values,
            body: Vec::new(),
            values: HashMap::new(),
        };
        let mut outputs: Vec<Option<(ValueRef, TensorSpec)>> = Vec::new();

        for id in graph.topological_order()? {
            let node = graph
                .node(id)
                .ok_or_else(|| ExecutorError::construction(format!("unknown node {}", id.0)))?;
            if node.is_arg() {
                let index = node.index()?;
                let spec = lowering.inputs.get(index).cloned().ok_or_else(|| {
                    ExecutorError::construction(format!(
                        "graph input {index} has no corresponding tensor"
                    ))
                })?;
                lowering
                    .values
                    .insert((id, 0), (ValueRef::Parameter(index), spec));
            } else if node.is_retval() {
                let index = node.index()?;
                let (_, value, spec) = lowering.operand(node, 0)?;
                if outputs.len() <= index {
                    outputs.resize(index + 1, None);
                }
                outputs[index] = Some((value, spec));
            } else {
                lowering.lower_op(node)?;
            }
        }

        let mut results = Vec::with_capacity(outputs.len());
        let mut output_refs = Vec::with_capacity(outputs.len());
        for (index, output) in outputs.into_iter().enumerate() {
            let (value, spec) = output.ok_or_else(|| {
                ExecutorError::construction(format!("graph output {index} is never produced"))
            })?;
            output_refs.push(value);
            results.push(spec);
        }

        let function = Function {
            name: String::from("ref_cpu_function"),
            parameters: inputs.to_vec(),
            results,
            body: lowering.body,
            outputs: output_refs,
        };
        function.validate()?;
        Ok(function)
    }
}
