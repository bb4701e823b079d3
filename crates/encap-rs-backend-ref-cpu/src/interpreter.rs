//! Straight-line evaluation of a [`Function`] over `f32` buffers.

use std::sync::Arc;

use encap_rs::backend::{BackendError, BackendResult};
use encap_rs::function::{Function, Instruction, OpKind, ValueRef};
use encap_rs::tensor::{DType, TensorSpec};

/// Dense `f32` value flowing between instructions.
#[derive(Clone, Debug)]
pub struct Value {
    pub spec: TensorSpec,
    pub data: Arc<[f32]>,
}

/// Evaluates `function`. `parameters[i]` may be `None` for parameters the body never reads.
pub fn evaluate(function: &Function, parameters: &[Option<Value>]) -> BackendResult<Vec<Value>> {
    if parameters.len() != function.parameters.len() {
        return Err(BackendError::execution(format!(
            "function '{}' expects {} parameters, got {}",
            function.name,
            function.parameters.len(),
            parameters.len()
        )));
    }
    let mut values: Vec<Value> = Vec::with_capacity(function.body.len());
    for instruction in &function.body {
        let operands = instruction
            .operands
            .iter()
            .map(|operand| fetch(*operand, parameters, &values))
            .collect::<BackendResult<Vec<_>>>()?;
        let value = execute_instruction(instruction, &operands)?;
        values.push(value);
    }
    function
        .outputs
        .iter()
        .map(|output| fetch(*output, parameters, &values).map(Value::clone))
        .collect()
}

fn fetch<'a>(
    value: ValueRef,
    parameters: &'a [Option<Value>],
    values: &'a [Value],
) -> BackendResult<&'a Value> {
    match value {
        ValueRef::Parameter(idx) => parameters
            .get(idx)
            .and_then(Option::as_ref)
            .ok_or_else(|| BackendError::execution(format!("parameter {idx} is not available"))),
        ValueRef::Instruction(idx) => values
            .get(idx)
            .ok_or_else(|| BackendError::execution(format!("instruction {idx} has not been evaluated"))),
    }
}

fn execute_instruction(instruction: &Instruction, inputs: &[&Value]) -> BackendResult<Value> {
    if instruction.spec.dtype != DType::F32 {
        return Err(BackendError::unimplemented(
            "ref_cpu",
            format!("{} only supports f32 results", instruction.op),
        ));
    }
    match instruction.op {
        OpKind::Add | OpKind::Sub | OpKind::Mul => {
            op_elementwise_binary(inputs, &instruction.spec, instruction.op)
        }
        OpKind::Neg | OpKind::Identity => {
            op_elementwise_unary(inputs, &instruction.spec, instruction.op)
        }
        OpKind::Reshape => op_reshape(inputs, &instruction.spec),
    }
}

fn expect_single<'a>(inputs: &[&'a Value]) -> BackendResult<&'a Value> {
    match inputs {
        [single] => Ok(*single),
        _ => Err(BackendError::execution(format!(
            "expected a single input, got {}",
            inputs.len()
        ))),
    }
}

fn op_elementwise_binary(inputs: &[&Value], output: &TensorSpec, op: OpKind) -> BackendResult<Value> {
    let [lhs, rhs] = inputs else {
        return Err(BackendError::execution("elementwise binary expects 2 inputs"));
    };
    if lhs.data.len() != rhs.data.len() || lhs.data.len() != output.element_count() {
        return Err(BackendError::execution("elementwise size mismatch"));
    }
    let result: Vec<f32> = lhs
        .data
        .iter()
        .zip(rhs.data.iter())
        .map(|(x, y)| match op {
            OpKind::Add => x + y,
            OpKind::Sub => x - y,
            _ => x * y,
        })
        .collect();
    Ok(Value {
        spec: output.clone(),
        data: Arc::from(result),
    })
}

fn op_elementwise_unary(inputs: &[&Value], output: &TensorSpec, op: OpKind) -> BackendResult<Value> {
    let input = expect_single(inputs)?;
    let data = match op {
        OpKind::Neg => Arc::from(input.data.iter().map(|&x| -x).collect::<Vec<f32>>()),
        _ => Arc::clone(&input.data),
    };
    Ok(Value {
        spec: output.clone(),
        data,
    })
}

fn op_reshape(inputs: &[&Value], output: &TensorSpec) -> BackendResult<Value> {
    let input = expect_single(inputs)?;
    if input.data.len() != output.element_count() {
        return Err(BackendError::execution("reshape element count mismatch"));
    }
    Ok(Value {
        spec: output.clone(),
        data: Arc::clone(&input.data),
    })
}

pub fn f32_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn f32_to_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dims: &[usize]) -> TensorSpec {
        TensorSpec::new(DType::F32, dims)
    }

    #[test]
    fn evaluates_sub_of_neg() {
        let function = Function {
            name: "f".into(),
            parameters: vec![spec(&[2]), spec(&[2])],
            results: vec![spec(&[2])],
            body: vec![
                Instruction {
                    op: OpKind::Neg,
                    operands: vec![ValueRef::Parameter(1)],
                    spec: spec(&[2]),
                },
                Instruction {
                    op: OpKind::Sub,
                    operands: vec![ValueRef::Parameter(0), ValueRef::Instruction(0)],
                    spec: spec(&[2]),
                },
            ],
            outputs: vec![ValueRef::Instruction(1)],
        };
        let a = Value {
            spec: spec(&[2]),
            data: Arc::from(vec![1.0f32, 2.0]),
        };
        let b = Value {
            spec: spec(&[2]),
            data: Arc::from(vec![10.0f32, 20.0]),
        };
        let out = evaluate(&function, &[Some(a), Some(b)]).unwrap();
        assert_eq!(&*out[0].data, &[11.0, 22.0]);
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let function = Function {
            name: "id".into(),
            parameters: vec![spec(&[1])],
            results: vec![spec(&[1])],
            body: Vec::new(),
            outputs: vec![ValueRef::Parameter(0)],
        };
        assert!(evaluate(&function, &[None]).is_err());
    }
}
