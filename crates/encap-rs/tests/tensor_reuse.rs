mod common;

use std::sync::Arc;

use encap_rs::backend::BackendTensor;
use encap_rs::freshness::{FreshnessRegistry, FreshnessTracker};
use encap_rs::runtime::{ExecutionUnit, Executor, OutputBuffers};
use encap_rs::ExecutorError;
use encap_rs_backend_ref_cpu::RefTranslator;
use encap_rs_backend_tests::fixtures::{add_graph, f32_tensor, register_recording, test_config};
use encap_rs_backend_tests::{Counters, RecordingBackend, RecordingMode};

#[test]
fn host_bound_tensors_follow_host_pointers() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Host);
    let mut executor: Executor<RecordingBackend> =
        common::executor(30, add_graph(), &name, test_config(4))?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![3.0, 4.0]);
    let mut outputs = OutputBuffers::new();

    let first = executor.execute(&[a.clone(), b.clone()], &mut outputs)?;
    let unchanged = executor.execute(&[a, b.clone()], &mut outputs)?;
    let moved = executor.execute(&[f32_tensor(&[2], vec![0.0, 0.0]), b], &mut outputs)?;

    assert_eq!(first.tensors_created, 3);
    assert_eq!(unchanged.tensors_created, 0);
    assert_eq!(moved.tensors_created, 1);
    assert_eq!(outputs.as_slice()[0].to_f32_vec()?, vec![3.0, 4.0]);
    // Host-bound backends never copy.
    assert_eq!(Counters::get(&backend.counters().writes), 0);
    assert_eq!(executor.stats().bytes_copied, 0);
    Ok(())
}

#[test]
fn outputs_are_always_stale() -> anyhow::Result<()> {
    let (name, _backend) = register_recording(RecordingMode::Device);
    let mut executor: Executor<RecordingBackend> =
        common::executor(31, add_graph(), &name, test_config(4))?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let out = f32_tensor(&[2], vec![0.0, 0.0]);
    let lookup = executor.get_executable(&[a.clone(), a])?;

    let first = executor.allocate_output_tensors(lookup.artifact, &[out.clone()])?;
    let tensor = first.tensors[0].clone().expect("output tensor");
    tensor.set_stale(false);
    let second = executor.allocate_output_tensors(lookup.artifact, &[out])?;

    assert_eq!(first.created, 1);
    assert_eq!(second.created, 0);
    let reused = second.tensors[0].as_ref().expect("output tensor");
    assert!(Arc::ptr_eq(&tensor, reused));
    assert!(reused.is_stale());
    Ok(())
}

#[test]
fn device_inputs_are_copied_every_call_by_default() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let mut executor: Executor<RecordingBackend> =
        common::executor(32, add_graph(), &name, test_config(4))?;
    let a = f32_tensor(&[3], vec![1.0, 2.0, 3.0]);
    let mut outputs = OutputBuffers::new();

    let first = executor.execute(&[a.clone(), a.clone()], &mut outputs)?;
    let second = executor.execute(&[a.clone(), a], &mut outputs)?;

    assert_eq!((first.input_copies, first.bytes_copied), (2, 24));
    assert_eq!((second.input_copies, second.bytes_copied), (2, 24));
    assert_eq!(Counters::get(&backend.counters().bytes_written), 48);
    assert_eq!(Counters::get(&backend.counters().reads), 2);
    Ok(())
}

#[test]
fn freshness_registry_skips_redundant_copies() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let registry = Arc::new(FreshnessRegistry::new());
    let unit = ExecutionUnit::new(33, add_graph(), &name);
    let mut executor = Executor::<RecordingBackend>::builder(unit)
        .config(test_config(4))
        .translator(Arc::new(RefTranslator))
        .freshness(registry.clone())
        .build()?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![10.0, 20.0]);
    let mut outputs = OutputBuffers::new();

    let first = executor.execute(&[a.clone(), b.clone()], &mut outputs)?;
    let second = executor.execute(&[a.clone(), b.clone()], &mut outputs)?;
    assert_eq!(first.input_copies, 2);
    assert_eq!(second.input_copies, 0);
    assert_eq!(outputs.as_slice()[0].to_f32_vec()?, vec![11.0, 22.0]);

    a.bytes_mut()
        .copy_from_slice(&f32_tensor(&[2], vec![5.0, 5.0]).bytes());
    registry.invalidate(a.host_ptr());
    let third = executor.execute(&[a, b], &mut outputs)?;

    assert_eq!(third.input_copies, 1);
    assert_eq!(outputs.as_slice()[0].to_f32_vec()?, vec![15.0, 25.0]);
    assert_eq!(Counters::get(&backend.counters().writes), 3);
    Ok(())
}

#[test]
fn units_sharing_a_registry_copy_independently() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let registry = Arc::new(FreshnessRegistry::new());
    let build = |cluster_id: u64| {
        Executor::<RecordingBackend>::builder(ExecutionUnit::new(cluster_id, add_graph(), &name))
            .config(test_config(4))
            .translator(Arc::new(RefTranslator))
            .freshness(registry.clone())
            .build()
    };
    let mut first_unit = build(38)?;
    let mut second_unit = build(39)?;
    let x = f32_tensor(&[2], vec![1.0, 2.0]);
    let y = f32_tensor(&[2], vec![10.0, 20.0]);
    let mut first_out = OutputBuffers::new();
    let mut second_out = OutputBuffers::new();

    let a = first_unit.execute(&[x.clone(), y.clone()], &mut first_out)?;
    let b = second_unit.execute(&[x.clone(), y.clone()], &mut second_out)?;
    assert_ne!(a.artifact, b.artifact);
    assert_eq!((a.input_copies, b.input_copies), (2, 2));

    x.bytes_mut()
        .copy_from_slice(&f32_tensor(&[2], vec![5.0, 5.0]).bytes());
    registry.invalidate(x.host_ptr());
    let a = first_unit.execute(&[x.clone(), y.clone()], &mut first_out)?;
    let b = second_unit.execute(&[x, y], &mut second_out)?;

    assert_eq!((a.input_copies, b.input_copies), (1, 1));
    assert_eq!(first_out.as_slice()[0].to_f32_vec()?, vec![15.0, 25.0]);
    assert_eq!(second_out.as_slice()[0].to_f32_vec()?, vec![15.0, 25.0]);
    assert_eq!(Counters::get(&backend.counters().writes), 6);
    Ok(())
}

#[test]
fn device_tensors_are_kept_when_host_buffers_move() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let mut executor: Executor<RecordingBackend> =
        common::executor(50, add_graph(), &name, test_config(4))?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![3.0, 4.0]);
    let lookup = executor.get_executable(&[a.clone(), b.clone()])?;

    let first = executor.allocate_input_tensors(lookup.artifact, &[a.clone(), b.clone()])?;
    assert_eq!((first.created, first.copies), (2, 2));
    let moved = f32_tensor(&[2], vec![7.0, 8.0]);
    assert!(!moved.shares_storage(&a));
    let second = executor.allocate_input_tensors(lookup.artifact, &[moved, b])?;

    assert_eq!(second.created, 0);
    assert_eq!(second.copies, 2);
    let kept = second.tensors[0].as_ref().expect("input tensor");
    assert!(Arc::ptr_eq(
        first.tensors[0].as_ref().expect("input tensor"),
        kept
    ));
    assert!(kept.is_stale());
    assert_eq!(
        kept.contents(),
        f32_tensor(&[2], vec![7.0, 8.0]).bytes().clone()
    );
    assert_eq!(Counters::get(&backend.counters().tensors_created), 2);
    Ok(())
}

#[test]
fn failed_allocation_keeps_the_cached_tensor() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Host);
    let mut executor: Executor<RecordingBackend> =
        common::executor(51, add_graph(), &name, test_config(4))?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![3.0, 4.0]);
    let lookup = executor.get_executable(&[a.clone(), b.clone()])?;
    let first = executor.allocate_input_tensors(lookup.artifact, &[a.clone(), b.clone()])?;

    backend.fail_next_tensor();
    let err = executor
        .allocate_input_tensors(lookup.artifact, &[f32_tensor(&[2], vec![0.0, 0.0]), b.clone()])
        .err()
        .expect("allocation was set up to fail");
    match &err {
        ExecutorError::Internal { message, .. } => assert!(message.contains("input 0")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executor.slot_count(lookup.artifact), 2);

    let again = executor.allocate_input_tensors(lookup.artifact, &[a, b])?;
    assert_eq!(again.created, 0);
    assert!(Arc::ptr_eq(
        first.tensors[0].as_ref().expect("input tensor"),
        again.tensors[0].as_ref().expect("input tensor")
    ));
    Ok(())
}

#[test]
fn external_positions_get_no_tensor() -> anyhow::Result<()> {
    let (name, _backend) = register_recording(RecordingMode::Device);
    let unit = ExecutionUnit::new(34, add_graph(), &name).with_external_input(1);
    let mut executor = Executor::<RecordingBackend>::builder(unit)
        .config(test_config(4))
        .translator(Arc::new(RefTranslator))
        .build()?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![3.0, 4.0]);

    let lookup = executor.get_executable(&[a.clone(), b.clone()])?;
    let inputs = executor.allocate_input_tensors(lookup.artifact, &[a, b])?;

    assert!(inputs.tensors[0].is_some());
    assert!(inputs.tensors[1].is_none());
    assert_eq!((inputs.created, inputs.copies), (1, 1));
    assert_eq!(executor.slot_count(lookup.artifact), 1);
    Ok(())
}

#[test]
fn pipeline_groups_are_bounded_by_depth() -> anyhow::Result<()> {
    let (name, _backend) = register_recording(RecordingMode::Pipelined);
    let config = test_config(4).with_pipeline_depth(2);
    let mut executor: Executor<RecordingBackend> =
        common::executor(35, add_graph(), &name, config)?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let lookup = executor.get_executable(&[a.clone(), a.clone()])?;

    let first = executor.tensors_from_pipeline(lookup.artifact)?;
    let second = executor.tensors_from_pipeline(lookup.artifact)?;
    assert_ne!(first.index, second.index);
    assert_eq!(first.inputs.len(), 2);
    assert_eq!(first.outputs.len(), 1);
    assert_eq!(executor.pipeline_in_flight(lookup.artifact), 2);

    let err = executor
        .tensors_from_pipeline(lookup.artifact)
        .err()
        .expect("pipeline exhausted");
    match &err {
        ExecutorError::ResourceExhausted { message, .. } => {
            assert_eq!(message, "no free tensor available")
        }
        other => panic!("unexpected error: {other}"),
    }

    executor.return_pipeline_group(lookup.artifact, first.index)?;
    let recycled = executor.tensors_from_pipeline(lookup.artifact)?;
    assert_eq!(recycled.index, first.index);
    assert!(executor
        .return_pipeline_group(lookup.artifact, first.index + 10)
        .is_err());
    Ok(())
}

#[test]
fn pipelined_execution_returns_its_group() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Pipelined);
    let mut executor: Executor<RecordingBackend> =
        common::executor(36, add_graph(), &name, test_config(4))?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let b = f32_tensor(&[2], vec![0.5, 0.5]);
    let mut outputs = OutputBuffers::new();

    let first = executor.execute(&[a.clone(), b.clone()], &mut outputs)?;
    let second = executor.execute(&[a, b], &mut outputs)?;

    // Returned groups rejoin the back of the free queue.
    assert_eq!(first.pipeline_index, Some(0));
    assert_eq!(second.pipeline_index, Some(1));
    assert_eq!(executor.pipeline_in_flight(first.artifact), 0);
    assert_eq!(second.input_copies, 2);
    assert_eq!(outputs.as_slice()[0].to_f32_vec()?, vec![1.5, 2.5]);
    // Two inputs and one output per pipeline slot, depth two.
    assert_eq!(Counters::get(&backend.counters().tensors_created), 6);
    Ok(())
}

#[test]
fn pipeline_requires_tensor_creating_executables() -> anyhow::Result<()> {
    let (name, _backend) = register_recording(RecordingMode::Device);
    let mut executor: Executor<RecordingBackend> =
        common::executor(37, add_graph(), &name, test_config(4))?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let lookup = executor.get_executable(&[a.clone(), a])?;

    let err = executor
        .tensors_from_pipeline(lookup.artifact)
        .err()
        .expect("device backend has no pipeline");
    assert!(matches!(err, ExecutorError::Internal { .. }));
    Ok(())
}
