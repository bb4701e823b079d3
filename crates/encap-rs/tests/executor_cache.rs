mod common;

use std::panic;
use std::thread;
use std::time::Duration;

use encap_rs::backend::with_backend_lock;
use encap_rs::config::ExecutorConfig;
use encap_rs::function::Function;
use encap_rs::runtime::{Executor, OutputBuffers};
use encap_rs::ExecutorError;
use encap_rs_backend_tests::fixtures::{
    add_graph, f32_tensor, register_recording, register_recording_with_delay, test_config,
};
use encap_rs_backend_tests::{Counters, RecordingBackend, RecordingMode};

fn same_pair(len: usize) -> [encap_rs::HostTensor; 2] {
    let tensor = f32_tensor(&[len], vec![1.0; len]);
    [tensor.clone(), tensor]
}

#[test]
fn misses_compile_and_hits_reuse() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let mut executor: Executor<RecordingBackend> =
        common::executor(10, add_graph(), &name, test_config(4))?;
    let mut outputs = OutputBuffers::new();

    for _ in 0..3 {
        executor.execute(&same_pair(2), &mut outputs)?;
    }
    executor.execute(&same_pair(5), &mut outputs)?;

    assert_eq!(Counters::get(&backend.counters().compiles), 2);
    let stats = executor.stats();
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.cache_misses, 2);
    assert_eq!(stats.executions, 4);
    assert_eq!(Counters::get(&backend.counters().calls), 4);
    Ok(())
}

#[test]
fn eviction_releases_executable_and_tensors() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let mut executor: Executor<RecordingBackend> =
        common::executor(11, add_graph(), &name, test_config(2))?;
    let mut outputs = OutputBuffers::new();

    let s1 = executor.execute(&same_pair(1), &mut outputs)?;
    executor.execute(&same_pair(2), &mut outputs)?;
    assert_eq!(executor.slot_count(s1.artifact), 3);
    assert_eq!(Counters::get(&backend.counters().live_tensors), 6);

    executor.execute(&same_pair(3), &mut outputs)?;

    assert_eq!(Counters::get(&backend.counters().releases), 1);
    assert_eq!(executor.slot_count(s1.artifact), 0);
    assert!(executor.artifact_for(&s1.signature).is_none());
    // Two inputs and one output for each of the two surviving artifacts.
    assert_eq!(Counters::get(&backend.counters().live_tensors), 6);
    Ok(())
}

#[test]
fn evicted_signature_is_recompiled() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Host);
    let mut executor: Executor<RecordingBackend> =
        common::executor(12, add_graph(), &name, test_config(1))?;
    let mut outputs = OutputBuffers::new();

    let first = executor.execute(&same_pair(2), &mut outputs)?;
    executor.execute(&same_pair(3), &mut outputs)?;
    let again = executor.execute(&same_pair(2), &mut outputs)?;

    assert!(!again.cache_hit);
    assert_ne!(first.artifact, again.artifact);
    assert_eq!(first.signature, again.signature);
    assert_eq!(Counters::get(&backend.counters().compiles), 3);
    assert_eq!(executor.stats().evictions, 2);
    assert_eq!(outputs.as_slice()[0].to_f32_vec()?, vec![2.0, 2.0]);
    Ok(())
}

#[test]
fn failed_compile_leaves_cache_untouched() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let dump_dir = tempfile::tempdir()?;
    let config = test_config(1).with_dump_dir(dump_dir.path());
    let mut executor: Executor<RecordingBackend> =
        common::executor(13, add_graph(), &name, config)?;
    let mut outputs = OutputBuffers::new();

    let cached = executor.execute(&same_pair(1), &mut outputs)?;
    backend.fail_next_compile();
    let err = executor
        .execute(&same_pair(2), &mut outputs)
        .expect_err("compile was set up to fail");

    match &err {
        ExecutorError::CompileFailed {
            unit, signature, dump, ..
        } => {
            assert_eq!(unit, "cluster_13");
            assert_eq!(signature, "2,;2,;/");
            let dump = dump.as_ref().expect("error dump written");
            assert_eq!(dump, &dump_dir.path().join("function_error_cluster_13.json"));
            let function = Function::from_json(&std::fs::read_to_string(dump)?)?;
            assert_eq!(function.parameters.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert_eq!(executor.cache_len(), 1);
    assert!(executor.is_cached(cached.artifact));
    assert_eq!(Counters::get(&backend.counters().releases), 0);

    let retry = executor.execute(&same_pair(2), &mut outputs)?;
    assert!(!retry.cache_hit);
    assert!(!executor.is_cached(cached.artifact));
    Ok(())
}

#[test]
fn serialize_on_compile_writes_function() -> anyhow::Result<()> {
    let (name, _backend) = register_recording(RecordingMode::Host);
    let dump_dir = tempfile::tempdir()?;
    let config = ExecutorConfig::default()
        .with_serialize_on_compile(true)
        .with_dump_dir(dump_dir.path());
    let mut executor: Executor<RecordingBackend> =
        common::executor(14, add_graph(), &name, config)?;
    let mut outputs = OutputBuffers::new();

    executor.execute(&same_pair(4), &mut outputs)?;

    let path = dump_dir.path().join("function_cluster_14.json");
    let function = Function::from_json(&std::fs::read_to_string(path)?)?;
    assert_eq!(function.name, "cluster_14");
    assert_eq!(function.graph_size(), 3);
    Ok(())
}

#[test]
fn compiles_on_one_backend_never_overlap() -> anyhow::Result<()> {
    let (name, backend) =
        register_recording_with_delay(RecordingMode::Device, Duration::from_millis(20));

    thread::scope(|scope| -> anyhow::Result<()> {
        let workers: Vec<_> = (0..2u64)
            .map(|worker| {
                let name = name.clone();
                scope.spawn(move || -> anyhow::Result<()> {
                    let mut executor: Executor<RecordingBackend> =
                        common::executor(20 + worker, add_graph(), &name, test_config(4))?;
                    let mut outputs = OutputBuffers::new();
                    for len in 1..=3 {
                        executor.execute(&same_pair(len), &mut outputs)?;
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked")?;
        }
        Ok(())
    })?;

    assert_eq!(Counters::get(&backend.counters().compiles), 6);
    assert_eq!(Counters::get(&backend.counters().max_concurrent_compiles), 1);
    Ok(())
}

#[test]
fn panicking_compile_is_reported_and_retryable() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Device);
    let mut executor: Executor<RecordingBackend> =
        common::executor(15, add_graph(), &name, test_config(4))?;
    let mut outputs = OutputBuffers::new();

    backend.panic_next_compile();
    let err = executor
        .execute(&same_pair(2), &mut outputs)
        .expect_err("compile was set up to panic");
    match &err {
        ExecutorError::CompileFailed {
            unit,
            backend: backend_name,
            message,
            ..
        } => {
            assert_eq!(unit, "cluster_15");
            assert_eq!(backend_name, &name);
            assert!(message.contains("injected compile panic"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
    assert_eq!(executor.cache_len(), 0);

    let retry = executor.execute(&same_pair(2), &mut outputs)?;
    assert!(!retry.cache_hit);
    assert_eq!(Counters::get(&backend.counters().compiles), 1);
    assert_eq!(outputs.as_slice()[0].to_f32_vec()?, vec![2.0, 2.0]);
    Ok(())
}

#[test]
fn compile_lock_survives_a_panicking_holder() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Host);
    let poisoned = panic::catch_unwind(|| {
        with_backend_lock::<()>(&name, || panic!("holder panicked"))
    });
    assert!(poisoned.is_err());

    assert_eq!(with_backend_lock(&name, || 7)?, 7);
    let mut executor: Executor<RecordingBackend> =
        common::executor(16, add_graph(), &name, test_config(4))?;
    executor.execute(&same_pair(2), &mut OutputBuffers::new())?;
    assert_eq!(Counters::get(&backend.counters().compiles), 1);
    Ok(())
}
