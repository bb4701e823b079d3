mod common;

use std::sync::Arc;

use encap_rs::aot::{AotTable, AOT_EXEC_PREFIX, AOT_REQUESTED_ATTR};
use encap_rs::backend::{has_backend, list_backends, register_backend, unregister_backend};
use encap_rs::graph::Graph;
use encap_rs::runtime::{ExecutionUnit, Executor, OutputBuffers};
use encap_rs::signature::Signature;
use encap_rs::tensor::{DType, TensorSpec};
use encap_rs::translate::Translator;
use encap_rs::ExecutorError;
use encap_rs_backend_ref_cpu::{RefCpuBackend, RefTranslator};
use encap_rs_backend_tests::fixtures::{
    add_graph, f32_tensor, register_recording, test_config, unique_backend_name,
};
use encap_rs_backend_tests::{RecordingBackend, RecordingMode};

fn build_err(unit: ExecutionUnit) -> ExecutorError {
    common::init_tracing();
    Executor::<RecordingBackend>::builder(unit)
        .config(test_config(4))
        .translator(Arc::new(RefTranslator))
        .build()
        .err()
        .expect("construction should fail")
}

#[test]
fn unknown_backend_is_unavailable() {
    let name = unique_backend_name("never-registered");
    let err = build_err(ExecutionUnit::new(40, add_graph(), &name));
    assert!(matches!(err, ExecutorError::BackendUnavailable { name: missing } if missing == name));
}

#[test]
fn backend_of_another_type_is_unavailable() {
    let (name, _backend) = register_recording(RecordingMode::Host);
    let err = Executor::<RefCpuBackend>::builder(ExecutionUnit::new(41, add_graph(), &name))
        .config(test_config(4))
        .translator(Arc::new(RefTranslator))
        .build()
        .err()
        .expect("type mismatch");
    assert!(matches!(err, ExecutorError::BackendUnavailable { .. }));
}

#[test]
fn arg_without_index_is_a_construction_error() {
    let (name, _backend) = register_recording(RecordingMode::Host);
    let mut graph = Graph::new();
    let arg = graph.add_node("orphan", "_Arg");
    let out = graph.add_retval("out", 0);
    graph.add_edge(arg, 0, out, 0);

    let err = build_err(ExecutionUnit::new(42, graph, &name));
    match err {
        ExecutorError::Construction(message) => assert!(message.contains("orphan")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn zero_cache_depth_is_rejected() {
    let (name, _backend) = register_recording(RecordingMode::Host);
    let err = Executor::<RecordingBackend>::builder(ExecutionUnit::new(43, add_graph(), &name))
        .config(test_config(1).with_cache_depth(0))
        .translator(Arc::new(RefTranslator))
        .build()
        .err()
        .expect("depth 0");
    assert!(matches!(err, ExecutorError::ConfigInvalid(_)));
}

#[test]
fn missing_translator_without_aot_is_rejected() {
    let (name, _backend) = register_recording(RecordingMode::Host);
    let err = Executor::<RecordingBackend>::builder(ExecutionUnit::new(44, add_graph(), &name))
        .config(test_config(4))
        .build()
        .err()
        .expect("no translator");
    assert!(matches!(err, ExecutorError::ConfigInvalid(_)));
}

#[test]
fn malformed_aot_attributes_are_rejected() {
    let (name, _backend) = register_recording(RecordingMode::Host);

    let unknown = ExecutionUnit::new(45, add_graph(), &name)
        .with_attribute(AOT_REQUESTED_ATTR, "1")
        .with_attribute("_encap_aot_bogus", "x");
    assert!(matches!(build_err(unknown), ExecutorError::ConfigInvalid(_)));

    let unrequested = ExecutionUnit::new(46, add_graph(), &name)
        .with_attribute(format!("{AOT_EXEC_PREFIX}2,;2,;/"), "AAAA");
    assert!(matches!(build_err(unrequested), ExecutorError::ConfigInvalid(_)));
}

#[test]
fn backend_options_are_forwarded() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Host);
    let unit = ExecutionUnit::new(47, add_graph(), &name)
        .with_attribute("_encap_device_id", "1")
        .with_attribute("unrelated", "ignored");
    let _executor: Executor<RecordingBackend> = Executor::builder(unit)
        .config(test_config(4))
        .translator(Arc::new(RefTranslator))
        .build()?;

    let options = backend.options();
    assert_eq!(options.get("device_id").map(String::as_str), Some("1"));
    assert!(!options.contains_key("unrelated"));
    Ok(())
}

#[test]
fn aot_function_without_executable_fails_on_lookup() -> anyhow::Result<()> {
    let (name, backend) = register_recording(RecordingMode::Host);
    let spec = TensorSpec::new(DType::F32, [2]);
    let function = RefTranslator.translate(&add_graph(), &[spec.clone(), spec], &[None, None])?;
    let mut table = AotTable::new();
    table.insert_function(Signature::from("2,;2,;/"), &function)?;

    let unit = ExecutionUnit::new(48, add_graph(), &name).with_attributes(table.to_attributes());
    let mut executor: Executor<RecordingBackend> = Executor::builder(unit)
        .config(test_config(4))
        .build()?;
    let a = f32_tensor(&[2], vec![1.0, 2.0]);
    let err = executor
        .execute(&[a.clone(), a], &mut OutputBuffers::new())
        .expect_err("no AOT executable");

    match err {
        ExecutorError::ConfigInvalid(message) => {
            assert!(message.contains("could not find an executable"));
            assert!(message.contains("cluster_48"));
            assert!(message.contains(&name));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executor.cache_len(), 0);
    assert_eq!(
        encap_rs_backend_tests::Counters::get(&backend.counters().compiles),
        0
    );
    Ok(())
}

#[test]
fn rejected_backend_options_name_the_unit() {
    let name = unique_backend_name("recording");
    let backend =
        RecordingBackend::new(name.clone(), RecordingMode::Host).rejecting_option("device_id");
    register_backend(name.clone(), Arc::new(backend));
    let unit = ExecutionUnit::new(49, add_graph(), &name).with_attribute("_encap_device_id", "3");

    match build_err(unit) {
        ExecutorError::ConfigInvalid(message) => {
            assert!(message.contains("cluster_49"));
            assert!(message.contains(&name));
            assert!(message.contains("unsupported option 'device_id'"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unregistered_backends_are_no_longer_served() {
    let (name, _backend) = register_recording(RecordingMode::Host);
    assert!(has_backend(&name));
    assert!(list_backends().contains(&name));

    assert!(unregister_backend(&name));
    assert!(!has_backend(&name));
    assert!(!list_backends().contains(&name));
    assert!(!unregister_backend(&name));

    let err = build_err(ExecutionUnit::new(52, add_graph(), &name));
    assert!(matches!(err, ExecutorError::BackendUnavailable { .. }));
}
