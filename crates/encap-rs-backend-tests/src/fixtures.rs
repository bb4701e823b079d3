//! Graphs, inputs and configurations shared by executor tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use encap_rs::backend::register_backend;
use encap_rs::config::ExecutorConfig;
use encap_rs::graph::Graph;
use encap_rs::tensor::HostTensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::recording_backend::{RecordingBackend, RecordingMode};

static NEXT_BACKEND: AtomicUsize = AtomicUsize::new(0);

/// Registry names are process-wide; every test registers its own.
pub fn unique_backend_name(prefix: &str) -> String {
    format!("{prefix}-{}", NEXT_BACKEND.fetch_add(1, Ordering::SeqCst))
}

pub fn register_recording(mode: RecordingMode) -> (String, Arc<RecordingBackend>) {
    register_recording_with_delay(mode, Duration::ZERO)
}

pub fn register_recording_with_delay(
    mode: RecordingMode,
    delay: Duration,
) -> (String, Arc<RecordingBackend>) {
    let name = unique_backend_name("recording");
    let backend = Arc::new(RecordingBackend::new(name.clone(), mode).with_compile_delay(delay));
    register_backend(name.clone(), Arc::clone(&backend));
    (name, backend)
}

/// Configuration that never consults the environment.
pub fn test_config(cache_depth: usize) -> ExecutorConfig {
    ExecutorConfig::default()
        .with_cache_depth(cache_depth)
        .with_dump_dir(std::env::temp_dir().join("encap-rs-tests"))
}

/// `out0 = arg0 + arg1`
pub fn add_graph() -> Graph {
    let mut graph = Graph::new();
    let a = graph.add_arg("a", 0);
    let b = graph.add_arg("b", 1);
    let add = graph.add_node("add", "Add");
    let out = graph.add_retval("out", 0);
    graph.add_edge(a, 0, add, 0);
    graph.add_edge(b, 0, add, 1);
    graph.add_edge(add, 0, out, 0);
    graph
}

/// `out0 = -arg0`, `out1 = arg0 * arg0`
pub fn neg_and_square_graph() -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_arg("x", 0);
    let neg = graph.add_node("neg", "Neg");
    let square = graph.add_node("square", "Mul");
    let out0 = graph.add_retval("neg_out", 0);
    let out1 = graph.add_retval("square_out", 1);
    graph.add_edge(x, 0, neg, 0);
    graph.add_edge(x, 0, square, 0);
    graph.add_edge(x, 0, square, 1);
    graph.add_edge(neg, 0, out0, 0);
    graph.add_edge(square, 0, out1, 0);
    graph
}

/// `out0 = reshape(arg0, arg1)`; `arg1` is a static input.
pub fn reshape_graph() -> Graph {
    let mut graph = Graph::new();
    let data = graph.add_arg("data", 0);
    let shape = graph.add_arg("shape", 1);
    let reshape = graph.add_node("reshape", "Reshape");
    let out = graph.add_retval("out", 0);
    graph.add_edge(data, 0, reshape, 0);
    graph.add_edge(shape, 0, reshape, 1);
    graph.add_edge(reshape, 0, out, 0);
    graph
}

pub fn f32_tensor(dims: &[usize], data: Vec<f32>) -> HostTensor {
    HostTensor::from_f32(dims, data).expect("tensor data matches shape")
}

pub fn shape_tensor(dims: &[i64]) -> HostTensor {
    HostTensor::from_i64([dims.len()], dims.to_vec()).expect("shape tensor")
}

pub fn random_f32(rng: &mut StdRng, dims: &[usize]) -> HostTensor {
    let len = dims.iter().product();
    let data = (0..len).map(|_| rng.gen_range(-4.0f32..4.0)).collect();
    f32_tensor(dims, data)
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}
