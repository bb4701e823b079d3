#![allow(dead_code)]

use std::sync::Arc;

use encap_rs::backend::Backend;
use encap_rs::config::ExecutorConfig;
use encap_rs::graph::Graph;
use encap_rs::runtime::{ExecutionUnit, Executor};
use encap_rs_backend_ref_cpu::RefTranslator;
use tracing_subscriber::EnvFilter;

/// Routes executor logs through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn executor<B: Backend>(
    cluster_id: u64,
    graph: Graph,
    backend: &str,
    config: ExecutorConfig,
) -> anyhow::Result<Executor<B>> {
    init_tracing();
    let unit = ExecutionUnit::new(cluster_id, graph, backend);
    Ok(Executor::<B>::builder(unit)
        .config(config)
        .translator(Arc::new(RefTranslator))
        .build()?)
}
