pub mod cpu;
pub mod interpreter;
pub mod translator;

use std::sync::Arc;

pub use cpu::{CpuExecutable, CpuTensor, RefCpuBackend};
pub use translator::RefTranslator;

/// Name the default CPU backend is registered under.
pub const CPU_BACKEND_NAME: &str = "CPU";

/// Register a [`RefCpuBackend`] with the global backend registry under
/// [`CPU_BACKEND_NAME`], replacing any previous registration.
pub fn register_cpu_backend() -> Arc<RefCpuBackend> {
    register_cpu_backend_as(CPU_BACKEND_NAME)
}

pub fn register_cpu_backend_as(name: &str) -> Arc<RefCpuBackend> {
    let backend = Arc::new(RefCpuBackend::new(name));
    encap_rs::backend::register_backend(name, Arc::clone(&backend));
    backend
}
