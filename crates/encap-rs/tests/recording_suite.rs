use encap_rs_backend_tests::define_executor_tests;

fn register(
    mode: encap_rs_backend_tests::RecordingMode,
) -> impl Fn(&str) -> std::sync::Arc<encap_rs_backend_tests::RecordingBackend> {
    move |name: &str| {
        let backend = std::sync::Arc::new(encap_rs_backend_tests::RecordingBackend::new(name, mode));
        encap_rs::backend::register_backend(name, backend.clone());
        backend
    }
}

define_executor_tests!(host_bound, super::register(encap_rs_backend_tests::RecordingMode::Host));
define_executor_tests!(device, super::register(encap_rs_backend_tests::RecordingMode::Device));
define_executor_tests!(
    pipelined,
    super::register(encap_rs_backend_tests::RecordingMode::Pipelined)
);
