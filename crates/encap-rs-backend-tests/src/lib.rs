pub mod fixtures;
pub mod recording_backend;
pub mod suite;

pub use recording_backend::{Counters, RecordingBackend, RecordingMode, RecordingTensor};

/// Expands the shared executor suite for a backend.
///
/// `$register` receives a fresh registry name and must register a backend
/// under it, returning the shared handle.
#[macro_export]
macro_rules! define_executor_tests {
    ($module:ident, $register:expr) => {
        #[cfg(test)]
        mod $module {
            use $crate::suite;

            macro_rules! suite_test {
                ($name:ident) => {
                    #[test]
                    fn $name() -> ::anyhow::Result<()> {
                        let register = $register;
                        suite::$name(&register)
                    }
                };
            }

            suite_test!(add_matches_expected);
            suite_test!(multiple_outputs_are_written);
            suite_test!(repeat_signature_hits_cache);
            suite_test!(new_shape_compiles_new_artifact);
            suite_test!(static_values_select_artifact);
            suite_test!(least_recently_used_is_evicted);
            suite_test!(in_place_updates_are_observed);
        }
    };
}
