use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

pub const CACHE_DEPTH_VAR: &str = "ENCAP_FUNCTION_CACHE_ITEM_DEPTH";
pub const ENABLE_SERIALIZE_VAR: &str = "ENCAP_ENABLE_SERIALIZE";
pub const DUMP_DIR_VAR: &str = "ENCAP_DUMP_DIR";

static CACHE_DEPTH: OnceLock<Option<String>> = OnceLock::new();
static ENABLE_SERIALIZE: OnceLock<bool> = OnceLock::new();
static DUMP_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Raw cache depth override; parsed and validated by the config layer.
pub(crate) fn cache_depth_override() -> Option<&'static str> {
    CACHE_DEPTH
        .get_or_init(|| match env::var(CACHE_DEPTH_VAR) {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            _ => None,
        })
        .as_deref()
}

pub(crate) fn serialize_enabled() -> bool {
    *ENABLE_SERIALIZE.get_or_init(|| match env::var(ENABLE_SERIALIZE_VAR) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

pub(crate) fn dump_dir_override() -> Option<&'static PathBuf> {
    DUMP_DIR
        .get_or_init(|| match env::var(DUMP_DIR_VAR) {
            Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value.trim())),
            _ => None,
        })
        .as_ref()
}
