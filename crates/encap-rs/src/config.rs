//! Construction-time configuration of an execution unit.

use std::path::{Path, PathBuf};

use crate::aot::AotTable;
use crate::env;
use crate::error::{ExecutorError, ExecutorResult};

/// Maximum number of compiled artifacts an execution unit keeps.
pub const DEFAULT_CACHE_DEPTH: usize = 16;
/// Number of in-flight tensor groups per artifact on pipelining backends.
pub const DEFAULT_PIPELINE_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub cache_depth: usize,
    pub pipeline_depth: usize,
    /// Write every newly compiled function to `dump_dir`.
    pub serialize_on_compile: bool,
    pub dump_dir: PathBuf,
    /// Precompiled artifacts consulted instead of live compilation.
    pub aot: Option<AotTable>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cache_depth: DEFAULT_CACHE_DEPTH,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            serialize_on_compile: false,
            dump_dir: PathBuf::from("."),
            aot: None,
        }
    }
}

impl ExecutorConfig {
    /// Defaults overlaid with the process environment.
    ///
    /// Variables are read once per process; later changes are not observed.
    pub fn from_env() -> ExecutorResult<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> ExecutorResult<Self> {
        if let Some(raw) = env::cache_depth_override() {
            self.cache_depth = raw.parse().map_err(|_| {
                ExecutorError::config(format!(
                    "{} must be a positive integer, got '{raw}'",
                    env::CACHE_DEPTH_VAR
                ))
            })?;
        }
        if env::serialize_enabled() {
            self.serialize_on_compile = true;
        }
        if let Some(dir) = env::dump_dir_override() {
            self.dump_dir = dir.clone();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_cache_depth(mut self, depth: usize) -> Self {
        self.cache_depth = depth;
        self
    }

    pub fn with_pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth;
        self
    }

    pub fn with_serialize_on_compile(mut self, enabled: bool) -> Self {
        self.serialize_on_compile = enabled;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dump_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_aot(mut self, table: AotTable) -> Self {
        self.aot = Some(table);
        self
    }

    pub fn validate(&self) -> ExecutorResult<()> {
        if self.cache_depth == 0 {
            return Err(ExecutorError::config("cache depth must be at least 1"));
        }
        if self.pipeline_depth == 0 {
            return Err(ExecutorError::config("pipeline depth must be at least 1"));
        }
        Ok(())
    }
}
