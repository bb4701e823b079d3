//! Process-wide registry of named backends and their compile locks.
//!
//! Backends are registered once and shared by every execution unit naming
//! them. Each name also owns a mutex that serializes compile and load calls
//! for backends that are not reentrant.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::Lazy;

use super::Backend;
use crate::error::{ExecutorError, ExecutorResult};

type BackendHandle = Arc<dyn Any + Send + Sync>;

struct Entry {
    handle: BackendHandle,
    lock: Arc<Mutex<()>>,
}

static REGISTRY: Lazy<RwLock<HashMap<String, Entry>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `backend` under `name`, replacing any previous registration.
pub fn register_backend<B: Backend>(name: impl Into<String>, backend: Arc<B>) {
    let name = name.into();
    tracing::debug!(backend = %name, "registering backend");
    let mut registry = REGISTRY.write().expect("backend registry poisoned");
    let lock = registry
        .get(&name)
        .map(|entry| Arc::clone(&entry.lock))
        .unwrap_or_default();
    registry.insert(
        name,
        Entry {
            handle: backend as BackendHandle,
            lock,
        },
    );
}

/// Removes `name` from the registry. Returns `true` if it was present.
pub fn unregister_backend(name: &str) -> bool {
    REGISTRY
        .write()
        .expect("backend registry poisoned")
        .remove(name)
        .is_some()
}

/// Looks up the backend registered under `name` with concrete type `B`.
pub fn get_backend<B: Backend>(name: &str) -> ExecutorResult<Arc<B>> {
    let registry = REGISTRY.read().expect("backend registry poisoned");
    let entry = registry
        .get(name)
        .ok_or_else(|| ExecutorError::BackendUnavailable {
            name: name.to_string(),
        })?;
    Arc::clone(&entry.handle)
        .downcast::<B>()
        .map_err(|_| ExecutorError::BackendUnavailable {
            name: format!("{name} (registered with a different backend type)"),
        })
}

pub fn has_backend(name: &str) -> bool {
    REGISTRY
        .read()
        .expect("backend registry poisoned")
        .contains_key(name)
}

/// Names of all registered backends, sorted.
pub fn list_backends() -> Vec<String> {
    let registry = REGISTRY.read().expect("backend registry poisoned");
    let mut names: Vec<String> = registry.keys().cloned().collect();
    names.sort();
    names
}

/// Runs `f` while holding the compile lock of backend `name`.
///
/// The registry lock is released before `f` runs, so execution on other
/// units is never blocked by a compile. The lock guards no data, so a
/// panic inside an earlier holder does not block later compiles.
pub fn with_backend_lock<T>(name: &str, f: impl FnOnce() -> T) -> ExecutorResult<T> {
    let lock = {
        let registry = REGISTRY.read().expect("backend registry poisoned");
        let entry = registry
            .get(name)
            .ok_or_else(|| ExecutorError::BackendUnavailable {
                name: name.to_string(),
            })?;
        Arc::clone(&entry.lock)
    };
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(f())
}
