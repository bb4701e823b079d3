//! Trackers answering whether a host buffer's content already lives on the
//! backend for a given artifact.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::runtime::ArtifactId;
use crate::tensor::HostPtr;

pub trait FreshnessTracker: Send + Sync {
    fn is_fresh(&self, host: HostPtr, artifact: ArtifactId) -> bool;

    /// Records that `host` was just copied into `artifact`'s input tensor.
    fn mark_fresh(&self, host: HostPtr, artifact: ArtifactId) {
        let _ = (host, artifact);
    }

    /// Records that the content behind `host` changed.
    fn invalidate(&self, host: HostPtr) {
        let _ = host;
    }

    /// Drops every record for an evicted artifact.
    fn forget_artifact(&self, artifact: ArtifactId) {
        let _ = artifact;
    }
}

/// Reports every buffer as stale, so device inputs are always copied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverFresh;

impl FreshnessTracker for NeverFresh {
    fn is_fresh(&self, _host: HostPtr, _artifact: ArtifactId) -> bool {
        false
    }
}

/// Records `(host buffer, artifact)` pairs whose copy is current.
///
/// Writers of host buffers outside the executor must call
/// [`FreshnessTracker::invalidate`] after mutating a buffer in place.
#[derive(Debug, Default)]
pub struct FreshnessRegistry {
    entries: Mutex<HashMap<HostPtr, HashSet<ArtifactId>>>,
}

impl FreshnessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("freshness registry poisoned")
            .values()
            .map(HashSet::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FreshnessTracker for FreshnessRegistry {
    fn is_fresh(&self, host: HostPtr, artifact: ArtifactId) -> bool {
        self.entries
            .lock()
            .expect("freshness registry poisoned")
            .get(&host)
            .is_some_and(|artifacts| artifacts.contains(&artifact))
    }

    fn mark_fresh(&self, host: HostPtr, artifact: ArtifactId) {
        self.entries
            .lock()
            .expect("freshness registry poisoned")
            .entry(host)
            .or_default()
            .insert(artifact);
    }

    fn invalidate(&self, host: HostPtr) {
        self.entries
            .lock()
            .expect("freshness registry poisoned")
            .remove(&host);
    }

    fn forget_artifact(&self, artifact: ArtifactId) {
        let mut entries = self.entries.lock().expect("freshness registry poisoned");
        entries.retain(|_, artifacts| {
            artifacts.remove(&artifact);
            !artifacts.is_empty()
        });
    }
}
