//! Signature-keyed LRU cache of compiled artifacts.
//!
//! Artifacts live in a single arena keyed by [`ArtifactId`]. The signature
//! index and the LRU order only store ids and signatures, so dropping the
//! arena entry releases the executable, its function and every tensor the
//! artifact cached.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::pipeline::PipelinedTensorStore;
use super::slots::TensorSlotCache;
use crate::backend::Executable;
use crate::function::Function;
use crate::signature::Signature;

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide identity of a compiled artifact.
///
/// Ids are never reused across caches, so trackers shared between units
/// can key on them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId(u64);

impl ArtifactId {
    pub fn new(raw: u64) -> Self {
        ArtifactId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    fn next() -> Self {
        ArtifactId(NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact#{}", self.0)
    }
}

pub struct Artifact<E: Executable> {
    pub id: ArtifactId,
    pub signature: Signature,
    pub executable: Arc<E>,
    pub function: Arc<Function>,
    pub(crate) input_slots: TensorSlotCache<E::Tensor>,
    pub(crate) output_slots: TensorSlotCache<E::Tensor>,
    pub(crate) pipeline: Option<PipelinedTensorStore<E::Tensor>>,
}

impl<E: Executable> Artifact<E> {
    /// Positions currently holding a cached input or output tensor.
    pub fn slot_count(&self) -> usize {
        self.input_slots.len() + self.output_slots.len()
    }

    /// Drops cached tensors; returns `(input_bytes, output_bytes)` freed.
    pub(crate) fn release_tensors(&mut self) -> (usize, usize) {
        let mut inputs = self.input_slots.release();
        let mut outputs = self.output_slots.release();
        if let Some(pipeline) = self.pipeline.take() {
            inputs += pipeline.input_size_in_bytes();
            outputs += pipeline.output_size_in_bytes();
        }
        (inputs, outputs)
    }
}

pub struct CompilationCache<E: Executable> {
    depth: usize,
    artifacts: HashMap<ArtifactId, Artifact<E>>,
    by_signature: HashMap<Signature, ArtifactId>,
    order: VecDeque<Signature>,
}

impl<E: Executable> CompilationCache<E> {
    pub fn new(depth: usize) -> Self {
        CompilationCache {
            depth: depth.max(1),
            artifacts: HashMap::new(),
            by_signature: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Looks `signature` up and moves it to the front of the LRU order on a hit.
    pub fn lookup(&mut self, signature: &Signature) -> Option<ArtifactId> {
        let id = *self.by_signature.get(signature)?;
        self.touch(signature);
        Some(id)
    }

    /// Lookup without touching the LRU order.
    pub fn peek(&self, signature: &Signature) -> Option<ArtifactId> {
        self.by_signature.get(signature).copied()
    }

    pub fn get(&self, id: ArtifactId) -> Option<&Artifact<E>> {
        self.artifacts.get(&id)
    }

    pub fn get_mut(&mut self, id: ArtifactId) -> Option<&mut Artifact<E>> {
        self.artifacts.get_mut(&id)
    }

    pub fn is_full(&self) -> bool {
        self.artifacts.len() >= self.depth
    }

    /// Removes the least recently used artifact.
    pub fn evict_lru(&mut self) -> Option<Artifact<E>> {
        let signature = self.order.pop_back()?;
        let id = self.by_signature.remove(&signature)?;
        crate::profiling::cache_event("executable_cache_evict");
        self.artifacts.remove(&id)
    }

    /// Inserts a freshly compiled artifact at the front of the LRU order.
    ///
    /// Callers evict first when the cache [`is_full`](Self::is_full).
    pub fn insert(
        &mut self,
        signature: Signature,
        executable: Arc<E>,
        function: Arc<Function>,
    ) -> ArtifactId {
        let id = ArtifactId::next();
        if let Some(previous) = self.by_signature.insert(signature.clone(), id) {
            self.artifacts.remove(&previous);
            self.remove_from_order(&signature);
        }
        self.order.push_front(signature.clone());
        self.artifacts.insert(
            id,
            Artifact {
                id,
                signature,
                executable,
                function,
                input_slots: TensorSlotCache::default(),
                output_slots: TensorSlotCache::default(),
                pipeline: None,
            },
        );
        id
    }

    /// Signatures from most to least recently used.
    pub fn lru_order(&self) -> Vec<Signature> {
        self.order.iter().cloned().collect()
    }

    fn touch(&mut self, signature: &Signature) {
        if self.order.front() == Some(signature) {
            return;
        }
        self.remove_from_order(signature);
        self.order.push_front(signature.clone());
    }

    fn remove_from_order(&mut self, signature: &Signature) {
        if let Some(pos) = self.order.iter().position(|candidate| candidate == signature) {
            self.order.remove(pos);
        }
    }
}
