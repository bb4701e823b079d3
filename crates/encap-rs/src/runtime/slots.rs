//! Per-artifact cache of backend tensors keyed by input/output position.
//!
//! Each slot remembers the host buffer it last served and the backend
//! tensor bound to it, so repeated calls can skip allocation and copies.

use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, BackendResult, BackendTensor};
use crate::freshness::FreshnessTracker;
use crate::runtime::ArtifactId;
use crate::tensor::{HostPtr, HostTensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Input,
    Output,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Input => f.write_str("input"),
            SlotKind::Output => f.write_str("output"),
        }
    }
}

/// Outcome of resolving one position.
pub struct SlotResolution<T> {
    pub tensor: Arc<T>,
    /// A new backend tensor was allocated for this call.
    pub created: bool,
    /// The tensor must be (re)populated before or after use.
    pub stale: bool,
}

struct TensorSlot<T> {
    host: HostPtr,
    tensor: Arc<T>,
}

pub struct TensorSlotCache<T> {
    slots: Vec<Option<TensorSlot<T>>>,
}

impl<T> Default for TensorSlotCache<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T: BackendTensor> TensorSlotCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positions holding a backend tensor.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tensor(&self, position: usize) -> Option<&Arc<T>> {
        self.slots
            .get(position)
            .and_then(|slot| slot.as_ref().map(|slot| &slot.tensor))
    }

    /// Total bytes of storage currently held by the slots.
    pub fn size_in_bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.tensor.size_in_bytes())
            .sum()
    }

    /// Drops every slot and returns the bytes they held.
    pub fn release(&mut self) -> usize {
        let freed = self.size_in_bytes();
        self.slots.clear();
        freed
    }

    /// Picks the backend tensor for `position` and decides its staleness.
    ///
    /// Host-bound backends need a new tensor whenever the host buffer moves,
    /// since their tensors alias host memory. Device backends keep their
    /// tensor and rely on staleness to trigger a copy. Outputs are always
    /// stale. Inputs are stale when the tensor is new, the host buffer moved
    /// or `freshness` does not vouch for the buffer.
    pub fn resolve<B>(
        &mut self,
        backend: &B,
        position: usize,
        host: &HostTensor,
        kind: SlotKind,
        freshness: &dyn FreshnessTracker,
        artifact: ArtifactId,
    ) -> BackendResult<SlotResolution<T>>
    where
        B: Backend<Tensor = T> + ?Sized,
    {
        if self.slots.len() <= position {
            self.slots.resize_with(position + 1, || None);
        }
        let current = host.host_ptr();
        let previous = self.slots[position].take();
        let host_changed = previous.as_ref().map(|slot| slot.host) != Some(current);
        let host_bound = backend.placement().is_host_bound();

        let need_new = match &previous {
            None => true,
            Some(_) => host_bound && host_changed,
        };

        let stale = match kind {
            SlotKind::Output => true,
            SlotKind::Input => {
                need_new || host_changed || !freshness.is_fresh(current, artifact)
            }
        };

        let tensor = match previous {
            Some(slot) if !need_new => slot.tensor,
            previous => {
                let binding = if host_bound { Some(host) } else { None };
                match backend.create_tensor(host.spec(), binding) {
                    Ok(tensor) => tensor,
                    Err(err) => {
                        self.slots[position] = previous;
                        return Err(err);
                    }
                }
            }
        };
        tensor.set_stale(stale);

        self.slots[position] = Some(TensorSlot {
            host: current,
            tensor: Arc::clone(&tensor),
        });
        Ok(SlotResolution {
            tensor,
            created: need_new,
            stale,
        })
    }
}
