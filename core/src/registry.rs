//! Owner registry: logical id to live owner handle.
//!
//! The registry never holds an owner alive. Each [`OwnerHandle`] stores a weak
//! pointer to the current live instance; `manage` swaps the target, `unmanage`
//! clears it, and every capture site sharing the handle observes the change at
//! its next read. Handles are created lazily on first `manage` for an id and
//! live for the registry's lifetime - the set of distinct logical owner
//! identities is assumed small and bounded (a handful of screen types, say),
//! so the map is never pruned.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tether_types::OwnerId;

/// Type-erased shared owner, the currency of the registry.
pub type AnyOwner = Arc<dyn Any + Send + Sync>;

type WeakOwner = Weak<dyn Any + Send + Sync>;

/// Returns true if both `Arc`s point at the same allocation.
pub(crate) fn same_instance(a: &AnyOwner, b: &AnyOwner) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A mutable, shareable indirection cell pointing (weakly) at the current
/// live owner for one logical id.
///
/// Several capture sites across several descriptors may share one handle, so
/// a single `manage` call updates all of them at once from the readers'
/// perspective. Ad-hoc handles for unmanaged captures carry no id and are
/// never stored in the registry.
pub struct OwnerHandle {
    id: Option<OwnerId>,
    target: RwLock<Option<WeakOwner>>,
}

impl OwnerHandle {
    pub(crate) fn managed(id: OwnerId, owner: &AnyOwner) -> Self {
        Self {
            id: Some(id),
            target: RwLock::new(Some(Arc::downgrade(owner))),
        }
    }

    pub(crate) fn unmanaged(owner: &AnyOwner) -> Self {
        Self {
            id: None,
            target: RwLock::new(Some(Arc::downgrade(owner))),
        }
    }

    /// The logical id this handle serves, if it is a managed one.
    #[must_use]
    pub fn id(&self) -> Option<&OwnerId> {
        self.id.as_ref()
    }

    /// Swaps the live target. Readers see the new owner on their next read.
    pub(crate) fn set(&self, owner: &AnyOwner) {
        let mut target = self.target.write().unwrap_or_else(PoisonError::into_inner);
        *target = Some(Arc::downgrade(owner));
    }

    /// Invalidates the handle until the next `set`.
    pub(crate) fn clear(&self) {
        let mut target = self.target.write().unwrap_or_else(PoisonError::into_inner);
        *target = None;
    }

    /// Upgrades to the current live owner, if any.
    pub(crate) fn live(&self) -> Option<AnyOwner> {
        let target = self.target.read().unwrap_or_else(PoisonError::into_inner);
        target.as_ref().and_then(WeakOwner::upgrade)
    }

    /// Returns true if the handle currently points at exactly this instance.
    pub(crate) fn points_at(&self, owner: &AnyOwner) -> bool {
        self.live().is_some_and(|live| same_instance(&live, owner))
    }
}

/// Outcome of a compare-and-clear, for logging at the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnmanageOutcome {
    /// The handle pointed at this instance and was cleared.
    Cleared,
    /// A different (usually newer) instance is live; nothing was cleared.
    StaleInstance,
    /// No handle exists for this id.
    Unknown,
}

/// Map of logical owner id to its handle.
pub(crate) struct OwnerRegistry {
    handles: RwLock<HashMap<OwnerId, Arc<OwnerHandle>>>,
}

impl OwnerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Creates the handle for `id` if absent, else swaps its live target.
    pub(crate) fn manage(&self, id: OwnerId, owner: &AnyOwner) {
        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        match handles.get(&id) {
            Some(handle) => handle.set(owner),
            None => {
                handles.insert(id.clone(), Arc::new(OwnerHandle::managed(id, owner)));
            }
        }
    }

    /// Clears the handle for `id` only if it still points at exactly this
    /// instance. A newer owner managed under the same id before a stale
    /// unregister call arrives is left untouched.
    pub(crate) fn unmanage(&self, id: &OwnerId, owner: &AnyOwner) -> UnmanageOutcome {
        let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
        match handles.get(id) {
            Some(handle) if handle.points_at(owner) => {
                handle.clear();
                UnmanageOutcome::Cleared
            }
            Some(_) => UnmanageOutcome::StaleInstance,
            None => UnmanageOutcome::Unknown,
        }
    }

    pub(crate) fn lookup(&self, id: &OwnerId) -> Option<Arc<OwnerHandle>> {
        let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
        handles.get(id).cloned()
    }
}
