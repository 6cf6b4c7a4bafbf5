//! Callback descriptors and the reference/dereference protocol.
//!
//! A descriptor is the per-callback record of its capture topology: the
//! ordered capture sites discovered at wrap time plus the descriptors of the
//! callbacks it is nested inside. The topology is fixed at construction; only
//! the reference counter and the live contents reachable through each owner
//! handle change afterwards.
//!
//! The counter makes nesting work: a child callback started from inside a
//! still-active parent handler increments the parent's counter instead of
//! re-installing anything, and the parent's owners survive until the last
//! dereference. Only the 0->1 and 1->0 edges touch the slots.

use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tether_types::OwnerId;

use crate::error::TetherError;
use crate::locking::DescriptorLock;
use crate::registry::OwnerHandle;
use crate::slot::CaptureSlot;

/// One capture: the slot on the callback plus the handle supplying its owner.
pub(crate) struct CaptureSite {
    slot: Arc<dyn CaptureSlot>,
    handle: Arc<OwnerHandle>,
}

impl CaptureSite {
    pub(crate) fn new(slot: Arc<dyn CaptureSlot>, handle: Arc<OwnerHandle>) -> Self {
        Self { slot, handle }
    }

    /// Installs the handle's live owner into the slot. `Ok(false)` means the
    /// owner is currently absent (destroyed and not yet replaced).
    fn install(&self) -> Result<bool, TetherError> {
        match self.handle.live() {
            Some(owner) => {
                self.slot.install(owner)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn clear(&self) {
        self.slot.clear();
    }

    fn owner_type(&self) -> TypeId {
        self.slot.owner_type()
    }

    fn owner_type_name(&self) -> &'static str {
        self.slot.owner_type_name()
    }

    pub(crate) fn handle(&self) -> &Arc<OwnerHandle> {
        &self.handle
    }
}

/// Per-callback capture topology plus the reference counter driving it.
pub struct CallbackDescriptor {
    sites: Vec<CaptureSite>,
    parents: Vec<Arc<CallbackDescriptor>>,
    // Mutated only inside `lock` critical sections.
    counter: AtomicU32,
    lock: Box<dyn DescriptorLock>,
}

impl CallbackDescriptor {
    pub(crate) fn new(
        sites: Vec<CaptureSite>,
        parents: Vec<Arc<CallbackDescriptor>>,
        lock: Box<dyn DescriptorLock>,
    ) -> Self {
        Self {
            sites,
            parents,
            counter: AtomicU32::new(0),
            lock,
        }
    }

    /// Restores captured owners ahead of a handler invocation, ancestors
    /// before self.
    ///
    /// Returns `Ok(false)` when an owner is currently absent and
    /// `rollback_on_failure` is set; nothing is left installed by this call
    /// and no `dereference` must follow. With `rollback_on_failure` unset,
    /// partial restoration is allowed and the call always reports success.
    /// `Ok(true)` must be paired with exactly one [`dereference`].
    ///
    /// [`dereference`]: Self::dereference
    pub fn reference(&self, rollback_on_failure: bool) -> Result<bool, TetherError> {
        for (index, parent) in self.parents.iter().enumerate() {
            let restored = match parent.reference(rollback_on_failure) {
                Ok(restored) => restored,
                Err(error) => {
                    Self::rollback_parents(&self.parents[..index]);
                    return Err(error);
                }
            };
            if !restored {
                // Only reachable with rollback_on_failure set. Retry must
                // start from a clean slate, so earlier ancestors are undone.
                Self::rollback_parents(&self.parents[..index]);
                return Ok(false);
            }
        }

        let mut outcome: Result<bool, TetherError> = Ok(true);
        let mut section = || outcome = self.reference_sites(rollback_on_failure);
        self.lock.with_lock(&mut section);

        if !matches!(outcome, Ok(true)) {
            Self::rollback_parents(&self.parents);
        }
        outcome
    }

    /// Removes owner references after a handler invocation, self before
    /// ancestors. Real removal happens only on the 1->0 edge.
    ///
    /// # Panics
    ///
    /// Panics when called without a matching successful [`reference`]; the
    /// counter never goes negative.
    ///
    /// [`reference`]: Self::reference
    pub fn dereference(&self) {
        let mut section = || self.dereference_sites();
        self.lock.with_lock(&mut section);

        for parent in self.parents.iter().rev() {
            parent.dereference();
        }
    }

    /// Returns true if any capture in this descriptor's chain is bound to the
    /// given logical owner id.
    #[must_use]
    pub fn uses_owner(&self, id: &OwnerId) -> bool {
        self.sites
            .iter()
            .any(|site| site.handle().id() == Some(id))
            || self.parents.iter().any(|parent| parent.uses_owner(id))
    }

    pub(crate) fn parents(&self) -> &[Arc<CallbackDescriptor>] {
        &self.parents
    }

    /// Finds the handle of a capture site whose slot has the given static
    /// type. Used to adopt captures already represented by an ancestor.
    pub(crate) fn find_site_handle(&self, owner_type: TypeId) -> Option<Arc<OwnerHandle>> {
        self.sites
            .iter()
            .find(|site| site.owner_type() == owner_type)
            .map(|site| Arc::clone(site.handle()))
    }

    /// Runs under the descriptor lock.
    fn reference_sites(&self, rollback_on_failure: bool) -> Result<bool, TetherError> {
        let count = self.counter.load(Ordering::SeqCst);
        if count > 0 {
            self.counter.store(count + 1, Ordering::SeqCst);
            return Ok(true);
        }

        for (index, site) in self.sites.iter().enumerate() {
            match site.install() {
                Ok(true) => {}
                Ok(false) if rollback_on_failure => {
                    tracing::trace!(
                        "owner `{}` unavailable, rolling back restoration",
                        site.owner_type_name()
                    );
                    Self::clear_sites(&self.sites[..index]);
                    return Ok(false);
                }
                Ok(false) => {
                    // Partial restoration: the slot stays empty until the
                    // next idle->active edge.
                }
                Err(defect) => {
                    Self::clear_sites(&self.sites[..index]);
                    return Err(defect);
                }
            }
        }

        self.counter.store(1, Ordering::SeqCst);
        tracing::trace!("restored {} capture site(s)", self.sites.len());
        Ok(true)
    }

    /// Runs under the descriptor lock.
    fn dereference_sites(&self) {
        let count = self.counter.load(Ordering::SeqCst);
        assert!(
            count > 0,
            "dereference() without a matching successful reference()"
        );
        self.counter.store(count - 1, Ordering::SeqCst);
        if count == 1 {
            Self::clear_sites(&self.sites);
            tracing::trace!("cleared {} capture site(s)", self.sites.len());
        }
    }

    fn clear_sites(sites: &[CaptureSite]) {
        for site in sites.iter().rev() {
            site.clear();
        }
    }

    fn rollback_parents(parents: &[Arc<CallbackDescriptor>]) {
        for parent in parents.iter().rev() {
            parent.dereference();
        }
    }
}
