//! Capture scanner.
//!
//! Runs once per callback, at wrap time, outside any lock. The scanner turns
//! a callback's declared captures into the descriptor's fixed topology:
//! every slot becomes a capture site bound to an owner handle, captures of
//! previously-wrapped callbacks become parent-descriptor links, and empty
//! slots adopt the handle of an ancestor capture with the same static type.
//! Once the walk completes, every declared slot is emptied - the recorded
//! topology is from then on the only surviving record of these
//! relationships, and background work can never reach a live owner through
//! the callback.

use std::any::TypeId;
use std::sync::Arc;

use tether_types::{OwnerId, UnmanagedPolicy};

use crate::descriptor::{CallbackDescriptor, CaptureSite};
use crate::error::TetherError;
use crate::manager::{ManagerShared, OwnerRef};
use crate::registry::{AnyOwner, OwnerHandle};
use crate::slot::{CaptureDecl, CaptureKind, CaptureSet, Captures, CaptureSlot};

pub(crate) struct Scanner<'m> {
    shared: &'m ManagerShared,
}

impl<'m> Scanner<'m> {
    pub(crate) fn new(shared: &'m ManagerShared) -> Self {
        Self { shared }
    }

    /// Discovers the callback's capture topology and clears every declared
    /// slot. Clearing happens even when the scan errors out: a callback
    /// handed to `wrap` must never leave with live owner references, not
    /// even on the error path.
    pub(crate) fn scan<C: Captures>(&self, callback: &C) -> Result<CallbackDescriptor, TetherError> {
        let mut declared = CaptureSet::new();
        callback.declare(&mut declared);
        let entries = declared.into_entries();
        let slots: Vec<Arc<dyn CaptureSlot>> =
            entries.iter().map(|decl| Arc::clone(&decl.slot)).collect();

        let mut sites = Vec::with_capacity(entries.len());
        let mut parents = Vec::new();
        let outcome = self.resolve_declarations(entries, &mut sites, &mut parents);

        for slot in &slots {
            slot.clear();
        }

        outcome?;
        tracing::debug!(
            "scanned callback: {} capture site(s), {} parent link(s)",
            sites.len(),
            parents.len()
        );
        Ok(CallbackDescriptor::new(
            sites,
            parents,
            self.shared.locks.create(),
        ))
    }

    fn resolve_declarations(
        &self,
        entries: Vec<CaptureDecl>,
        sites: &mut Vec<CaptureSite>,
        parents: &mut Vec<Arc<CallbackDescriptor>>,
    ) -> Result<(), TetherError> {
        for decl in entries {
            match decl.slot.peek() {
                Some(value) => self.resolve_value(&decl, value, sites, parents)?,
                None => {
                    // Already cleared by an ancestor's own wrap: the owner is
                    // represented somewhere up the chain. Adopt the handle of
                    // the ancestor capture with the identical static type.
                    let handle = Self::adopt_from_parents(parents, decl.slot.owner_type())
                        .ok_or_else(|| TetherError::CaptureUnresolved {
                            owner_type: decl.slot.owner_type_name(),
                        })?;
                    sites.push(CaptureSite::new(decl.slot, handle));
                }
            }
        }
        Ok(())
    }

    fn resolve_value(
        &self,
        decl: &CaptureDecl,
        value: AnyOwner,
        sites: &mut Vec<CaptureSite>,
        parents: &mut Vec<Arc<CallbackDescriptor>>,
    ) -> Result<(), TetherError> {
        if let Some(parent) = self.shared.arena.lookup(&value) {
            // Nested callback: this one was created inside another wrapped
            // callback's handler. Link the enclosing descriptor (its own
            // captures were discovered at its own wrap, so chains resolve
            // transitively) and keep the slot restorable through an ad-hoc
            // weak handle to the enclosing callback itself.
            tracing::debug!(
                "capture of `{}` is a wrapped callback, linking parent descriptor",
                decl.slot.owner_type_name()
            );
            parents.push(parent);
            sites.push(CaptureSite::new(
                Arc::clone(&decl.slot),
                Arc::new(OwnerHandle::unmanaged(&value)),
            ));
            return Ok(());
        }

        if decl.kind == CaptureKind::Enclosing {
            return Err(TetherError::EnclosingNotWrapped {
                callback_type: decl.slot.owner_type_name(),
            });
        }

        let handle = self.resolve_owner(&decl.slot, &value)?;
        sites.push(CaptureSite::new(Arc::clone(&decl.slot), handle));
        Ok(())
    }

    /// Resolves a captured owner to a handle, either through the registry or
    /// as an ad-hoc unmanaged handle when policy allows.
    fn resolve_owner(
        &self,
        slot: &Arc<dyn CaptureSlot>,
        value: &AnyOwner,
    ) -> Result<Arc<OwnerHandle>, TetherError> {
        let owner_ref = OwnerRef::new(value, slot.owner_type(), slot.owner_type_name());
        match self.shared.resolver.resolve_id(&owner_ref) {
            Some(discriminant) => {
                if discriminant.is_same_object(value) {
                    return Err(TetherError::OwnerIdIsOwner {
                        owner_type: slot.owner_type_name(),
                    });
                }
                let id =
                    OwnerId::from_parts(slot.owner_type(), slot.owner_type_name(), discriminant);
                // A resolvable id with no handle means a manage() call is
                // missing - a programming defect in the host, not a
                // transient condition.
                self.shared
                    .registry
                    .lookup(&id)
                    .ok_or(TetherError::OwnerNotManaged { id })
            }
            None => match self.shared.config.unmanaged_captures {
                UnmanagedPolicy::Allow => Ok(Arc::new(OwnerHandle::unmanaged(value))),
                UnmanagedPolicy::Deny => Err(TetherError::UnmanagedCaptureForbidden {
                    owner_type: slot.owner_type_name(),
                }),
            },
        }
    }

    fn adopt_from_parents(
        parents: &[Arc<CallbackDescriptor>],
        owner_type: TypeId,
    ) -> Option<Arc<OwnerHandle>> {
        for parent in parents {
            if let Some(handle) = parent.find_site_handle(owner_type) {
                return Some(handle);
            }
            if let Some(handle) = Self::adopt_from_parents(parent.parents(), owner_type) {
                return Some(handle);
            }
        }
        None
    }
}
