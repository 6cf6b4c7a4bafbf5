//! Error taxonomy for capture tracking and restoration.
//!
//! Three fatal classes propagate to callers and are never retried:
//! configuration errors (programmer misuse of the registration surface),
//! missing-registration errors (a `manage` call the host forgot), and
//! internal defects (a bug in this subsystem, not in caller code).
//!
//! Owner unavailability is deliberately *not* an error: `reference(true)`
//! returns `Ok(false)` while an owner is absent, and the surrounding engine is
//! expected to retry delivery once a same-id owner is managed again.

use thiserror::Error;

use tether_types::OwnerId;

/// Broad classification of a [`TetherError`], mirroring how callers should
/// react: configuration and missing-registration errors point at host code,
/// defects point at this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Programmer misuse of the registration surface.
    Configuration,
    /// A captured owner's id was never registered.
    NotManaged,
    /// A bug in this subsystem.
    Defect,
}

/// Errors raised by the manager, scanner, and descriptor.
#[derive(Debug, Error)]
pub enum TetherError {
    /// The resolver keyed an owner by the owner instance itself. Holding such
    /// an id would pin the owner in memory - the exact leak this crate exists
    /// to prevent.
    #[error("owner id for `{owner_type}` is the owner instance itself; resolve a stable discriminant instead")]
    OwnerIdIsOwner { owner_type: &'static str },

    /// `manage` was called for an owner the resolver does not recognize.
    #[error("owner id for `{owner_type}` could not be resolved; the resolver returned no discriminant")]
    OwnerIdUnresolved { owner_type: &'static str },

    /// A capture was declared as an enclosing callback, but that callback was
    /// never wrapped.
    #[error("enclosing callback of type `{callback_type}` was never wrapped; wrap the enclosing callback before its children")]
    EnclosingNotWrapped { callback_type: &'static str },

    /// An empty capture slot could not be linked to any ancestor capture of
    /// the same type. The capture topology is malformed.
    #[error("capture of `{owner_type}` holds no value and no ancestor capture of the same type exists")]
    CaptureUnresolved { owner_type: &'static str },

    /// A call reached a single-threaded manager from the wrong thread.
    #[error("call on {current} but this manager is pinned to {pinned}")]
    WrongThread { pinned: String, current: String },

    /// A captured owner resolves to an id that was never registered.
    #[error("a manage() call is missing for owner `{id}`")]
    OwnerNotManaged { id: OwnerId },

    /// The resolver returned no id for a capture and configuration forbids
    /// unmanaged captures.
    #[error("unmanaged capture of `{owner_type}` is forbidden by configuration")]
    UnmanagedCaptureForbidden { owner_type: &'static str },

    /// A capture slot was asked to hold a value of the wrong type. The
    /// topology recorded at wrap time guarantees types line up, so hitting
    /// this is a bug in this crate.
    #[error("capture slot of `{slot_type}` cannot hold a value of a different type")]
    SlotTypeMismatch { slot_type: &'static str },
}

impl TetherError {
    /// Classifies this error for reporting and triage.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::OwnerIdIsOwner { .. }
            | Self::OwnerIdUnresolved { .. }
            | Self::EnclosingNotWrapped { .. }
            | Self::CaptureUnresolved { .. }
            | Self::WrongThread { .. } => ErrorClass::Configuration,
            Self::OwnerNotManaged { .. } | Self::UnmanagedCaptureForbidden { .. } => {
                ErrorClass::NotManaged
            }
            Self::SlotTypeMismatch { .. } => ErrorClass::Defect,
        }
    }
}
