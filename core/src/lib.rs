//! Capture tracking and owner restoration for callback-based background work.
//!
//! Callbacks handed to background work tend to capture short-lived "owner"
//! objects - a screen, a request scope - and that capture is a double hazard:
//! the owner cannot be reclaimed while the work runs, and by the time a
//! handler fires the owner may be stale or destroyed, replaced by a newer
//! instance the handler never sees. This crate severs those captures the
//! moment a callback is wrapped and restores them - by logical identity, not
//! object identity - for exactly the duration of each handler invocation.
//!
//! # Terminology
//!
//! - **Owner**: a short-lived object a callback reads through, whose
//!   availability changes over time (created, destroyed, replaced).
//! - **Capture**: a reference a callback holds to an owner, declared
//!   explicitly through a [`Slot`] and the [`Captures`] trait.
//! - **Logical id**: an [`OwnerId`] - owner type plus discriminant - naming
//!   "the same owner slot" across instance replacement.
//! - **Reference / dereference**: installing and removing live owner
//!   references into a callback's slots, reference-counted so that nested
//!   handler invocations never tear down an ancestor's owners.
//!
//! # How it works
//!
//! Lifecycle glue calls [`CallbackManager::manage`] and
//! [`CallbackManager::unmanage`] as owners appear and disappear. Before
//! scheduling a unit of background work, the engine calls
//! [`CallbackManager::wrap`] on the callback: its declared captures are
//! resolved to shared owner handles (chasing chains of nested callbacks) and
//! then emptied, so the running work holds no path to any owner - the owner
//! can be dropped mid-flight without leaking. Around each handler invocation
//! the engine calls [`Container::reference`] / [`Container::dereference`]
//! (or [`Container::deliver`]): owners are looked up by logical id at that
//! instant, so a handler always observes the *current* instance, and an
//! absent owner simply postpones delivery instead of erroring.
//!
//! # Known limitation
//!
//! An owner handle is shared by every descriptor capturing the same logical
//! owner. A `manage` call racing a `reference` on another thread can
//! therefore, in rare interleavings, cause two descriptors expected to share
//! one logical owner to transiently restore two different instances. Owner
//! replacement is rare relative to callback completion, so this is accepted
//! rather than paid for with a global lock.

pub mod descriptor;
pub mod error;
pub mod locking;
pub mod manager;
pub mod registry;
mod scanner;
pub mod slot;

pub use descriptor::CallbackDescriptor;
pub use error::{ErrorClass, TetherError};
pub use locking::{
    AnyThread, DescriptorLock, LockFactory, MultiThreadLocks, MutexLock, NoopLock, PinnedThread,
    SingleThreadLocks, ThreadAffinity,
};
pub use manager::{CallbackManager, Container, ManagerBuilder, OwnerIdResolver, OwnerRef, TypeResolver};
pub use registry::{AnyOwner, OwnerHandle};
pub use slot::{CaptureSet, CaptureSlot, Captures, Slot};

pub use tether_types::{Discriminant, Locking, ManagerConfig, OwnerId, UnmanagedPolicy};
