//! Pluggable locking and thread-affinity strategies.
//!
//! A manager picks one strategy pair at construction: no-op locks plus a
//! pinned-thread check for hosts that serialize everything onto one logical
//! thread, or mutex-backed locks plus an unrestricted affinity policy for
//! genuinely concurrent use. Descriptor critical sections are brief (install
//! or remove a few capture sites); scans and resolver calls never run under a
//! lock, and no descriptor lock is ever held while another descriptor is
//! entered, so lock ordering issues cannot arise.

use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use crate::error::TetherError;

/// Mutual exclusion around one descriptor's critical sections.
pub trait DescriptorLock: Send + Sync {
    /// Runs `section` while holding the lock. Called exactly once per entry.
    fn with_lock(&self, section: &mut dyn FnMut());
}

/// Creates one lock per descriptor.
pub trait LockFactory: Send + Sync {
    fn create(&self) -> Box<dyn DescriptorLock>;
}

/// Checked at the manager's entry points before any state is touched.
pub trait ThreadAffinity: Send + Sync {
    /// Fails fast when called from a thread the manager does not accept.
    fn enforce(&self) -> Result<(), TetherError>;
}

/// No mutual exclusion. Only sound when the affinity policy (or the host's
/// own discipline) serializes every operation onto one logical thread.
pub struct NoopLock;

impl DescriptorLock for NoopLock {
    fn with_lock(&self, section: &mut dyn FnMut()) {
        section();
    }
}

/// Mutex-backed critical sections.
pub struct MutexLock {
    inner: Mutex<()>,
}

impl MutexLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }
}

impl Default for MutexLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorLock for MutexLock {
    fn with_lock(&self, section: &mut dyn FnMut()) {
        let _guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        section();
    }
}

/// Factory for the single-threaded discipline: every descriptor shares the
/// same no-op lock behavior.
pub struct SingleThreadLocks;

impl LockFactory for SingleThreadLocks {
    fn create(&self) -> Box<dyn DescriptorLock> {
        Box::new(NoopLock)
    }
}

/// Factory for concurrent use: one mutex per descriptor.
pub struct MultiThreadLocks;

impl LockFactory for MultiThreadLocks {
    fn create(&self) -> Box<dyn DescriptorLock> {
        Box::new(MutexLock::new())
    }
}

/// Accepts calls from any thread.
pub struct AnyThread;

impl ThreadAffinity for AnyThread {
    fn enforce(&self) -> Result<(), TetherError> {
        Ok(())
    }
}

/// Pins the manager to the first thread that uses it and rejects every other
/// thread afterwards.
pub struct PinnedThread {
    pinned: OnceLock<ThreadId>,
}

impl PinnedThread {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pinned: OnceLock::new(),
        }
    }
}

impl Default for PinnedThread {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadAffinity for PinnedThread {
    fn enforce(&self) -> Result<(), TetherError> {
        let current = thread::current().id();
        let pinned = *self.pinned.get_or_init(|| current);
        if pinned == current {
            Ok(())
        } else {
            Err(TetherError::WrongThread {
                pinned: format!("{pinned:?}"),
                current: format!("{current:?}"),
            })
        }
    }
}
