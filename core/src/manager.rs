//! Callback manager facade.
//!
//! The manager is the host-facing surface: lifecycle glue calls [`manage`] /
//! [`unmanage`] as owners appear and disappear, and the execution engine
//! calls [`wrap`] once per callback before scheduling its background work.
//! Wrapping returns a [`Container`]; the engine brackets each handler
//! invocation with [`Container::reference`] and [`Container::dereference`]
//! (or uses [`Container::deliver`], which does both).
//!
//! The manager is an explicit context object - create one per process, or
//! one per test. It is cheap to clone and share across threads.
//!
//! [`manage`]: CallbackManager::manage
//! [`unmanage`]: CallbackManager::unmanage
//! [`wrap`]: CallbackManager::wrap

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tether_types::{Discriminant, Locking, ManagerConfig, OwnerId, UnmanagedPolicy};

use crate::descriptor::CallbackDescriptor;
use crate::error::TetherError;
use crate::locking::{
    AnyThread, LockFactory, MultiThreadLocks, PinnedThread, SingleThreadLocks, ThreadAffinity,
};
use crate::registry::{same_instance, AnyOwner, OwnerRegistry, UnmanageOutcome};
use crate::scanner::Scanner;
use crate::slot::Captures;

/// Borrowed, type-erased view of an owner handed to the id resolver.
///
/// Carries the owner's static type (captured at the generic boundary) so
/// resolvers can dispatch without downcasting, and the instance itself for
/// resolvers that key owners by an associated shared object.
pub struct OwnerRef<'a> {
    value: &'a AnyOwner,
    type_id: TypeId,
    type_name: &'static str,
}

impl<'a> OwnerRef<'a> {
    pub(crate) fn new(value: &'a AnyOwner, type_id: TypeId, type_name: &'static str) -> Self {
        Self {
            value,
            type_id,
            type_name,
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Downcasts to the concrete owner type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (**self.value).downcast_ref()
    }

    /// Clones the shared owner instance. Mostly useful for building
    /// [`Discriminant::Shared`] keys from an object *associated with* the
    /// owner - returning the owner itself as its own discriminant is
    /// rejected by the manager.
    #[must_use]
    pub fn instance(&self) -> AnyOwner {
        Arc::clone(self.value)
    }
}

/// Maps an owner to the discriminant part of its logical id.
///
/// Returning `None` routes the owner down the unmanaged-capture policy path:
/// such owners are tracked by weak reference only and never survive
/// replacement. The returned discriminant must never be the owner instance
/// itself.
pub trait OwnerIdResolver: Send + Sync {
    fn resolve_id(&self, owner: &OwnerRef<'_>) -> Option<Discriminant>;
}

/// Resolver that maps each registered owner type to its one logical
/// instance, the common case for unique screens: any instance of a
/// recognized type resolves to [`Discriminant::Singleton`], everything else
/// is unmanaged.
#[derive(Default)]
pub struct TypeResolver {
    recognized: HashSet<TypeId>,
}

impl TypeResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recognizes owners of type `T`.
    #[must_use]
    pub fn recognize<T: Any + Send + Sync>(mut self) -> Self {
        self.recognized.insert(TypeId::of::<T>());
        self
    }
}

impl OwnerIdResolver for TypeResolver {
    fn resolve_id(&self, owner: &OwnerRef<'_>) -> Option<Discriminant> {
        self.recognized
            .contains(&owner.type_id())
            .then_some(Discriminant::Singleton)
    }
}

/// Identity of a callback instance: the address of its shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CallbackKey(usize);

impl CallbackKey {
    fn of(callback: &AnyOwner) -> Self {
        Self(Arc::as_ptr(callback).cast::<()>() as usize)
    }
}

struct ArenaEntry {
    callback: Weak<dyn Any + Send + Sync>,
    descriptor: Weak<CallbackDescriptor>,
}

/// Explicit descriptor arena, keyed by callback identity.
///
/// Lets a nested callback wrapped during its parent's handler find the
/// parent's descriptor. Entries are pruned by the explicit lifecycle hook -
/// dropping the [`Container`] - and lookups revalidate the stored weak
/// callback against the queried instance, so a recycled allocation address
/// can never resolve to a stale descriptor.
pub(crate) struct DescriptorArena {
    entries: RwLock<HashMap<CallbackKey, ArenaEntry>>,
}

impl DescriptorArena {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, callback: &AnyOwner, descriptor: &Arc<CallbackDescriptor>) -> CallbackKey {
        let key = CallbackKey::of(callback);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key,
            ArenaEntry {
                callback: Arc::downgrade(callback),
                descriptor: Arc::downgrade(descriptor),
            },
        );
        key
    }

    pub(crate) fn lookup(&self, callback: &AnyOwner) -> Option<Arc<CallbackDescriptor>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(&CallbackKey::of(callback))?;
        let live = entry.callback.upgrade()?;
        if !same_instance(&live, callback) {
            return None;
        }
        entry.descriptor.upgrade()
    }

    fn release(&self, key: CallbackKey, descriptor: &Arc<CallbackDescriptor>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Remove only our own registration: the address may have been reused
        // by a callback wrapped after ours was dropped.
        if let Some(entry) = entries.get(&key) {
            if std::ptr::eq(entry.descriptor.as_ptr(), Arc::as_ptr(descriptor)) {
                entries.remove(&key);
            }
        }
    }
}

pub(crate) struct ManagerShared {
    pub(crate) config: ManagerConfig,
    pub(crate) resolver: Box<dyn OwnerIdResolver>,
    pub(crate) locks: Box<dyn LockFactory>,
    pub(crate) affinity: Box<dyn ThreadAffinity>,
    pub(crate) registry: OwnerRegistry,
    pub(crate) arena: DescriptorArena,
}

impl ManagerShared {
    fn resolve_id<O: Any + Send + Sync>(
        &self,
        erased: &AnyOwner,
    ) -> Result<Option<OwnerId>, TetherError> {
        let owner_ref = OwnerRef::new(erased, TypeId::of::<O>(), std::any::type_name::<O>());
        let Some(discriminant) = self.resolver.resolve_id(&owner_ref) else {
            return Ok(None);
        };
        if discriminant.is_same_object(erased) {
            return Err(TetherError::OwnerIdIsOwner {
                owner_type: std::any::type_name::<O>(),
            });
        }
        Ok(Some(OwnerId::of::<O>(discriminant)))
    }
}

/// Entry point for owner registration and callback wrapping.
#[derive(Clone)]
pub struct CallbackManager {
    shared: Arc<ManagerShared>,
}

impl CallbackManager {
    /// Starts building a manager around the given id resolver.
    #[must_use]
    pub fn builder(resolver: impl OwnerIdResolver + 'static) -> ManagerBuilder {
        ManagerBuilder {
            config: ManagerConfig::default(),
            resolver: Box::new(resolver),
            locks: None,
            affinity: None,
        }
    }

    /// A manager for hosts that serialize everything onto one logical
    /// thread: no locks, pinned to the first calling thread.
    #[must_use]
    pub fn single_threaded(resolver: impl OwnerIdResolver + 'static) -> Self {
        Self::builder(resolver)
            .config(ManagerConfig::single_threaded())
            .build()
    }

    /// A manager safe to drive from multiple threads concurrently.
    #[must_use]
    pub fn multi_threaded(resolver: impl OwnerIdResolver + 'static) -> Self {
        Self::builder(resolver)
            .config(ManagerConfig::multi_threaded())
            .build()
    }

    /// Registers `owner` as the live instance of its logical id, replacing
    /// any previous instance. Call at the owner's availability transitions
    /// (created, rebuilt after replacement).
    pub fn manage<O: Any + Send + Sync>(&self, owner: &Arc<O>) -> Result<(), TetherError> {
        self.shared.affinity.enforce()?;
        let erased: AnyOwner = owner.clone();
        let id = self
            .shared
            .resolve_id::<O>(&erased)?
            .ok_or(TetherError::OwnerIdUnresolved {
                owner_type: std::any::type_name::<O>(),
            })?;
        tracing::debug!("managing owner `{id}`");
        self.shared.registry.manage(id, &erased);
        Ok(())
    }

    /// Clears the registry entry for `owner`, but only while it is still the
    /// live instance - a newer owner managed under the same id before a
    /// stale unregister call arrives is left untouched.
    pub fn unmanage<O: Any + Send + Sync>(&self, owner: &Arc<O>) -> Result<(), TetherError> {
        self.shared.affinity.enforce()?;
        let erased: AnyOwner = owner.clone();
        let Some(id) = self.shared.resolve_id::<O>(&erased)? else {
            // Unresolvable owners are never in the registry.
            return Ok(());
        };
        match self.shared.registry.unmanage(&id, &erased) {
            UnmanageOutcome::Cleared => tracing::debug!("unmanaged owner `{id}`"),
            UnmanageOutcome::StaleInstance => {
                tracing::warn!("unmanage ignored for `{id}`: a different instance is live");
            }
            UnmanageOutcome::Unknown => {
                tracing::trace!("unmanage ignored for `{id}`: never managed");
            }
        }
        Ok(())
    }

    /// Discovers the callback's captures, clears them, and returns the
    /// container the execution engine holds for the callback's lifetime.
    ///
    /// Call once, before the associated background work is scheduled. After
    /// `wrap` returns, every capture slot on the callback (and on any
    /// ancestor reachable through its chain) holds no live owner reference.
    pub fn wrap<C: Captures>(&self, callback: &Arc<C>) -> Result<Container, TetherError> {
        self.shared.affinity.enforce()?;
        let erased: AnyOwner = callback.clone();
        let descriptor = Arc::new(Scanner::new(&self.shared).scan(callback.as_ref())?);
        let key = self.shared.arena.register(&erased, &descriptor);
        Ok(Container {
            descriptor,
            key,
            manager: Arc::downgrade(&self.shared),
        })
    }
}

/// Builder for a [`CallbackManager`].
pub struct ManagerBuilder {
    config: ManagerConfig,
    resolver: Box<dyn OwnerIdResolver>,
    locks: Option<Box<dyn LockFactory>>,
    affinity: Option<Box<dyn ThreadAffinity>>,
}

impl ManagerBuilder {
    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the unmanaged-capture policy.
    #[must_use]
    pub fn unmanaged_captures(mut self, policy: UnmanagedPolicy) -> Self {
        self.config.unmanaged_captures = policy;
        self
    }

    /// Substitutes a custom lock factory for the one implied by the locking
    /// mode.
    #[must_use]
    pub fn lock_factory(mut self, factory: impl LockFactory + 'static) -> Self {
        self.locks = Some(Box::new(factory));
        self
    }

    /// Substitutes a custom affinity policy for the one implied by the
    /// locking mode.
    #[must_use]
    pub fn thread_affinity(mut self, affinity: impl ThreadAffinity + 'static) -> Self {
        self.affinity = Some(Box::new(affinity));
        self
    }

    #[must_use]
    pub fn build(self) -> CallbackManager {
        let locks = self.locks.unwrap_or_else(|| match self.config.locking {
            Locking::SingleThread => Box::new(SingleThreadLocks),
            Locking::MultiThread => Box::new(MultiThreadLocks),
        });
        let affinity = self
            .affinity
            .unwrap_or_else(|| match self.config.locking {
                Locking::SingleThread => Box::new(PinnedThread::new()) as Box<dyn ThreadAffinity>,
                Locking::MultiThread => Box::new(AnyThread),
            });
        CallbackManager {
            shared: Arc::new(ManagerShared {
                config: self.config,
                resolver: self.resolver,
                locks,
                affinity,
                registry: OwnerRegistry::new(),
                arena: DescriptorArena::new(),
            }),
        }
    }
}

/// Handle the execution engine holds for one wrapped callback.
///
/// Dropping the container is the "this callback is done" signal: it removes
/// the callback's arena registration, so later callbacks can no longer link
/// to it as a parent. Keep the container alive for as long as the callback's
/// handlers may still fire.
pub struct Container {
    descriptor: Arc<CallbackDescriptor>,
    key: CallbackKey,
    manager: Weak<ManagerShared>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Restores the callback's owners ahead of a handler invocation. See
    /// [`CallbackDescriptor::reference`] for the full contract: `Ok(true)`
    /// must be paired with exactly one [`dereference`](Self::dereference),
    /// `Ok(false)` (owner currently absent) with none.
    pub fn reference(&self, rollback_on_failure: bool) -> Result<bool, TetherError> {
        if let Some(shared) = self.manager.upgrade() {
            shared.affinity.enforce()?;
        }
        self.descriptor.reference(rollback_on_failure)
    }

    /// Removes the owners installed by a successful
    /// [`reference`](Self::reference).
    pub fn dereference(&self) {
        self.descriptor.dereference();
    }

    /// Brackets one handler invocation: restores owners, runs `handler`,
    /// and removes the owners again even if the handler panics.
    ///
    /// Returns `Ok(None)` when an owner is currently absent; the engine can
    /// retry later, once a same-id owner is managed again.
    pub fn deliver<R>(&self, handler: impl FnOnce() -> R) -> Result<Option<R>, TetherError> {
        if !self.reference(true)? {
            return Ok(None);
        }
        let _guard = DereferenceGuard {
            descriptor: &self.descriptor,
        };
        Ok(Some(handler()))
    }

    /// Returns true if any capture in this callback's chain is bound to the
    /// given logical owner id.
    #[must_use]
    pub fn uses_owner(&self, id: &OwnerId) -> bool {
        self.descriptor.uses_owner(id)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Some(shared) = self.manager.upgrade() {
            shared.arena.release(self.key, &self.descriptor);
        }
    }
}

struct DereferenceGuard<'a> {
    descriptor: &'a Arc<CallbackDescriptor>,
}

impl Drop for DereferenceGuard<'_> {
    fn drop(&mut self) {
        self.descriptor.dereference();
    }
}
