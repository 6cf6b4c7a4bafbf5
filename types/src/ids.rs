//! Logical owner identity.
//!
//! An [`OwnerId`] names "the same owner slot" across instance replacement: a
//! screen that is torn down and rebuilt keeps its id, so work bound to the old
//! instance can be delivered to the new one. The id is the owner's concrete
//! type plus a [`Discriminant`] distinguishing coexisting owners of that type.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Distinguishes owners of the same type from one another.
///
/// The discriminant is supplied by the host's id resolver. It must be a stable
/// value that survives owner replacement - never the owner instance itself,
/// which would pin the owner in memory for as long as the id is held.
#[derive(Clone)]
pub enum Discriminant {
    /// One logical instance per owner type (e.g. a unique dashboard screen).
    Singleton,
    /// A numeric key, for owners addressed by position or stable index.
    Index(u64),
    /// A textual key, for owners addressed by name, route, or URL.
    Label(Cow<'static, str>),
    /// An existing shared object used as a key, compared by pointer identity.
    Shared(Arc<dyn Any + Send + Sync>),
}

impl Discriminant {
    /// Builds a textual discriminant.
    #[must_use]
    pub fn label(value: impl Into<Cow<'static, str>>) -> Self {
        Self::Label(value.into())
    }

    /// Returns true if this is a [`Discriminant::Shared`] key pointing at
    /// exactly the given object.
    #[must_use]
    pub fn is_same_object(&self, object: &Arc<dyn Any + Send + Sync>) -> bool {
        match self {
            Self::Shared(key) => std::ptr::addr_eq(Arc::as_ptr(key), Arc::as_ptr(object)),
            _ => false,
        }
    }

    fn shared_addr(key: &Arc<dyn Any + Send + Sync>) -> usize {
        Arc::as_ptr(key).cast::<()>() as usize
    }
}

impl PartialEq for Discriminant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Singleton, Self::Singleton) => true,
            (Self::Index(a), Self::Index(b)) => a == b,
            (Self::Label(a), Self::Label(b)) => a == b,
            (Self::Shared(a), Self::Shared(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }
}

impl Eq for Discriminant {}

impl Hash for Discriminant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Singleton => state.write_u8(0),
            Self::Index(index) => {
                state.write_u8(1);
                index.hash(state);
            }
            Self::Label(label) => {
                state.write_u8(2);
                label.hash(state);
            }
            Self::Shared(key) => {
                state.write_u8(3);
                Self::shared_addr(key).hash(state);
            }
        }
    }
}

impl fmt::Debug for Discriminant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => write!(f, "Singleton"),
            Self::Index(index) => write!(f, "Index({index})"),
            Self::Label(label) => write!(f, "Label({label:?})"),
            Self::Shared(key) => write!(f, "Shared({:#x})", Self::shared_addr(key)),
        }
    }
}

/// Logical identity of an owner: its concrete type plus a discriminant.
///
/// Two owners with the same type but different discriminants are distinct and
/// must never be conflated, even if one was managed more recently.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId {
    type_id: TypeId,
    type_name: &'static str,
    discriminant: Discriminant,
}

impl OwnerId {
    /// Builds the id of an owner of type `T`.
    #[must_use]
    pub fn of<T: 'static>(discriminant: Discriminant) -> Self {
        Self::from_parts(TypeId::of::<T>(), std::any::type_name::<T>(), discriminant)
    }

    /// Builds an id from an already-erased type. The `type_id` and `type_name`
    /// must describe the same type.
    #[must_use]
    pub fn from_parts(type_id: TypeId, type_name: &'static str, discriminant: Discriminant) -> Self {
        Self {
            type_id,
            type_name,
            discriminant,
        }
    }

    /// The id of the unique logical instance of type `T`.
    #[must_use]
    pub fn singleton<T: 'static>() -> Self {
        Self::of::<T>(Discriminant::Singleton)
    }

    /// The id of the `T` instance at a numeric key.
    #[must_use]
    pub fn indexed<T: 'static>(index: u64) -> Self {
        Self::of::<T>(Discriminant::Index(index))
    }

    /// The id of the `T` instance at a textual key.
    #[must_use]
    pub fn labeled<T: 'static>(label: impl Into<Cow<'static, str>>) -> Self {
        Self::of::<T>(Discriminant::label(label))
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn discriminant(&self) -> &Discriminant {
        &self.discriminant
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminant {
            Discriminant::Singleton => write!(f, "{}", self.type_name),
            Discriminant::Index(index) => write!(f, "{}#{index}", self.type_name),
            Discriminant::Label(label) => write!(f, "{}@{label}", self.type_name),
            Discriminant::Shared(key) => {
                write!(f, "{}#{:#x}", self.type_name, Discriminant::shared_addr(key))
            }
        }
    }
}
