//! Explicit capture slots.
//!
//! A callback never stores an `Arc` to its owner directly. It embeds a
//! [`Slot`] per captured owner and reads through it inside its handlers; the
//! slot is emptied the moment the callback is wrapped and refilled only for
//! the duration of a handler invocation. Captures are declared once, at
//! construction, through the [`Captures`] trait - the declaration is the
//! complete capture topology, there is no hidden discovery.

use std::any::TypeId;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::TetherError;
use crate::registry::AnyOwner;

/// One typed capture cell.
///
/// Cheap to share: the callback keeps one `Arc<Slot<T>>` for reading, the
/// descriptor keeps another for installing and clearing.
pub struct Slot<T: Send + Sync + 'static> {
    cell: RwLock<Option<Arc<T>>>,
}

impl<T: Send + Sync + 'static> Slot<T> {
    /// A slot seeded with the value captured at declaration time. This is the
    /// normal constructor: the value tells the scanner *what* was captured,
    /// and is removed before any background work can run.
    #[must_use]
    pub fn capturing(owner: &Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            cell: RwLock::new(Some(Arc::clone(owner))),
        })
    }

    /// An empty slot whose owner is represented by an ancestor callback's
    /// capture of the same type. The scanner links it to that ancestor's
    /// handle; declare enclosing captures before inherited ones so the
    /// ancestor is known by the time this slot is resolved.
    #[must_use]
    pub fn inherited() -> Arc<Self> {
        Arc::new(Self {
            cell: RwLock::new(None),
        })
    }

    /// Reads the currently installed owner. Returns `None` outside handler
    /// invocations, and inside them when partial restoration left the owner
    /// absent.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Object-safe view of a slot, used by the scanner and descriptor to drive
/// slots without knowing their owner type.
pub trait CaptureSlot: Send + Sync {
    /// Static type of the owner this slot accepts.
    fn owner_type(&self) -> TypeId;

    /// Name of that type, for diagnostics.
    fn owner_type_name(&self) -> &'static str;

    /// Current contents, type-erased.
    fn peek(&self) -> Option<AnyOwner>;

    /// Installs a live owner. Fails if the value is not of the slot's type.
    fn install(&self, owner: AnyOwner) -> Result<(), TetherError>;

    /// Empties the slot.
    fn clear(&self);
}

impl<T: Send + Sync + 'static> CaptureSlot for Slot<T> {
    fn owner_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn owner_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn peek(&self) -> Option<AnyOwner> {
        self.get().map(|owner| owner as AnyOwner)
    }

    fn install(&self, owner: AnyOwner) -> Result<(), TetherError> {
        let owner = owner.downcast::<T>().map_err(|_| TetherError::SlotTypeMismatch {
            slot_type: std::any::type_name::<T>(),
        })?;
        let mut cell = self.cell.write().unwrap_or_else(PoisonError::into_inner);
        *cell = Some(owner);
        Ok(())
    }

    fn clear(&self) {
        let mut cell = self.cell.write().unwrap_or_else(PoisonError::into_inner);
        *cell = None;
    }
}

/// How a capture was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureKind {
    /// A short-lived owner (screen, request scope, ...).
    Owner,
    /// The callback this one was created inside. Must already be wrapped.
    Enclosing,
}

pub(crate) struct CaptureDecl {
    pub(crate) slot: Arc<dyn CaptureSlot>,
    pub(crate) kind: CaptureKind,
}

/// Ordered list of a callback's declared captures. Declaration order is the
/// order owners are restored in.
#[derive(Default)]
pub struct CaptureSet {
    entries: Vec<CaptureDecl>,
}

impl CaptureSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declares an owner capture.
    pub fn capture<T: Send + Sync + 'static>(&mut self, slot: &Arc<Slot<T>>) -> &mut Self {
        self.entries.push(CaptureDecl {
            slot: Arc::clone(slot) as Arc<dyn CaptureSlot>,
            kind: CaptureKind::Owner,
        });
        self
    }

    /// Declares a capture of the enclosing callback. Wrapping fails if that
    /// callback was never wrapped itself.
    pub fn enclosing<T: Send + Sync + 'static>(&mut self, slot: &Arc<Slot<T>>) -> &mut Self {
        self.entries.push(CaptureDecl {
            slot: Arc::clone(slot) as Arc<dyn CaptureSlot>,
            kind: CaptureKind::Enclosing,
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<CaptureDecl> {
        self.entries
    }
}

/// Implemented by callbacks that capture owners.
///
/// `declare` must push every capture slot the callback reads through, in a
/// fixed order. It is called exactly once, at wrap time.
pub trait Captures: Send + Sync + 'static {
    fn declare(&self, set: &mut CaptureSet);
}
