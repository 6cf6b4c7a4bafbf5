//! Owner destruction, replacement, and logical-id succession.

use std::sync::Arc;

use tether_core::{CallbackManager, ErrorClass, TetherError};

use crate::common::{AppResolver, Document, ExportDone, SaveDone, Screen, SelfIdResolver};

fn manager() -> CallbackManager {
    CallbackManager::multi_threaded(AppResolver)
}

#[test]
fn unmanaged_owner_postpones_delivery() {
    let manager = manager();
    let screen = Screen::new("home");
    manager.manage(&screen).unwrap();

    let callback = SaveDone::new(&screen);
    let container = manager.wrap(&callback).unwrap();

    manager.unmanage(&screen).unwrap();

    // The owner is gone but not replaced: not an error, just unavailable.
    // A false return must not be paired with a dereference.
    assert!(!container.reference(true).unwrap());
    assert!(callback.screen.get().is_none());
}

#[test]
fn replacement_installs_the_successor_never_the_original() {
    let manager = manager();
    let first = Screen::new("first");
    manager.manage(&first).unwrap();

    let callback = SaveDone::new(&first);
    let container = manager.wrap(&callback).unwrap();

    // First delivery observes the original instance.
    assert!(container.reference(true).unwrap());
    assert!(Arc::ptr_eq(&callback.screen.get().unwrap(), &first));
    container.dereference();

    // The screen is rebuilt under the same logical id.
    manager.unmanage(&first).unwrap();
    let second = Screen::new("second");
    manager.manage(&second).unwrap();

    assert!(container.reference(true).unwrap());
    let restored = callback.screen.get().unwrap();
    assert!(Arc::ptr_eq(&restored, &second));
    assert!(!Arc::ptr_eq(&restored, &first));
    container.dereference();
}

#[test]
fn delivery_resumes_once_a_successor_is_managed() {
    let manager = manager();
    let first = Screen::new("first");
    manager.manage(&first).unwrap();

    let callback = SaveDone::new(&first);
    let container = manager.wrap(&callback).unwrap();
    manager.unmanage(&first).unwrap();

    // Repeated attempts while the owner is absent are safe and idempotent.
    for _ in 0..3 {
        assert!(!container.reference(true).unwrap());
    }

    let second = Screen::new("second");
    manager.manage(&second).unwrap();
    let delivered = container
        .deliver(|| callback.screen.get().unwrap().name)
        .unwrap();
    assert_eq!(delivered, Some("second"));
}

#[test]
fn distinct_discriminants_are_never_conflated() {
    let manager = manager();
    let invoice = Document::new(1, "invoice");
    let report = Document::new(2, "report");
    manager.manage(&invoice).unwrap();
    manager.manage(&report).unwrap();

    let callback = ExportDone::new(&invoice);
    let container = manager.wrap(&callback).unwrap();

    // `report` was managed most recently, but the callback is bound to
    // route 1 and must keep restoring `invoice`.
    assert!(container.reference(true).unwrap());
    let restored = callback.document.get().unwrap();
    assert_eq!(restored.route, 1);
    assert_eq!(restored.title, "invoice");
    container.dereference();
}

#[test]
fn stale_unmanage_does_not_wipe_the_successor() {
    let manager = manager();
    let old = Screen::new("old");
    manager.manage(&old).unwrap();
    let new = Screen::new("new");
    manager.manage(&new).unwrap();

    // The old instance unregisters late, after its replacement appeared.
    manager.unmanage(&old).unwrap();

    let callback = SaveDone::new(&new);
    let container = manager.wrap(&callback).unwrap();
    assert!(container.reference(true).unwrap());
    assert!(Arc::ptr_eq(&callback.screen.get().unwrap(), &new));
    container.dereference();
}

#[test]
fn dropped_owner_is_not_kept_alive_by_the_registry() {
    let manager = manager();
    let screen = Screen::new("short-lived");
    manager.manage(&screen).unwrap();

    let callback = SaveDone::new(&screen);
    let container = manager.wrap(&callback).unwrap();

    // Every strong reference disappears without an unmanage call.
    drop(screen);

    assert!(!container.reference(true).unwrap());
}

#[test]
fn resolver_returning_the_owner_itself_is_rejected() {
    let manager = CallbackManager::multi_threaded(SelfIdResolver);
    let screen = Screen::new("leaky");
    let error = manager.manage(&screen).unwrap_err();
    assert!(matches!(error, TetherError::OwnerIdIsOwner { .. }));
    assert_eq!(error.class(), ErrorClass::Configuration);
}
