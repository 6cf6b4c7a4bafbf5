//! Unmanaged-capture policy, partial restoration, and thread affinity.

use std::sync::Arc;

use tether_core::{
    CallbackManager, CaptureSet, Captures, ErrorClass, Slot, TetherError, UnmanagedPolicy,
};

use crate::common::{AppResolver, Document, RefreshDone, SaveDone, Screen};

/// An owner type the fixture resolver does not recognize.
struct Widget {
    label: &'static str,
}

struct WidgetDone {
    widget: Arc<Slot<Widget>>,
}

impl WidgetDone {
    fn new(widget: &Arc<Widget>) -> Arc<Self> {
        Arc::new(Self {
            widget: Slot::capturing(widget),
        })
    }
}

impl Captures for WidgetDone {
    fn declare(&self, set: &mut CaptureSet) {
        set.capture(&self.widget);
    }
}

struct SaveBoth {
    screen: Arc<Slot<Screen>>,
    document: Arc<Slot<Document>>,
}

impl Captures for SaveBoth {
    fn declare(&self, set: &mut CaptureSet) {
        set.capture(&self.screen);
        set.capture(&self.document);
    }
}

#[test]
fn unmanaged_captures_are_tracked_weakly_when_allowed() {
    let manager = CallbackManager::multi_threaded(AppResolver);
    let widget = Arc::new(Widget { label: "gauge" });

    let callback = WidgetDone::new(&widget);
    let container = manager.wrap(&callback).unwrap();
    assert!(callback.widget.get().is_none(), "cleared like any capture");

    // Alive: restored through the ad-hoc handle.
    assert!(container.reference(true).unwrap());
    assert_eq!(callback.widget.get().unwrap().label, "gauge");
    container.dereference();

    // Gone: there is no logical id to re-bind through, so the capture is
    // permanently unavailable.
    drop(widget);
    assert!(!container.reference(true).unwrap());
}

#[test]
fn unmanaged_captures_can_be_forbidden() {
    let manager = CallbackManager::builder(AppResolver)
        .unmanaged_captures(UnmanagedPolicy::Deny)
        .build();
    let widget = Arc::new(Widget { label: "gauge" });

    let callback = WidgetDone::new(&widget);
    let error = manager.wrap(&callback).unwrap_err();
    assert!(matches!(error, TetherError::UnmanagedCaptureForbidden { .. }));
    assert_eq!(error.class(), ErrorClass::NotManaged);
    assert!(callback.widget.get().is_none(), "cleared even on refusal");
}

#[test]
fn deny_policy_still_permits_nested_callbacks() {
    let manager = CallbackManager::builder(AppResolver)
        .unmanaged_captures(UnmanagedPolicy::Deny)
        .build();
    let screen = Screen::new("home");
    manager.manage(&screen).unwrap();

    let parent = SaveDone::new(&screen);
    let _parent_container = manager.wrap(&parent).unwrap();

    // The child captures the parent callback, which has no owner id. That
    // capture is tracked through the descriptor arena, not the registry, so
    // the policy does not apply to it.
    let child = RefreshDone::nested_in(&parent);
    let child_container = manager.wrap(&child).unwrap();
    assert!(child_container.reference(true).unwrap());
    child_container.dereference();
}

#[test]
fn partial_restoration_installs_what_it_can() {
    let manager = CallbackManager::multi_threaded(AppResolver);
    let screen = Screen::new("home");
    let document = Document::new(5, "draft");
    manager.manage(&screen).unwrap();
    manager.manage(&document).unwrap();

    let callback = Arc::new(SaveBoth {
        screen: Slot::capturing(&screen),
        document: Slot::capturing(&document),
    });
    let container = manager.wrap(&callback).unwrap();

    manager.unmanage(&document).unwrap();

    // Opting out of rollback: the handler runs with whatever is live.
    assert!(container.reference(false).unwrap());
    assert!(callback.screen.get().is_some());
    assert!(callback.document.get().is_none());

    container.dereference();
    assert!(callback.screen.get().is_none());
}

#[test]
fn rollback_mode_refuses_a_partially_available_set() {
    let manager = CallbackManager::multi_threaded(AppResolver);
    let screen = Screen::new("home");
    let document = Document::new(5, "draft");
    manager.manage(&screen).unwrap();
    manager.manage(&document).unwrap();

    let callback = Arc::new(SaveBoth {
        screen: Slot::capturing(&screen),
        document: Slot::capturing(&document),
    });
    let container = manager.wrap(&callback).unwrap();

    manager.unmanage(&document).unwrap();

    assert!(!container.reference(true).unwrap());
    assert!(
        callback.screen.get().is_none(),
        "the screen was rolled back when the document came up absent"
    );
}

#[test]
fn single_threaded_manager_rejects_other_threads() {
    let manager = CallbackManager::single_threaded(AppResolver);
    let screen = Screen::new("home");
    manager.manage(&screen).unwrap();

    let callback = SaveDone::new(&screen);
    let container = Arc::new(manager.wrap(&callback).unwrap());

    let remote_manager = manager.clone();
    let remote_screen = Arc::clone(&screen);
    let remote_container = Arc::clone(&container);
    let (manage_result, reference_result) = std::thread::spawn(move || {
        (
            remote_manager.manage(&remote_screen),
            remote_container.reference(true),
        )
    })
    .join()
    .unwrap();

    assert!(matches!(manage_result, Err(TetherError::WrongThread { .. })));
    assert!(matches!(
        reference_result,
        Err(TetherError::WrongThread { .. })
    ));

    // The pinned thread is unaffected.
    assert!(container.reference(true).unwrap());
    container.dereference();
}
