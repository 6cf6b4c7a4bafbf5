//! Concurrent use: a foreground task replacing owners while background
//! completion tasks reference and dereference, the way a real execution
//! engine drives this.

use std::sync::Arc;

use tether_core::CallbackManager;

use crate::common::{AppResolver, Document, ExportDone, SaveDone, Screen};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replacement_races_never_break_delivery() {
    let manager = CallbackManager::multi_threaded(AppResolver);
    let screen = Screen::new("generation-0");
    manager.manage(&screen).unwrap();

    let callback = SaveDone::new(&screen);
    let container = Arc::new(manager.wrap(&callback).unwrap());

    // Foreground: the screen is destroyed and rebuilt, repeatedly.
    let replacer = {
        let manager = manager.clone();
        let mut current = screen;
        tokio::spawn(async move {
            for _ in 0..100 {
                manager.unmanage(&current).unwrap();
                tokio::task::yield_now().await;
                current = Screen::new("rebuilt");
                manager.manage(&current).unwrap();
                tokio::task::yield_now().await;
            }
            current
        })
    };

    // Background: completion handlers keep trying to deliver.
    let mut workers = Vec::new();
    for _ in 0..3 {
        let container = Arc::clone(&container);
        let callback = Arc::clone(&callback);
        workers.push(tokio::spawn(async move {
            let mut delivered = 0_u32;
            let mut postponed = 0_u32;
            for _ in 0..200 {
                if container.reference(true).unwrap() {
                    // While this reference is held, the slot must stay
                    // populated no matter what the replacer does.
                    assert!(
                        callback.screen.get().is_some(),
                        "a successful reference guarantees a live owner"
                    );
                    container.dereference();
                    delivered += 1;
                } else {
                    postponed += 1;
                }
                tokio::task::yield_now().await;
            }
            (delivered, postponed)
        }));
    }

    let last_screen = replacer.await.unwrap();
    let mut total_delivered = 0;
    for worker in workers {
        let (delivered, _postponed) = worker.await.unwrap();
        total_delivered += delivered;
    }
    assert!(total_delivered > 0, "some deliveries must get through");

    // Every reference was balanced by a dereference: the slot is empty, and
    // a final delivery observes the last-managed instance.
    assert!(callback.screen.get().is_none());
    assert!(container.reference(true).unwrap());
    assert!(Arc::ptr_eq(&callback.screen.get().unwrap(), &last_screen));
    container.dereference();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registry_handles_concurrent_distinct_owners() {
    let manager = CallbackManager::multi_threaded(AppResolver);

    // Each task manages its own document route and wraps work against it;
    // routes must never bleed into each other.
    let mut tasks = Vec::new();
    for route in 0..8_u64 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let document = Document::new(route, "doc");
                manager.manage(&document).unwrap();

                let callback = ExportDone::new(&document);
                let container = manager.wrap(&callback).unwrap();
                assert!(container.reference(true).unwrap());
                assert_eq!(callback.document.get().unwrap().route, route);
                container.dereference();

                manager.unmanage(&document).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
}
