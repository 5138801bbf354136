use super::{Completion, TaskGroup, logging};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::Level;

#[test]
fn logging_levels_parse() {
    assert_eq!(logging::parse_level("WARNING"), Some(Level::WARN));
    assert_eq!(logging::parse_level(" debug "), Some(Level::DEBUG));
    assert_eq!(logging::parse_level("trace"), Some(Level::TRACE));
    assert_eq!(logging::parse_level("loud"), None);

    // repeated and unknown levels never panic
    logging::init("info");
    logging::init("loud");
}

#[tokio::test]
async fn stop_waits_for_every_task() {
    let tasks = TaskGroup::new();
    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let stopped = tasks.stopped();
        let finished = finished.clone();
        assert!(tasks.spawn(async move {
            stopped.await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            finished.fetch_add(1, Ordering::SeqCst);
        }));
    }

    tasks.stop().await;
    assert_eq!(finished.load(Ordering::SeqCst), 4);
    assert!(tasks.is_stopped());
}

#[tokio::test]
async fn spawn_after_stop_is_refused() {
    let tasks = TaskGroup::new();
    tasks.stop().await;
    assert!(!tasks.spawn(async {}));
}

#[tokio::test]
async fn completion_is_fulfilled_once() {
    let completion = Arc::new(Completion::<u32>::new());
    assert!(!completion.is_complete());

    let waiter = {
        let completion = completion.clone();
        tokio::spawn(async move { completion.wait().await })
    };

    assert!(completion.complete(7));
    assert!(!completion.complete(8));
    assert_eq!(waiter.await.unwrap(), Some(7));
    assert_eq!(completion.wait().await, Some(7));
}
