//! Task group
//!
//! Every background task of a component (accept loops, dispatch loops,
//! connection watchers, resolution attempts, timers) is spawned through a
//! `TaskGroup`. The group carries one stop signal observed by all of its
//! tasks and a barrier: `stop` returns only after every spawned task has
//! finished.
//!
//! The barrier is an mpsc channel that never carries a value. Each task
//! holds a clone of the sender; once the group drops its own sender the
//! receiver yields `None` as soon as the last task exits.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};

#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<Inner>,
}

struct Inner {
    stop: watch::Sender<bool>,
    done_tx: Mutex<Option<mpsc::Sender<()>>>,
    done_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                stop,
                done_tx: Mutex::new(Some(done_tx)),
                done_rx: tokio::sync::Mutex::new(done_rx),
            }),
        }
    }

    /// Spawn a task tied to this group. Returns `false` without running the
    /// future once the group has been stopped.
    pub fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = match self
            .inner
            .done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(tx) => tx.clone(),
            None => return false,
        };
        tokio::spawn(async move {
            future.await;
            drop(guard);
        });
        true
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Resolves once `stop` has been called on this group.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.stop.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    /// Signal every task to stop and wait until all of them have exited.
    pub async fn stop(&self) {
        self.inner.stop.send_replace(true);
        self.inner
            .done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut done_rx = self.inner.done_rx.lock().await;
        while done_rx.recv().await.is_some() {}
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}
