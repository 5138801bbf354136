//! Single-shot completion
//!
//! A value that starts pending and is fulfilled at most once. Any number of
//! waiters may join before or after fulfilment; all of them observe the same
//! value. Used for in-flight resolution attempts and connection attempts
//! that concurrent callers share.

use tokio::sync::watch;

pub struct Completion<T> {
    value: watch::Sender<Option<T>>,
}

impl<T: Clone + Send + Sync> Completion<T> {
    pub fn new() -> Self {
        let (value, _) = watch::channel(None);
        Self { value }
    }

    /// Fulfil the completion. Only the first call has an effect; returns
    /// whether this call was it.
    pub fn complete(&self, value: T) -> bool {
        let mut value = Some(value);
        self.value.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub fn is_complete(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Wait for the value. Never returns `None` while `self` is alive.
    pub async fn wait(&self) -> Option<T> {
        let mut rx = self.value.subscribe();
        let result = rx.wait_for(|slot| slot.is_some()).await;
        result.ok().and_then(|slot| slot.clone())
    }
}

impl<T: Clone + Send + Sync> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}
