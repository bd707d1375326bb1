//! Single-resolution result slots.
//!
//! A [`Completion`] is resolved at most once. Any number of
//! [`CompletionHandle`]s can wait on it, including handles taken after the
//! value was set.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Completion<T> {
    tx: watch::Sender<Option<T>>,
}

#[derive(Debug, Clone)]
pub struct CompletionHandle<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Set the value. Returns `false` if it was already resolved, in which
    /// case the first value is kept.
    pub fn resolve(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = value.take();
                true
            }
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn handle(&self) -> CompletionHandle<T> {
        CompletionHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone> CompletionHandle<T> {
    /// Wait for the value. `None` means the producer went away unresolved.
    pub async fn wait(mut self) -> Option<T> {
        self.rx
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone())
            .ok()
            .flatten()
    }

    /// The value if already resolved.
    pub fn try_get(&self) -> Option<T> {
        self.rx.borrow().clone()
    }
}
