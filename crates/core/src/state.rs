//! Injectable holder for the last value a flow produced.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Latest value of some shared state, observable through `watch` receivers.
///
/// Clones share the same slot. `reset` clears it, e.g. when app data is
/// wiped, and wakes every subscriber.
pub struct LastKnownValue<T> {
    sender: Arc<watch::Sender<Option<Arc<T>>>>,
}

impl<T> LastKnownValue<T> {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.sender.borrow().clone()
    }

    pub fn set(&self, value: impl Into<Arc<T>>) {
        self.sender.send_replace(Some(value.into()));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<T>>> {
        self.sender.subscribe()
    }

    pub fn reset(&self) {
        self.sender.send_replace(None);
    }
}

impl<T> Default for LastKnownValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for LastKnownValue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LastKnownValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LastKnownValue").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_notifies_subscribers() {
        let value = LastKnownValue::<u32>::new();
        let mut receiver = value.subscribe();
        assert_eq!(value.get(), None);

        value.clone().set(7);
        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow_and_update().as_deref(), Some(&7));

        value.reset();
        receiver.changed().await.unwrap();
        assert!(receiver.borrow().is_none());
    }
}
