//! In-memory time-to-live cache for data that is cheap to refetch.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::clock::Clock;
use crate::state::LastKnownValue;

#[derive(Debug)]
pub struct MemoryCache<T> {
    name: &'static str,
    max_age: Duration,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<(Arc<T>, DateTime<Utc>)>>,
    state: LastKnownValue<T>,
}

/// Cache for the reference data payload.
pub type GlobalCache<T> = MemoryCache<T>;

impl<T> MemoryCache<T> {
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            max_age: Duration::hours(1),
            clock,
            slot: Mutex::new(None),
            state: LastKnownValue::new(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_state(mut self, state: LastKnownValue<T>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> watch::Receiver<Option<Arc<T>>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Option<Arc<T>> {
        self.state.get()
    }

    /// Cached value if younger than `max_age`, otherwise the result of
    /// `fetch`. Errors are returned as-is and leave the cache untouched.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((data, fetched_at)) = slot.as_ref() {
            if self.clock.now() - *fetched_at < self.max_age {
                debug!(cache = self.name, "memory cache hit");
                return Ok(data.clone());
            }
        }

        debug!(cache = self.name, "memory cache miss");
        let data = Arc::new(fetch().await?);
        *slot = Some((data.clone(), self.clock.now()));
        self.state.set(data.clone());
        Ok(data)
    }

    pub async fn reset(&self) {
        *self.slot.lock().await = None;
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let clock = clock();
        let cache = MemoryCache::<u32>::new("test", clock.clone());
        let fetches = AtomicUsize::new(0);
        let counter = &fetches;
        let fetch = move || async move { Ok::<_, ()>(counter.fetch_add(1, Ordering::SeqCst) as u32) };

        assert_eq!(*cache.get_or_fetch(fetch).await.unwrap(), 0);
        assert_eq!(*cache.get_or_fetch(fetch).await.unwrap(), 0);

        clock.advance(Duration::minutes(60));
        assert_eq!(*cache.get_or_fetch(fetch).await.unwrap(), 1);
        assert_eq!(cache.current().as_deref(), Some(&1));
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = MemoryCache::<u32>::new("test", clock());

        let result = cache.get_or_fetch(|| async { Err::<u32, _>("offline") }).await;
        assert_eq!(result, Err("offline"));
        assert!(cache.current().is_none());

        let value = cache.get_or_fetch(|| async { Ok::<_, &str>(5) }).await.unwrap();
        assert_eq!(*value, 5);
    }

    #[tokio::test]
    async fn test_concurrent_cold_callers_share_one_fetch() {
        let cache = Arc::new(MemoryCache::<u32>::new("test", clock()));
        let fetches = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                let fetches = fetches.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(|| async move {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok::<_, ()>(9)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(*task.await.unwrap().unwrap(), 9);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_value() {
        let cache = MemoryCache::<u32>::new("test", clock());
        cache.get_or_fetch(|| async { Ok::<_, ()>(1) }).await.unwrap();

        cache.reset().await;
        assert!(cache.current().is_none());
        let value = cache.get_or_fetch(|| async { Ok::<_, ()>(2) }).await.unwrap();
        assert_eq!(*value, 2);
    }
}
