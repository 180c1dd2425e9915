//! Per-key caches with caller-supplied staleness.
//!
//! The cache itself never decides when an entry expires: every read and sweep
//! takes an `is_stale` predicate, so the same entry type can be judged
//! against the current service date, app version, and so on.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Category;
use crate::fs::{Destination, JsonPersistence};

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type StalenessCheck<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

pub trait KeyedCache<T>: Send + Sync {
    /// The entry for `key`, unless it is missing, unreadable or stale.
    /// Stale entries are evicted.
    fn get_entry<'a>(
        &'a self,
        key: &'a str,
        is_stale: StalenessCheck<'a, T>,
    ) -> CacheFuture<'a, Option<T>>;

    /// Store `entry` under `key`. Failures are logged, never returned.
    fn put_entry<'a>(&'a self, key: &'a str, entry: &'a T) -> CacheFuture<'a, ()>;

    fn delete_stale_entries<'a>(&'a self, is_stale: StalenessCheck<'a, T>) -> CacheFuture<'a, ()>;
}

/// One JSON file per key at `<cache root>/<cache_group>/<key_prefix>-<key>.json`.
///
/// `cache_group` must be unique per cache instance: the stale sweep lists the
/// whole group directory.
#[derive(Debug)]
pub struct FileKeyedCache<T> {
    cache_group: String,
    key_prefix: String,
    persistence: JsonPersistence,
    _entry: PhantomData<fn() -> T>,
}

impl<T> FileKeyedCache<T> {
    pub fn new(
        cache_group: impl Into<String>,
        key_prefix: impl Into<String>,
        persistence: JsonPersistence,
    ) -> Self {
        Self {
            cache_group: cache_group.into(),
            key_prefix: key_prefix.into(),
            persistence,
            _entry: PhantomData,
        }
    }

    fn destination(&self, key: &str) -> Destination {
        Destination::new(
            Category::Cache,
            Some(&self.cache_group),
            format!("{}-{key}", self.key_prefix),
        )
    }
}

impl<T> KeyedCache<T> for FileKeyedCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn get_entry<'a>(
        &'a self,
        key: &'a str,
        is_stale: StalenessCheck<'a, T>,
    ) -> CacheFuture<'a, Option<T>> {
        Box::pin(async move {
            let destination = self.destination(key);
            let cached = match self.persistence.read::<T>(&destination).await {
                Ok(Some(cached)) => cached,
                Ok(None) => {
                    debug!(group = %self.cache_group, key, "keyed cache miss");
                    return None;
                }
                Err(error) => {
                    warn!(group = %self.cache_group, key, %error, "failed to read keyed cache data");
                    return None;
                }
            };

            if is_stale(&cached) {
                debug!(group = %self.cache_group, key, "evicting stale keyed cache entry");
                if let Err(error) = self.persistence.delete(&destination).await {
                    warn!(group = %self.cache_group, key, %error, "failed to delete stale entry");
                }
                return None;
            }
            Some(cached)
        })
    }

    fn put_entry<'a>(&'a self, key: &'a str, entry: &'a T) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            if let Err(error) = self.persistence.write(&self.destination(key), entry).await {
                warn!(group = %self.cache_group, key, %error, "failed to write keyed cache data");
            }
        })
    }

    fn delete_stale_entries<'a>(&'a self, is_stale: StalenessCheck<'a, T>) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let prefix = format!("{}-", self.key_prefix);
            match self
                .persistence
                .delete_stale(Category::Cache, Some(&self.cache_group), Some(&prefix), is_stale)
                .await
            {
                Ok(deleted) => debug!(group = %self.cache_group, deleted, "swept keyed cache"),
                Err(error) => {
                    warn!(group = %self.cache_group, %error, "failed to delete stale keyed cache data")
                }
            }
        })
    }
}

/// In-memory [`KeyedCache`], for hosts without a writable cache directory.
#[derive(Debug)]
pub struct MemoryKeyedCache<T> {
    entries: Mutex<HashMap<String, T>>,
}

impl<T> MemoryKeyedCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MemoryKeyedCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(String, T)> for MemoryKeyedCache<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self {
            entries: Mutex::new(iter.into_iter().collect()),
        }
    }
}

impl<T: Clone + Send + Sync> KeyedCache<T> for MemoryKeyedCache<T> {
    fn get_entry<'a>(
        &'a self,
        key: &'a str,
        is_stale: StalenessCheck<'a, T>,
    ) -> CacheFuture<'a, Option<T>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let stale = is_stale(entries.get(key)?);
            if stale {
                entries.remove(key);
                return None;
            }
            entries.get(key).cloned()
        })
    }

    fn put_entry<'a>(&'a self, key: &'a str, entry: &'a T) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.insert(key.to_string(), entry.clone());
        })
    }

    fn delete_stale_entries<'a>(&'a self, is_stale: StalenessCheck<'a, T>) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.retain(|_, entry| !is_stale(entry));
        })
    }
}
