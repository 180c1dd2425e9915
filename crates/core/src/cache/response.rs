//! Conditional-HTTP cache for a single backend resource.
//!
//! The payload is kept in memory and mirrored to disk as
//! `<cache root>/responseCache/<key>.json` plus `<key>-meta.json`. Once the
//! payload is older than `max_age` it is revalidated with the stored ETag.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Category;
use crate::error::FetchError;
use crate::fs::{Destination, JsonPersistence};
use crate::network::http::HttpResponse;
use crate::state::LastKnownValue;

pub const CACHE_SUBDIRECTORY: &str = "responseCache";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub etag: Option<String>,
    pub fetch_time: DateTime<Utc>,
    #[serde(default)]
    pub invalidation_key: Option<String>,
}

#[derive(Debug)]
struct CachedResponse<T> {
    metadata: ResponseMetadata,
    data: Arc<T>,
}

#[derive(Debug)]
pub struct ResponseCache<T> {
    cache_key: String,
    max_age: Duration,
    invalidation_key: Option<String>,
    persistence: Option<JsonPersistence>,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<CachedResponse<T>>>,
    state: LastKnownValue<T>,
}

impl<T> ResponseCache<T>
where
    T: DeserializeOwned + Send + Sync,
{
    pub fn new(cache_key: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache_key: cache_key.into(),
            max_age: Duration::hours(1),
            invalidation_key: None,
            persistence: None,
            clock,
            slot: Mutex::new(None),
            state: LastKnownValue::new(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Disk copies written under a different key are ignored and removed.
    pub fn with_invalidation_key(mut self, invalidation_key: Option<String>) -> Self {
        self.invalidation_key = invalidation_key;
        self
    }

    pub fn with_persistence(mut self, persistence: JsonPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Publish into an existing holder instead of a private one.
    pub fn with_state(mut self, state: LastKnownValue<T>) -> Self {
        self.state = state;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Latest payload, including stale data loaded from disk.
    pub fn state(&self) -> watch::Receiver<Option<Arc<T>>> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Option<Arc<T>> {
        self.state.get()
    }

    /// Return the cached payload while fresh, otherwise call `fetch` with
    /// the stored ETag and apply its response.
    ///
    /// Concurrent callers are serialized, so a cold cache hit by several
    /// callers at once performs a single fetch.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<T>, FetchError>
    where
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = Result<HttpResponse, FetchError>>,
    {
        let mut slot = self.slot.lock().await;

        if slot.is_none() {
            *slot = self.read_from_disk().await;
            if let Some(cached) = slot.as_ref() {
                self.state.set(cached.data.clone());
            }
        }

        if let Some(cached) = slot.as_ref() {
            if self.clock.now() - cached.metadata.fetch_time < self.max_age {
                debug!(key = %self.cache_key, "response cache hit");
                return Ok(cached.data.clone());
            }
        }

        let etag = slot.as_ref().and_then(|cached| cached.metadata.etag.clone());
        debug!(key = %self.cache_key, ?etag, "fetching");
        let response = fetch(etag).await?;

        match response.status {
            304 => {
                let Some(cached) = slot.as_mut() else {
                    return Err(FetchError::NotModifiedWithoutData);
                };
                cached.metadata.fetch_time = self.clock.now();
                debug!(key = %self.cache_key, "not modified");
                self.write_metadata(&cached.metadata).await;
                Ok(cached.data.clone())
            }
            200 => {
                let data = Arc::new(serde_json::from_str::<T>(&response.body)?);
                let metadata = ResponseMetadata {
                    etag: response.etag,
                    fetch_time: self.clock.now(),
                    invalidation_key: self.invalidation_key.clone(),
                };
                info!(key = %self.cache_key, "updated cached response");
                self.write_data(&metadata, &response.body).await;
                *slot = Some(CachedResponse {
                    metadata,
                    data: data.clone(),
                });
                self.state.set(data.clone());
                Ok(data)
            }
            code => Err(FetchError::Status {
                code,
                body: response.body,
            }),
        }
    }

    fn data_destination(&self) -> Destination {
        Destination::new(Category::Cache, Some(CACHE_SUBDIRECTORY), self.cache_key.clone())
    }

    fn metadata_destination(&self) -> Destination {
        Destination::new(
            Category::Cache,
            Some(CACHE_SUBDIRECTORY),
            format!("{}-meta", self.cache_key),
        )
    }

    async fn read_from_disk(&self) -> Option<CachedResponse<T>> {
        let persistence = self.persistence.as_ref()?;

        let metadata = match persistence
            .read::<ResponseMetadata>(&self.metadata_destination())
            .await
        {
            Ok(metadata) => metadata?,
            Err(error) => {
                warn!(key = %self.cache_key, %error, "failed to read cached metadata");
                return None;
            }
        };

        if metadata.invalidation_key != self.invalidation_key {
            info!(key = %self.cache_key, "discarding cached response from an older format");
            for destination in [self.data_destination(), self.metadata_destination()] {
                if let Err(error) = persistence.delete(&destination).await {
                    warn!(key = %self.cache_key, %error, "failed to delete invalidated response");
                }
            }
            return None;
        }

        match persistence.read::<T>(&self.data_destination()).await {
            Ok(data) => data.map(|data| CachedResponse {
                metadata,
                data: Arc::new(data),
            }),
            Err(error) => {
                warn!(key = %self.cache_key, %error, "failed to read cached response");
                None
            }
        }
    }

    async fn write_data(&self, metadata: &ResponseMetadata, body: &str) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(error) = persistence.write_raw(&self.data_destination(), body).await {
            warn!(key = %self.cache_key, %error, "failed to write cached response");
            return;
        }
        self.write_metadata(metadata).await;
    }

    async fn write_metadata(&self, metadata: &ResponseMetadata) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(error) = persistence.write(&self.metadata_destination(), metadata).await {
            warn!(key = %self.cache_key, %error, "failed to write cached metadata");
        }
    }
}
