//! Reference data from `api/global`, revalidated with its ETag.

use std::sync::Arc;

use rider_transit::models::GlobalData;
use tokio::sync::watch;

use crate::cache::ResponseCache;
use crate::clock::Clock;
use crate::config::{ConfigError, DataLayerConfig};
use crate::error::ApiResult;
use crate::fs::JsonPersistence;
use crate::network::BackendClient;
use crate::state::LastKnownValue;

pub const GLOBAL_PATH: &str = "api/global";
pub const CACHE_KEY: &str = "global";

/// Observable reference data snapshot.
pub trait GlobalDataSource: Send + Sync {
    fn current(&self) -> Option<Arc<GlobalData>>;

    fn subscribe(&self) -> watch::Receiver<Option<Arc<GlobalData>>>;
}

impl GlobalDataSource for LastKnownValue<GlobalData> {
    fn current(&self) -> Option<Arc<GlobalData>> {
        self.get()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Arc<GlobalData>>> {
        LastKnownValue::subscribe(self)
    }
}

pub struct GlobalRepository {
    client: BackendClient,
    cache: ResponseCache<GlobalData>,
    state: LastKnownValue<GlobalData>,
}

impl GlobalRepository {
    pub fn new(client: BackendClient, cache: ResponseCache<GlobalData>) -> Self {
        let state = LastKnownValue::new();
        Self {
            client,
            cache: cache.with_state(state.clone()),
            state,
        }
    }

    /// Disk-backed repository publishing into `state`.
    pub fn from_config(
        config: &DataLayerConfig,
        persistence: JsonPersistence,
        clock: Arc<dyn Clock>,
        state: LastKnownValue<GlobalData>,
    ) -> Result<Self, ConfigError> {
        let cache = ResponseCache::new(CACHE_KEY, clock)
            .with_max_age(config.global_max_age())
            .with_invalidation_key(config.global_invalidation_key.clone())
            .with_persistence(persistence)
            .with_state(state.clone());
        Ok(Self {
            client: BackendClient::from_config(config)?,
            cache,
            state,
        })
    }

    pub async fn get_global_data(&self) -> ApiResult<Arc<GlobalData>> {
        let data = self
            .cache
            .get_or_fetch(|etag| async move {
                self.client.get(GLOBAL_PATH, &[], etag.as_deref()).await
            })
            .await?;
        Ok(data)
    }

    /// Latest reference data, including stale data restored from disk.
    pub fn state(&self) -> LastKnownValue<GlobalData> {
        self.state.clone()
    }
}
