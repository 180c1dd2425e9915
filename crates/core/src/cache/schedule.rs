//! Per-stop schedules, valid for a single service date.

use std::sync::Arc;

use chrono::NaiveDate;
use rider_transit::models::ScheduleResponse;
use serde::{Deserialize, Serialize};

use crate::cache::keyed::{FileKeyedCache, KeyedCache};
use crate::fs::JsonPersistence;

pub const CACHE_GROUP: &str = "schedules";
pub const KEY_PREFIX: &str = "stop";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleCacheEntry {
    pub response: ScheduleResponse,
    pub service_date: NaiveDate,
    pub stop_id: String,
}

#[derive(Clone)]
pub struct ScheduleCache {
    cache: Arc<dyn KeyedCache<ScheduleCacheEntry>>,
}

impl ScheduleCache {
    pub fn new(cache: Arc<dyn KeyedCache<ScheduleCacheEntry>>) -> Self {
        Self { cache }
    }

    pub fn on_disk(persistence: JsonPersistence) -> Self {
        Self::new(Arc::new(FileKeyedCache::new(CACHE_GROUP, KEY_PREFIX, persistence)))
    }

    pub async fn get_schedule(
        &self,
        stop_id: &str,
        service_date: NaiveDate,
    ) -> Option<ScheduleResponse> {
        let is_stale = move |entry: &ScheduleCacheEntry| entry.service_date != service_date;
        self.cache
            .get_entry(stop_id, &is_stale)
            .await
            .map(|entry| entry.response)
    }

    pub async fn put_schedule(
        &self,
        stop_id: &str,
        service_date: NaiveDate,
        response: ScheduleResponse,
    ) {
        let entry = ScheduleCacheEntry {
            response,
            service_date,
            stop_id: stop_id.to_string(),
        };
        self.cache.put_entry(stop_id, &entry).await;
    }

    /// Remove every entry that is not for `service_date`.
    pub async fn delete_stale_schedules(&self, service_date: NaiveDate) {
        let is_stale = move |entry: &ScheduleCacheEntry| entry.service_date != service_date;
        self.cache.delete_stale_entries(&is_stale).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keyed::MemoryKeyedCache;
    use crate::config::SystemPaths;
    use std::collections::HashMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_miss_when_not_cached() {
        let cache = ScheduleCache::new(Arc::new(MemoryKeyedCache::<ScheduleCacheEntry>::new()));
        assert_eq!(cache.get_schedule("stopId", day(14)).await, None);
    }

    #[tokio::test]
    async fn test_hit_only_for_matching_service_date() {
        let memory = Arc::new(MemoryKeyedCache::<ScheduleCacheEntry>::new());
        let cache = ScheduleCache::new(memory.clone());
        let response = ScheduleResponse::new(vec![], HashMap::new());

        cache.put_schedule("stopId", day(14), response.clone()).await;
        assert_eq!(cache.get_schedule("stopId", day(14)).await, Some(response));

        assert_eq!(cache.get_schedule("stopId", day(15)).await, None);
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_delete_stale_schedules_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let persistence =
            JsonPersistence::new(SystemPaths::new(dir.path(), dir.path().join("data")));
        let cache = ScheduleCache::on_disk(persistence);
        let response = ScheduleResponse::default();

        cache.put_schedule("a", day(13), response.clone()).await;
        cache.put_schedule("b", day(14), response.clone()).await;
        assert!(dir.path().join("schedules/stop-a.json").exists());

        cache.delete_stale_schedules(day(14)).await;
        assert!(!dir.path().join("schedules/stop-a.json").exists());
        assert_eq!(cache.get_schedule("b", day(14)).await, Some(response));
    }
}
