//! Scheduled stop times, fetched per set of stops and cached per stop.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use rider_transit::models::{ScheduleResponse, service_date};
use tracing::debug;

use crate::cache::ScheduleCache;
use crate::error::ApiResult;
use crate::network::BackendClient;

pub const SCHEDULES_PATH: &str = "api/schedules";

pub type SchedulesFuture<'a> = Pin<Box<dyn Future<Output = ApiResult<ScheduleResponse>> + Send + 'a>>;

pub trait SchedulesSource: Send + Sync {
    /// Schedules for `stop_ids` on the service day containing `now`.
    ///
    /// `now` should carry the agency's UTC offset; the service date is
    /// computed in that offset.
    fn get_schedule<'a>(
        &'a self,
        stop_ids: &'a [String],
        now: DateTime<FixedOffset>,
    ) -> SchedulesFuture<'a>;
}

pub struct SchedulesRepository {
    client: BackendClient,
}

impl SchedulesRepository {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

impl SchedulesSource for SchedulesRepository {
    fn get_schedule<'a>(
        &'a self,
        stop_ids: &'a [String],
        now: DateTime<FixedOffset>,
    ) -> SchedulesFuture<'a> {
        Box::pin(async move {
            let stop_ids = stop_ids.join(",");
            let date_time = now.to_rfc3339_opts(SecondsFormat::Secs, false);
            let response = self
                .client
                .get_json(
                    SCHEDULES_PATH,
                    &[("stop_ids", stop_ids.as_str()), ("date_time", date_time.as_str())],
                )
                .await?;
            Ok(response)
        })
    }
}

/// Serves each stop from the [`ScheduleCache`] when it has that stop for
/// the current service date, and asks `upstream` only for the rest.
pub struct CachedSchedulesRepository<S> {
    upstream: S,
    cache: ScheduleCache,
}

impl<S: SchedulesSource> CachedSchedulesRepository<S> {
    pub fn new(upstream: S, cache: ScheduleCache) -> Self {
        Self { upstream, cache }
    }
}

impl<S: SchedulesSource> SchedulesSource for CachedSchedulesRepository<S> {
    fn get_schedule<'a>(
        &'a self,
        stop_ids: &'a [String],
        now: DateTime<FixedOffset>,
    ) -> SchedulesFuture<'a> {
        Box::pin(async move {
            let date = service_date(&now);
            let mut cached = Vec::new();
            let mut missing = Vec::new();
            for stop_id in stop_ids {
                match self.cache.get_schedule(stop_id, date).await {
                    Some(response) => cached.push(response),
                    None => missing.push(stop_id.clone()),
                }
            }
            debug!(cached = cached.len(), missing = missing.len(), %date, "schedule lookup");

            if !missing.is_empty() {
                let response = self.upstream.get_schedule(&missing, now).await?;
                for stop_id in &missing {
                    self.cache
                        .put_schedule(stop_id, date, response.for_stop(stop_id))
                        .await;
                }
                cached.push(response);
            }

            Ok(ScheduleResponse::merge(cached))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryKeyedCache, ScheduleCacheEntry};
    use crate::error::ApiError;
    use mockito::Matcher;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use url::Url;

    const RESPONSE: &str = r#"{
        "schedules": [
            {"id": "s1", "departure_time": "2024-03-14T10:05:00-04:00", "stop_sequence": 1,
             "route_id": "Red", "stop_id": "70061", "trip_id": "t1"},
            {"id": "s2", "departure_time": "2024-03-14T10:01:00-04:00", "stop_sequence": 2,
             "route_id": "Red", "stop_id": "70063", "trip_id": "t2"}
        ],
        "trips": {
            "t1": {"id": "t1", "direction_id": 0, "headsign": "Ashmont", "route_id": "Red"},
            "t2": {"id": "t2", "direction_id": 0, "headsign": "Braintree", "route_id": "Red"}
        }
    }"#;

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-03-14T09:30:00-04:00").unwrap()
    }

    /// Records which stops were requested and answers from a fixed response.
    struct Recording {
        response: ScheduleResponse,
        requests: Mutex<Vec<Vec<String>>>,
    }

    impl SchedulesSource for Arc<Recording> {
        fn get_schedule<'a>(
            &'a self,
            stop_ids: &'a [String],
            _now: DateTime<FixedOffset>,
        ) -> SchedulesFuture<'a> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(stop_ids.to_vec());
                Ok(self.response.clone())
            })
        }
    }

    fn stops(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_http_request_shape() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/schedules")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("stop_ids".into(), "70061,70063".into()),
                Matcher::UrlEncoded("date_time".into(), "2024-03-14T09:30:00-04:00".into()),
            ]))
            .with_status(200)
            .with_body(RESPONSE)
            .create_async()
            .await;

        let client = BackendClient::new(Url::parse(&server.url()).unwrap(), Duration::from_secs(4));
        let repository = SchedulesRepository::new(client);
        let response = repository
            .get_schedule(&stops(&["70061", "70063"]), now())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.schedules.len(), 2);
    }

    #[tokio::test]
    async fn test_http_failure_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/schedules")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = BackendClient::new(Url::parse(&server.url()).unwrap(), Duration::from_secs(4));
        let result = SchedulesRepository::new(client)
            .get_schedule(&stops(&["70061"]), now())
            .await;
        assert!(matches!(result, Err(ApiError::Fetch { code: Some(500), .. })));
    }

    #[tokio::test]
    async fn test_cached_stops_are_not_refetched() {
        let upstream = Arc::new(Recording {
            response: serde_json::from_str(RESPONSE).unwrap(),
            requests: Mutex::new(Vec::new()),
        });
        let cache = ScheduleCache::new(Arc::new(MemoryKeyedCache::<ScheduleCacheEntry>::new()));
        let repository = CachedSchedulesRepository::new(upstream.clone(), cache.clone());

        let first = repository
            .get_schedule(&stops(&["70061", "70063"]), now())
            .await
            .unwrap();
        let ids: Vec<_> = first.schedules.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);

        // each stop got only its own schedules and trips
        let date = service_date(&now());
        let cached = cache.get_schedule("70061", date).await.unwrap();
        assert_eq!(cached.schedules.len(), 1);
        assert_eq!(cached.trips.len(), 1);
        assert!(cached.trips.contains_key("t1"));

        let second = repository
            .get_schedule(&stops(&["70061", "70063"]), now())
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(upstream.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_missing_stops_are_requested() {
        let upstream = Arc::new(Recording {
            response: serde_json::from_str(RESPONSE).unwrap(),
            requests: Mutex::new(Vec::new()),
        });
        let cache = ScheduleCache::new(Arc::new(MemoryKeyedCache::<ScheduleCacheEntry>::new()));
        let date = service_date(&now());
        cache
            .put_schedule("70061", date, ScheduleResponse::default())
            .await;

        let repository = CachedSchedulesRepository::new(upstream.clone(), cache);
        repository
            .get_schedule(&stops(&["70061", "70063"]), now())
            .await
            .unwrap();

        assert_eq!(*upstream.requests.lock().unwrap(), vec![stops(&["70063"])]);
    }

    #[tokio::test]
    async fn test_new_service_day_refetches() {
        let upstream = Arc::new(Recording {
            response: serde_json::from_str(RESPONSE).unwrap(),
            requests: Mutex::new(Vec::new()),
        });
        let cache = ScheduleCache::new(Arc::new(MemoryKeyedCache::<ScheduleCacheEntry>::new()));
        let repository = CachedSchedulesRepository::new(upstream.clone(), cache);

        repository.get_schedule(&stops(&["70061"]), now()).await.unwrap();
        // 2:59 the next morning is still the same service day
        let late = DateTime::parse_from_rfc3339("2024-03-15T02:59:00-04:00").unwrap();
        repository.get_schedule(&stops(&["70061"]), late).await.unwrap();
        assert_eq!(upstream.requests.lock().unwrap().len(), 1);

        let next_day = DateTime::parse_from_rfc3339("2024-03-15T03:00:00-04:00").unwrap();
        repository.get_schedule(&stops(&["70061"]), next_day).await.unwrap();
        assert_eq!(upstream.requests.lock().unwrap().len(), 2);
    }
}
