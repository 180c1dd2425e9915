//! Live alerts joined with reference data.
//!
//! Alerts name facilities only by id; riders need the facility names. Each
//! alerts result is enriched with the current global data before it is
//! forwarded, and when the global data changes the last alerts result is
//! enriched again and re-emitted.

use std::sync::{Arc, Mutex, MutexGuard};

use rider_transit::models::{AlertsStreamData, GlobalData};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ApiResult;
use crate::repositories::{AlertsSource, GlobalDataSource, ReceiveCallback};

/// A result and the global data it is enriched with, in emission order.
type Delivery = (ApiResult<AlertsStreamData>, Option<Arc<GlobalData>>);

#[derive(Default)]
struct Shared {
    /// Bumped on connect and disconnect; callbacks from an older connection
    /// compare against it and stay silent.
    generation: u64,
    latest: Option<AlertsStreamData>,
    /// Global data observer and delivery task of the current connection.
    tasks: Vec<JoinHandle<()>>,
}

impl Shared {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

pub struct AlertsUsecase {
    alerts: Arc<dyn AlertsSource>,
    global: Arc<dyn GlobalDataSource>,
    runtime: Handle,
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

fn enrich(data: &AlertsStreamData, global: Option<&GlobalData>) -> AlertsStreamData {
    match global {
        Some(global) => data.inject_facilities(global),
        None => data.clone(),
    }
}

impl AlertsUsecase {
    pub fn new(
        alerts: Arc<dyn AlertsSource>,
        global: Arc<dyn GlobalDataSource>,
        runtime: Handle,
    ) -> Self {
        Self {
            alerts,
            global,
            runtime,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Start forwarding enriched alerts to `on_receive`, replacing any
    /// previous connection.
    ///
    /// Both alerts results and global data changes are queued while the
    /// state lock is held and handed to `on_receive` by a single task, so the
    /// last emission always reflects the newest alerts and global data.
    pub fn connect(&self, on_receive: ReceiveCallback<AlertsStreamData>) {
        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.latest = None;
            shared.abort_tasks();
            shared.generation
        };

        let (deliveries, mut pending) = mpsc::unbounded_channel::<Delivery>();
        let delivery = {
            let shared = self.shared.clone();
            self.runtime.spawn(async move {
                while let Some((result, global)) = pending.recv().await {
                    if lock(&shared).generation != generation {
                        return;
                    }
                    on_receive(result.map(|data| enrich(&data, global.as_deref())));
                }
            })
        };

        let mut updates = self.global.subscribe();
        let observer = {
            let shared = self.shared.clone();
            let deliveries = deliveries.clone();
            self.runtime.spawn(async move {
                while updates.changed().await.is_ok() {
                    let guard = lock(&shared);
                    if guard.generation != generation {
                        return;
                    }
                    let global = updates.borrow_and_update().clone();
                    if let Some(latest) = &guard.latest {
                        debug!("global data changed, re-emitting alerts");
                        let _ = deliveries.send((Ok(latest.clone()), global));
                    }
                }
            })
        };
        {
            let mut shared = lock(&self.shared);
            if shared.generation == generation {
                shared.tasks = vec![observer, delivery];
            } else {
                observer.abort();
                delivery.abort();
            }
        }

        let shared = self.shared.clone();
        let global = self.global.clone();
        self.alerts.connect(Arc::new(move |result| {
            let mut shared = lock(&shared);
            if shared.generation != generation {
                return;
            }
            if let Ok(data) = &result {
                shared.latest = Some(data.clone());
            }
            let _ = deliveries.send((result, global.current()));
        }));
    }

    /// Stop forwarding. Safe to call repeatedly or without `connect`.
    pub fn disconnect(&self) {
        {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.latest = None;
            shared.abort_tasks();
        }
        self.alerts.disconnect();
    }
}

impl Drop for AlertsUsecase {
    fn drop(&mut self) {
        lock(&self.shared).abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ApiResult, SocketError};
    use crate::state::LastKnownValue;
    use rider_transit::models::{Facility, FacilityType};
    use rider_transit::identifiers::FacilityIdentifier;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeAlerts {
        callback: Mutex<Option<ReceiveCallback<AlertsStreamData>>>,
        disconnects: AtomicUsize,
    }

    impl FakeAlerts {
        fn emit(&self, result: ApiResult<AlertsStreamData>) {
            let callback = self.callback.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback(result);
            }
        }
    }

    impl AlertsSource for FakeAlerts {
        fn connect(&self, on_receive: ReceiveCallback<AlertsStreamData>) {
            *self.callback.lock().unwrap() = Some(on_receive);
        }

        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn alerts() -> AlertsStreamData {
        serde_json::from_value(json!({"alerts": {"a1": {
            "id": "a1",
            "effect": "elevator_closure",
            "informed_entity": [{"activities": ["using_wheelchair"], "facility": "elev-1"}],
            "updated_at": "2024-03-14T10:00:00-04:00"
        }}}))
        .unwrap()
    }

    fn alerts_with_header(header: &str) -> AlertsStreamData {
        let mut data = alerts();
        for alert in data.alerts.values_mut() {
            alert.header = Some(header.to_string());
        }
        data
    }

    fn global(short_name: &str) -> GlobalData {
        GlobalData::new(
            vec![Facility {
                id: FacilityIdentifier::new("elev-1"),
                long_name: None,
                short_name: Some(short_name.to_string()),
                facility_type: FacilityType::Elevator,
            }],
            vec![],
            vec![],
        )
    }

    fn facility_name(result: &ApiResult<AlertsStreamData>) -> Option<String> {
        let data = result.as_ref().ok()?;
        let facilities = data.get_alert("a1")?.facilities.as_ref()?;
        facilities.get("elev-1")?.short_name.clone()
    }

    struct Fixture {
        source: Arc<FakeAlerts>,
        state: LastKnownValue<GlobalData>,
        usecase: AlertsUsecase,
        results: mpsc::UnboundedReceiver<ApiResult<AlertsStreamData>>,
    }

    fn connected() -> Fixture {
        let source = Arc::new(FakeAlerts::default());
        let state = LastKnownValue::new();
        let usecase = AlertsUsecase::new(source.clone(), Arc::new(state.clone()), Handle::current());
        let (sender, results) = mpsc::unbounded_channel();
        usecase.connect(Arc::new(move |result| {
            let _ = sender.send(result);
        }));
        Fixture {
            source,
            state,
            usecase,
            results,
        }
    }

    #[tokio::test]
    async fn test_alerts_are_enriched_with_current_global_data() {
        let mut fixture = connected();
        fixture.state.set(global("Lechmere"));

        fixture.source.emit(Ok(alerts()));
        let result = fixture.results.recv().await.unwrap();
        assert_eq!(facility_name(&result).as_deref(), Some("Lechmere"));
    }

    #[tokio::test]
    async fn test_alerts_pass_through_without_global_data() {
        let mut fixture = connected();

        fixture.source.emit(Ok(alerts()));
        let result = fixture.results.recv().await.unwrap();
        assert_eq!(result, Ok(alerts()));
        assert!(result.unwrap().get_alert("a1").unwrap().facilities.is_none());
    }

    #[tokio::test]
    async fn test_global_update_re_emits_last_alerts() {
        let mut fixture = connected();
        fixture.state.set(global("Lechmere"));
        fixture.source.emit(Ok(alerts()));
        fixture.results.recv().await.unwrap();

        fixture.state.set(global("Lechmere Elevator 1"));
        let result = fixture.results.recv().await.unwrap();
        assert_eq!(facility_name(&result).as_deref(), Some("Lechmere Elevator 1"));
    }

    #[tokio::test]
    async fn test_errors_pass_through_and_keep_last_success() {
        let mut fixture = connected();
        fixture.source.emit(Ok(alerts()));
        fixture.results.recv().await.unwrap();

        let failure: ApiResult<AlertsStreamData> = Err(SocketError::Failure.into());
        fixture.source.emit(failure.clone());
        assert_eq!(fixture.results.recv().await.unwrap(), failure);

        fixture.state.set(global("Lechmere"));
        let result = fixture.results.recv().await.unwrap();
        assert_eq!(facility_name(&result).as_deref(), Some("Lechmere"));
    }

    #[tokio::test]
    async fn test_global_update_before_any_alerts_emits_nothing() {
        let mut fixture = connected();
        fixture.state.set(global("Lechmere"));
        tokio::task::yield_now().await;
        assert!(fixture.results.try_recv().is_err());

        let error = Err(ApiError::Fetch {
            code: Some(500),
            message: "down".to_string(),
        });
        fixture.source.emit(error.clone());
        assert_eq!(fixture.results.recv().await.unwrap(), error);
    }

    #[tokio::test]
    async fn test_disconnect_silences_everything() {
        let mut fixture = connected();
        fixture.source.emit(Ok(alerts()));
        fixture.results.recv().await.unwrap();

        fixture.usecase.disconnect();
        fixture.usecase.disconnect();
        assert_eq!(fixture.source.disconnects.load(Ordering::SeqCst), 2);

        fixture.source.emit(Ok(alerts()));
        fixture.state.set(global("Lechmere"));
        tokio::task::yield_now().await;
        assert!(fixture.results.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interleaved_updates_end_on_newest_alerts_and_global_data() {
        let mut fixture = connected();
        fixture.state.set(global("G0"));

        let source = fixture.source.clone();
        let pushes = tokio::task::spawn_blocking(move || {
            for i in 0..200 {
                source.emit(Ok(alerts_with_header(&format!("L{i}"))));
            }
        });
        let state = fixture.state.clone();
        let updates = tokio::task::spawn_blocking(move || {
            for i in 0..200 {
                state.set(global(&format!("G{i}")));
            }
        });
        pushes.await.unwrap();
        updates.await.unwrap();

        let mut last = None;
        while let Ok(Some(result)) =
            tokio::time::timeout(Duration::from_millis(250), fixture.results.recv()).await
        {
            last = Some(result);
        }
        let last = last.unwrap();
        assert_eq!(facility_name(&last).as_deref(), Some("G199"));
        let header = last.unwrap().get_alert("a1").unwrap().header.clone();
        assert_eq!(header.as_deref(), Some("L199"));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let source = Arc::new(FakeAlerts::default());
        let usecase = AlertsUsecase::new(
            source.clone(),
            Arc::new(LastKnownValue::<GlobalData>::new()),
            Handle::current(),
        );
        usecase.disconnect();
        assert_eq!(source.disconnects.load(Ordering::SeqCst), 1);
    }
}
