use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rider_transit::models::PredictionsStreamData;
use serde_json::json;
use tracing::debug;

use crate::clock::Clock;
use crate::network::Socket;
use crate::repositories::channel::{ChannelSubscription, ReceiveCallback};

pub const PREDICTIONS_TOPIC: &str = "predictions:stops";
pub const STREAM_DATA_EVENT: &str = "stream_data";

/// Predictions older than this are not shown.
pub const FORGET_AFTER_MINUTES: i64 = 10;

/// Live predictions for a set of stops.
pub struct PredictionsRepository {
    subscription: ChannelSubscription<PredictionsStreamData>,
    clock: Arc<dyn Clock>,
    last_updated: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl PredictionsRepository {
    pub fn new(socket: Arc<dyn Socket>, clock: Arc<dyn Clock>) -> Self {
        Self {
            subscription: ChannelSubscription::new(socket, STREAM_DATA_EVENT),
            clock,
            last_updated: Arc::new(Mutex::new(None)),
        }
    }

    pub fn connect(&self, stop_ids: &[String], on_receive: ReceiveCallback<PredictionsStreamData>) {
        let clock = self.clock.clone();
        let last_updated = self.last_updated.clone();
        let on_receive: ReceiveCallback<PredictionsStreamData> = Arc::new(move |result| {
            if let Ok(data) = &result {
                debug!(count = data.prediction_count(), "received predictions");
                *last_updated.lock().unwrap_or_else(|e| e.into_inner()) = Some(clock.now());
            }
            on_receive(result);
        });

        self.subscription.connect(
            PREDICTIONS_TOPIC,
            json!({ "stop_ids": stop_ids }),
            on_receive,
        );
    }

    pub fn disconnect(&self) {
        self.subscription.disconnect();
    }

    /// When predictions last arrived, if ever.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the `prediction_count` predictions on screen are too old to
    /// keep showing. Never true before the first update.
    pub fn should_forget_predictions(&self, prediction_count: usize) -> bool {
        let Some(last_updated) = self.last_updated() else {
            return false;
        };
        self.clock.now() - last_updated > Duration::minutes(FORGET_AFTER_MINUTES)
            && prediction_count > 0
    }
}
