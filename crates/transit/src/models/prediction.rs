//! Realtime predictions streamed over the predictions channel.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::identifiers::*;
use crate::models::schedule::Trip;
use crate::models::types::DirectionId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    #[serde(default)]
    pub arrival_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub departure_time: Option<DateTime<FixedOffset>>,
    pub direction_id: DirectionId,
    #[serde(default)]
    pub revenue: bool,
    #[serde(default)]
    pub status: Option<String>,
    pub stop_sequence: u32,
    pub route_id: RouteIdentifier,
    pub stop_id: StopIdentifier,
    pub trip_id: TripIdentifier,
    #[serde(default)]
    pub vehicle_id: Option<String>,
}

impl Prediction {
    pub fn stop_time(&self) -> Option<DateTime<FixedOffset>> {
        self.departure_time.or(self.arrival_time)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub current_status: Option<String>,
    #[serde(default)]
    pub stop_id: Option<StopIdentifier>,
    #[serde(default)]
    pub trip_id: Option<TripIdentifier>,
    pub updated_at: DateTime<FixedOffset>,
}

/// Payload of a predictions join reply and of every `stream_data` push.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionsStreamData {
    #[serde(default)]
    pub predictions: HashMap<String, Prediction>,
    #[serde(default)]
    pub trips: HashMap<TripIdentifier, Trip>,
    #[serde(default)]
    pub vehicles: HashMap<String, Vehicle>,
}

impl PredictionsStreamData {
    pub fn prediction_count(&self) -> usize {
        self.predictions.len()
    }

    /// Predictions at one stop, soonest first.
    pub fn for_stop(&self, stop_id: &str) -> Vec<&Prediction> {
        let mut predictions: Vec<_> = self
            .predictions
            .values()
            .filter(|p| p.stop_id.as_str() == stop_id)
            .collect();
        predictions.sort_by_key(|p| p.stop_time());
        predictions
    }
}
