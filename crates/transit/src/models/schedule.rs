//! Scheduled stop times, as returned by `api/schedules`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::identifiers::*;
use crate::models::types::DirectionId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopEdgeType {
    #[default]
    Regular,
    Unavailable,
    CallAgency,
    CoordinateWithDriver,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    #[serde(default)]
    pub arrival_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub departure_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub drop_off_type: StopEdgeType,
    #[serde(default)]
    pub pick_up_type: StopEdgeType,
    #[serde(default)]
    pub stop_headsign: Option<String>,
    pub stop_sequence: u32,
    pub route_id: RouteIdentifier,
    pub stop_id: StopIdentifier,
    pub trip_id: TripIdentifier,
}

impl Schedule {
    /// Departure if there is one, otherwise arrival (last stop of a trip).
    pub fn stop_time(&self) -> Option<DateTime<FixedOffset>> {
        self.departure_time.or(self.arrival_time)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripIdentifier,
    pub direction_id: DirectionId,
    #[serde(default)]
    pub headsign: String,
    pub route_id: RouteIdentifier,
    #[serde(default)]
    pub route_pattern_id: Option<String>,
    #[serde(default)]
    pub shape_id: Option<String>,
    #[serde(default)]
    pub stop_ids: Option<Vec<StopIdentifier>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub schedules: Vec<Schedule>,
    pub trips: HashMap<TripIdentifier, Trip>,
}

impl ScheduleResponse {
    pub fn new(schedules: Vec<Schedule>, trips: HashMap<TripIdentifier, Trip>) -> Self {
        Self { schedules, trips }
    }

    /// The subset of this response relevant to one stop: its schedules and
    /// only the trips they reference.
    pub fn for_stop(&self, stop_id: &str) -> ScheduleResponse {
        let schedules: Vec<Schedule> = self
            .schedules
            .iter()
            .filter(|schedule| schedule.stop_id.as_str() == stop_id)
            .cloned()
            .collect();
        let trips = schedules
            .iter()
            .filter_map(|schedule| self.trips.get_key_value(&schedule.trip_id))
            .map(|(id, trip)| (id.clone(), trip.clone()))
            .collect();
        ScheduleResponse { schedules, trips }
    }

    /// Combine several responses into one, ordered by stop time.
    ///
    /// Schedules present in more than one response are kept once.
    pub fn merge(responses: impl IntoIterator<Item = ScheduleResponse>) -> ScheduleResponse {
        let mut seen = HashSet::new();
        let mut schedules = Vec::new();
        let mut trips = HashMap::new();

        for response in responses {
            for schedule in response.schedules {
                if seen.insert(schedule.id.clone()) {
                    schedules.push(schedule);
                }
            }
            trips.extend(response.trips);
        }

        schedules.sort_by(|a, b| {
            a.stop_time()
                .cmp(&b.stop_time())
                .then(a.stop_sequence.cmp(&b.stop_sequence))
        });

        ScheduleResponse { schedules, trips }
    }
}
