//! Service alerts as delivered over the `alerts` channel.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::identifiers::*;
use crate::models::global::{Facility, GlobalData};
use crate::models::types::RouteType;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePeriod {
    pub start: DateTime<FixedOffset>,
    #[serde(default)]
    pub end: Option<DateTime<FixedOffset>>,
}

impl ActivePeriod {
    pub fn active_at(&self, at: DateTime<FixedOffset>) -> bool {
        self.start <= at && self.end.is_none_or(|end| at < end)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    Accident,
    Construction,
    Demonstration,
    Holiday,
    Maintenance,
    MedicalEmergency,
    Parade,
    PoliceAction,
    SignalProblem,
    SpecialEvent,
    Weather,
    #[default]
    #[serde(other)]
    UnknownCause,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Delay,
    Detour,
    DockClosure,
    ElevatorClosure,
    EscalatorClosure,
    FacilityIssue,
    ServiceChange,
    Shuttle,
    StationClosure,
    StationIssue,
    StopClosure,
    StopMoved,
    Suspension,
    TrackChange,
    #[default]
    #[serde(other)]
    UnknownEffect,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    New,
    Ongoing,
    OngoingUpcoming,
    Upcoming,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Board,
    BringingBike,
    Exit,
    ParkCar,
    Ride,
    StoreBike,
    UsingEscalator,
    UsingWheelchair,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformedEntity {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub direction_id: Option<u8>,
    #[serde(default)]
    pub facility: Option<FacilityIdentifier>,
    #[serde(default)]
    pub route: Option<RouteIdentifier>,
    #[serde(default)]
    pub route_type: Option<RouteType>,
    #[serde(default)]
    pub stop: Option<StopIdentifier>,
    #[serde(default)]
    pub trip: Option<TripIdentifier>,
}

/// Filter for [`InformedEntity::applies_to`]; `None` fields match anything.
#[derive(Clone, Debug, Default)]
pub struct EntityFilter<'a> {
    pub direction_id: Option<u8>,
    pub facility: Option<&'a str>,
    pub route: Option<&'a str>,
    pub route_type: Option<RouteType>,
    pub stop: Option<&'a str>,
    pub trip: Option<&'a str>,
}

impl InformedEntity {
    /// An unset field on either side is a wildcard.
    pub fn applies_to(&self, filter: &EntityFilter<'_>) -> bool {
        fn matches<T: PartialEq>(expected: Option<T>, actual: Option<T>) -> bool {
            match (expected, actual) {
                (Some(expected), Some(actual)) => expected == actual,
                _ => true,
            }
        }

        matches(filter.direction_id, self.direction_id)
            && matches(filter.facility, self.facility.as_ref().map(|f| f.as_str()))
            && matches(filter.route, self.route.as_ref().map(|r| r.as_str()))
            && matches(filter.route_type, self.route_type)
            && matches(filter.stop, self.stop.as_ref().map(|s| s.as_str()))
            && matches(filter.trip, self.trip.as_ref().map(|t| t.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertIdentifier,
    #[serde(default)]
    pub active_period: Vec<ActivePeriod>,
    #[serde(default)]
    pub cause: Cause,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub effect: Effect,
    #[serde(default)]
    pub effect_name: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub informed_entity: Vec<InformedEntity>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub severity: i32,
    pub updated_at: DateTime<FixedOffset>,

    /// Not sent by the backend: filled in from global data for every facility
    /// an informed entity references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilities: Option<HashMap<FacilityIdentifier, Facility>>,
}

impl Alert {
    pub fn is_active(&self, at: DateTime<FixedOffset>) -> bool {
        self.active_period.iter().any(|period| period.active_at(at))
    }

    pub fn any_informed_entity(&self, filter: &EntityFilter<'_>) -> bool {
        self.informed_entity.iter().any(|entity| entity.applies_to(filter))
    }

    /// Copy of this alert with `facilities` resolved against `global`.
    ///
    /// Facilities missing from `global` are skipped; with no referenced
    /// facility at all the field stays `None`.
    pub fn with_facilities(&self, global: &GlobalData) -> Alert {
        let facilities: HashMap<_, _> = self
            .informed_entity
            .iter()
            .filter_map(|entity| entity.facility.as_ref())
            .filter_map(|id| global.get_facility(id.as_str()))
            .map(|facility| (facility.id.clone(), facility.clone()))
            .collect();

        Alert {
            facilities: (!facilities.is_empty()).then_some(facilities),
            ..self.clone()
        }
    }
}

/// Payload of the alerts channel: every active alert, keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertsStreamData {
    pub alerts: HashMap<AlertIdentifier, Alert>,
}

impl AlertsStreamData {
    pub fn new(alerts: impl IntoIterator<Item = Alert>) -> Self {
        Self {
            alerts: alerts.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn get_alert(&self, id: &str) -> Option<&Alert> {
        self.alerts.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn inject_facilities(&self, global: &GlobalData) -> AlertsStreamData {
        AlertsStreamData {
            alerts: self
                .alerts
                .iter()
                .map(|(id, alert)| (id.clone(), alert.with_facilities(global)))
                .collect(),
        }
    }
}
