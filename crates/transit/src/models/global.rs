//! Static reference data ("global data"): stops, routes and facilities.
//!
//! This is the large, slowly-changing payload the app downloads once per
//! session and revalidates with an ETag.

use std::collections::HashMap;
use std::sync::OnceLock;

use geo::Point;
use serde::{Deserialize, Serialize};

use crate::identifiers::*;
use crate::models::types::{LocationType, RouteType};
use crate::spatial::kd_tree::KdTree;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopIdentifier,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub location_type: LocationType,
    #[serde(default)]
    pub parent_station_id: Option<StopIdentifier>,
    #[serde(default)]
    pub child_stop_ids: Vec<StopIdentifier>,
    #[serde(default)]
    pub vehicle_type: Option<RouteType>,
    #[serde(default)]
    pub wheelchair_boarding: Option<String>,
}

impl Stop {
    /// Position as (longitude, latitude)
    pub fn position(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }

    /// Stops and stations that riders board at, as opposed to entrances and
    /// internal nodes.
    pub fn is_leaf_boarding_location(&self) -> bool {
        matches!(self.location_type, LocationType::Stop | LocationType::Station)
            && self.vehicle_type.is_some()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityType {
    BikeStorage,
    ElectricCarChargers,
    ElevatedSubplatform,
    Elevator,
    Escalator,
    FareMediaAssistanceFacility,
    FareVendingMachine,
    Parking,
    PortableBoardingLift,
    Ramp,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityIdentifier,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(rename = "type", default)]
    pub facility_type: FacilityType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteIdentifier,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub text_color: Option<String>,
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub line_id: Option<String>,
}

/// The reference data payload served by `api/global`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GlobalData {
    #[serde(default)]
    pub facilities: HashMap<FacilityIdentifier, Facility>,
    #[serde(default)]
    pub routes: HashMap<RouteIdentifier, Route>,
    #[serde(default)]
    pub stops: HashMap<StopIdentifier, Stop>,
    #[serde(default)]
    pub pattern_ids_by_stop: HashMap<StopIdentifier, Vec<String>>,

    #[serde(skip)]
    leaf_stops_tree: OnceLock<KdTree<StopIdentifier>>,
}

impl Clone for GlobalData {
    fn clone(&self) -> Self {
        Self {
            facilities: self.facilities.clone(),
            routes: self.routes.clone(),
            stops: self.stops.clone(),
            pattern_ids_by_stop: self.pattern_ids_by_stop.clone(),
            leaf_stops_tree: self.leaf_stops_tree.clone(),
        }
    }
}

impl GlobalData {
    pub fn new(
        facilities: impl IntoIterator<Item = Facility>,
        routes: impl IntoIterator<Item = Route>,
        stops: impl IntoIterator<Item = Stop>,
    ) -> Self {
        Self {
            facilities: facilities.into_iter().map(|f| (f.id.clone(), f)).collect(),
            routes: routes.into_iter().map(|r| (r.id.clone(), r)).collect(),
            stops: stops.into_iter().map(|s| (s.id.clone(), s)).collect(),
            pattern_ids_by_stop: HashMap::new(),
            leaf_stops_tree: OnceLock::new(),
        }
    }

    pub fn get_stop(&self, id: &str) -> Option<&Stop> {
        self.stops.get(id)
    }

    pub fn get_facility(&self, id: &str) -> Option<&Facility> {
        self.facilities.get(id)
    }

    pub fn get_route(&self, id: &str) -> Option<&Route> {
        self.routes.get(id)
    }

    /// Spatial index over boarding stops and stations, built on first use.
    pub fn leaf_stops_tree(&self) -> &KdTree<StopIdentifier> {
        self.leaf_stops_tree.get_or_init(|| {
            // Sorted so the tree shape does not depend on HashMap iteration order.
            let mut elements: Vec<_> = self
                .stops
                .values()
                .filter(|stop| stop.is_leaf_boarding_location())
                .map(|stop| (stop.id.clone(), stop.position()))
                .collect();
            elements.sort_by(|a, b| a.0.cmp(&b.0));
            KdTree::new(elements)
        })
    }

    /// Boarding stops within `radius_miles` of `center`, closest first.
    pub fn leaf_stops_near(&self, center: Point, radius_miles: f64) -> Vec<(&Stop, f64)> {
        self.leaf_stops_tree()
            .find_nodes_within(center, radius_miles, |_, _| true)
            .into_iter()
            .filter_map(|(id, distance)| self.stops.get(&id).map(|stop| (stop, distance)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str, lat: f64, lon: f64, location_type: LocationType) -> Stop {
        Stop {
            id: StopIdentifier::new(id),
            name: id.to_string(),
            latitude: lat,
            longitude: lon,
            location_type,
            parent_station_id: None,
            child_stop_ids: vec![],
            vehicle_type: Some(RouteType::Bus),
            wheelchair_boarding: None,
        }
    }

    #[test]
    fn test_parse_global_payload() {
        let json = r#"{
            "facilities": {
                "elev-1": {"id": "elev-1", "long_name": "Elevator 1", "type": "elevator"},
                "odd-1": {"id": "odd-1", "type": "something_new"}
            },
            "routes": {
                "Red": {"id": "Red", "type": "heavy_rail", "long_name": "Red Line", "color": "DA291C"}
            },
            "stops": {
                "place-sstat": {"id": "place-sstat", "name": "South Station",
                    "latitude": 42.352271, "longitude": -71.055242,
                    "location_type": "station", "vehicle_type": "heavy_rail"}
            },
            "pattern_ids_by_stop": {"place-sstat": ["Red-1-0"]}
        }"#;

        let global: GlobalData = serde_json::from_str(json).unwrap();
        assert_eq!(
            global.get_facility("elev-1").unwrap().facility_type,
            FacilityType::Elevator
        );
        assert_eq!(global.get_facility("odd-1").unwrap().facility_type, FacilityType::Other);
        assert_eq!(global.get_route("Red").unwrap().route_type, RouteType::HeavyRail);
        assert_eq!(
            global.get_stop("place-sstat").unwrap().location_type,
            LocationType::Station
        );
        assert_eq!(global.pattern_ids_by_stop["place-sstat"], vec!["Red-1-0".to_string()]);
    }

    #[test]
    fn test_leaf_stops_exclude_entrances() {
        let global = GlobalData::new(
            vec![],
            vec![],
            vec![
                stop("1", 42.3601, -71.0589, LocationType::Stop),
                stop("entrance", 42.3601, -71.0590, LocationType::EntranceExit),
                stop("far", 42.5, -71.5, LocationType::Stop),
            ],
        );

        let nearby = global.leaf_stops_near(Point::new(-71.0589, 42.3601), 1.0);
        let ids: Vec<_> = nearby.iter().map(|(s, _)| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }
}
