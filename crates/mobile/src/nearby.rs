use std::sync::Arc;

use geo::Point;
use rider_core::transit::models::GlobalData;
use tracing::debug;

use crate::MobileError;

#[derive(Clone, Debug, PartialEq, uniffi::Record)]
pub struct NearbyStop {
    pub stop_id: String,
    pub name: String,
    pub distance_miles: f64,
}

/// Boarding stops from one global data payload, indexed by position.
#[derive(uniffi::Object)]
pub struct NearbyStopsIndex {
    global: GlobalData,
}

#[uniffi::export]
impl NearbyStopsIndex {
    /// Build from the `api/global` response body.
    #[uniffi::constructor]
    pub fn from_global_json(json: String) -> Result<Arc<Self>, MobileError> {
        let global: GlobalData =
            serde_json::from_str(&json).map_err(|e| MobileError::InvalidData(e.to_string()))?;
        // build the tree now rather than on the first query
        let indexed = global.leaf_stops_tree().len();
        debug!(stops = global.stops.len(), indexed, "nearby stops index ready");
        Ok(Arc::new(Self { global }))
    }

    pub fn indexed_stop_count(&self) -> u64 {
        self.global.leaf_stops_tree().len() as u64
    }

    /// Boarding stops within `radius_miles`, closest first.
    pub fn stops_within(&self, latitude: f64, longitude: f64, radius_miles: f64) -> Vec<NearbyStop> {
        if !radius_miles.is_finite() || radius_miles < 0.0 {
            return Vec::new();
        }
        self.global
            .leaf_stops_near(Point::new(longitude, latitude), radius_miles)
            .into_iter()
            .map(|(stop, distance_miles)| NearbyStop {
                stop_id: stop.id.as_str().to_string(),
                name: stop.name.clone(),
                distance_miles,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GLOBAL_JSON: &str = r#"{
        "facilities": {},
        "routes": {},
        "stops": {
            "place-pktrm": {"id": "place-pktrm", "name": "Park Street", "latitude": 42.356395,
                            "longitude": -71.062424, "location_type": "station", "vehicle_type": "heavy_rail"},
            "place-dwnxg": {"id": "place-dwnxg", "name": "Downtown Crossing", "latitude": 42.355518,
                            "longitude": -71.060225, "location_type": "station", "vehicle_type": "heavy_rail"},
            "place-harsq": {"id": "place-harsq", "name": "Harvard", "latitude": 42.373362,
                            "longitude": -71.118956, "location_type": "station", "vehicle_type": "heavy_rail"},
            "door-pktrm-tremont": {"id": "door-pktrm-tremont", "name": "Park Street - Tremont St",
                            "latitude": 42.356, "longitude": -71.0624, "location_type": "entrance_exit",
                            "parent_station_id": "place-pktrm"}
        }
    }"#;

    #[test]
    fn test_stops_within_radius_closest_first() {
        let index = NearbyStopsIndex::from_global_json(GLOBAL_JSON.to_string()).unwrap();
        assert_eq!(index.indexed_stop_count(), 3);

        let nearby = index.stops_within(42.356395, -71.062424, 0.5);
        let ids: Vec<_> = nearby.iter().map(|stop| stop.stop_id.as_str()).collect();
        assert_eq!(ids, vec!["place-pktrm", "place-dwnxg"]);
        assert_eq!(nearby[0].distance_miles, 0.0);
        assert!(nearby[1].distance_miles > 0.0 && nearby[1].distance_miles < 0.5);
    }

    #[test]
    fn test_invalid_radius_is_empty() {
        let index = NearbyStopsIndex::from_global_json(GLOBAL_JSON.to_string()).unwrap();
        assert!(index.stops_within(42.356395, -71.062424, -1.0).is_empty());
        assert!(index.stops_within(42.356395, -71.062424, f64::NAN).is_empty());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            NearbyStopsIndex::from_global_json("[]".to_string()),
            Err(MobileError::InvalidData(_))
        ));
    }
}
