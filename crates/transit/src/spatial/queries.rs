//! Spatial query utilities for distance calculations.
//!
//! Uses Haversine formula for accurate distances on Earth's surface.

use geo::{HaversineDistance, Point};

pub const METERS_PER_MILE: f64 = 1609.344;

/// Mean earth radius, the same one `HaversineDistance` uses.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Calculate Haversine distance between two points in meters
pub fn haversine_distance(p1: Point, p2: Point) -> f64 {
    p1.haversine_distance(&p2)
}

/// Calculate Haversine distance between two points in miles
pub fn haversine_distance_miles(p1: Point, p2: Point) -> f64 {
    meters_to_miles(haversine_distance(p1, p2))
}

/// Shortest distance in miles from `point` to the great circle through the
/// meridian at `longitude` (and its antimeridian).
///
/// Never larger than the haversine distance to any point on that meridian.
pub fn meridian_distance_miles(point: Point, longitude: f64) -> f64 {
    let delta = (point.x() - longitude).to_radians().sin().abs();
    let angle = (delta * point.y().to_radians().cos()).clamp(0.0, 1.0).asin();
    meters_to_miles(angle * EARTH_RADIUS_METERS)
}

pub fn miles_to_meters(miles: f64) -> f64 {
    miles * METERS_PER_MILE
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_haversine_distance() {
        // Distance from NYC to LA is approximately 3,936 km
        let nyc = Point::new(-74.0060, 40.7128);
        let la = Point::new(-118.2437, 34.0522);

        let dist = haversine_distance(nyc, la);
        assert!((dist - 3_936_000.0).abs() < 50_000.0); // Within 50km
    }

    #[test]
    fn test_haversine_distance_miles() {
        // Park Street to Downtown Crossing is a short walk, well under a quarter mile
        let park = Point::new(-71.0624, 42.35639);
        let dtx = Point::new(-71.060225, 42.355518);

        let miles = haversine_distance_miles(park, dtx);
        assert!(miles > 0.05 && miles < 0.25);
        assert_relative_eq!(haversine_distance_miles(park, park), 0.0);
    }

    #[test]
    fn test_meridian_distance_is_a_lower_bound() {
        let from = Point::new(0.0, 70.0);
        let along_parallel = haversine_distance_miles(from, Point::new(10.0, 70.0));
        let to_meridian = meridian_distance_miles(from, 10.0);
        assert!(to_meridian < along_parallel);

        for latitude in [-60.0, 0.0, 35.0, 69.0, 70.3, 85.0] {
            let on_meridian = Point::new(10.0, latitude);
            assert!(to_meridian <= haversine_distance_miles(from, on_meridian) + 1e-9);
        }

        // at the equator the meridian is closest due east
        assert_relative_eq!(
            meridian_distance_miles(Point::new(0.0, 0.0), 1.0),
            haversine_distance_miles(Point::new(0.0, 0.0), Point::new(1.0, 0.0)),
            epsilon = 1e-9
        );
        assert_relative_eq!(meridian_distance_miles(from, 0.0), 0.0);
    }

    #[test]
    fn test_unit_conversions() {
        assert_relative_eq!(miles_to_meters(1.0), 1609.344);
        assert_relative_eq!(meters_to_miles(miles_to_meters(2.5)), 2.5);
    }
}
