//! # rider-transit
//!
//! Backend data model and spatial queries for the rider data layer.
//!
//! ## Features
//!
//! - **Typed identifiers**: cheap-to-clone ids that look up by `&str`
//! - **Backend models**: stops, routes, facilities, alerts, schedules, predictions
//! - **Spatial queries**: static k-d tree for "what is near me" lookups
//! - **Service dates**: agency service day that rolls over at 3am
//!
//! ## Example
//!
//! ```
//! use rider_transit::prelude::*;
//! use geo::Point;
//!
//! let tree = KdTree::new(vec![
//!     ("A", Point::new(0.0, 0.0)),
//!     ("B", Point::new(0.0, 0.0)),
//!     ("C", Point::new(1.0, 1.0)),
//! ]);
//!
//! let nearby = tree.find_nodes_within(Point::new(0.0, 0.0), 0.1, |_, _| true);
//! assert_eq!(nearby, vec![("A", 0.0), ("B", 0.0)]);
//! ```

pub mod identifiers;
pub mod models;
pub mod spatial;

// Re-exports for convenience
pub mod prelude {
    pub use crate::identifiers::*;
    pub use crate::models::*;
    pub use crate::spatial::{haversine_distance, haversine_distance_miles, Axis, KdTree};
}

pub use prelude::*;
