//! Spatial indexing and query utilities.

pub mod kd_tree;
pub mod queries;

pub use kd_tree::{Axis, KdTree};
pub use queries::{haversine_distance, haversine_distance_miles};
