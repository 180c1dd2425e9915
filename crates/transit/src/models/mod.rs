//! Backend data models.

pub mod alert;
pub mod calendar;
pub mod global;
pub mod prediction;
pub mod schedule;
pub mod types;

// Re-exports for convenience
pub use alert::{Alert, AlertsStreamData, EntityFilter, InformedEntity};
pub use calendar::{service_date, ServiceDateRounding};
pub use global::{Facility, FacilityType, GlobalData, Route, Stop};
pub use prediction::{Prediction, PredictionsStreamData, Vehicle};
pub use schedule::{Schedule, ScheduleResponse, Trip};
pub use types::{DirectionId, LocationType, Result, RouteType, TransitError};
