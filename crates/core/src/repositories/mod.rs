//! Backend-facing data sources: live channel subscriptions and cached HTTP
//! resources.

pub mod alerts;
pub mod channel;
pub mod global;
pub mod predictions;
pub mod schedules;

pub use alerts::{AlertsRepository, AlertsSource};
pub use channel::{ChannelSubscription, ReceiveCallback};
pub use global::{GlobalDataSource, GlobalRepository};
pub use predictions::PredictionsRepository;
pub use schedules::{CachedSchedulesRepository, SchedulesRepository, SchedulesSource};
