pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fs;
pub mod network;
pub mod repositories;
pub mod state;
pub mod usecases;

pub use config::DataLayerConfig;
pub use error::{ApiError, ApiResult, FetchError, SocketError};
pub use state::LastKnownValue;

// Re-export transit from the transit crate
pub use rider_transit as transit;
