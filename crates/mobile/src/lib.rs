pub mod logging;
pub mod nearby;

use rider_core::DataLayerConfig;

pub use logging::{init_panic_handler, setup_logging};
pub use nearby::{NearbyStop, NearbyStopsIndex};

uniffi::setup_scaffolding!();

#[derive(Debug, thiserror::Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum MobileError {
    #[error("{0}")]
    InvalidData(String),
    #[error("{0}")]
    InvalidConfig(String),
}

/// Check a data layer configuration before handing it to the core.
#[uniffi::export]
pub fn validate_config(json: String) -> Result<(), MobileError> {
    DataLayerConfig::from_json(&json)
        .map(|_| ())
        .map_err(|e| MobileError::InvalidConfig(e.to_string()))
}
