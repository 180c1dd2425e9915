//! Core enums and error types shared by the backend models.

use serde::{Deserialize, Serialize};

// ============================================================================
// Enums
// ============================================================================

/// Route types as reported by the backend.
///
/// The numeric discriminants follow GTFS `route_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RouteType {
    LightRail = 0,
    HeavyRail = 1,
    CommuterRail = 2,
    Bus = 3,
    Ferry = 4,
}

impl RouteType {
    pub fn from_gtfs(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::LightRail),
            1 => Some(Self::HeavyRail),
            2 => Some(Self::CommuterRail),
            3 => Some(Self::Bus),
            4 => Some(Self::Ferry),
            _ => None,
        }
    }

    pub fn is_subway(&self) -> bool {
        matches!(self, Self::LightRail | Self::HeavyRail)
    }
}

/// GTFS `location_type` of a stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    #[default]
    Stop,
    Station,
    EntranceExit,
    GenericNode,
    BoardingArea,
}

/// Trip direction (0 / 1 per GTFS)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum DirectionId {
    Outbound = 0,
    Inbound = 1,
}

impl TryFrom<u8> for DirectionId {
    type Error = TransitError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Outbound),
            1 => Ok(Self::Inbound),
            other => Err(TransitError::InvalidData(format!(
                "direction id must be 0 or 1, got {other}"
            ))),
        }
    }
}

impl From<DirectionId> for u8 {
    fn from(value: DirectionId) -> Self {
        value as u8
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for TransitError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerializationError(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransitError>;
