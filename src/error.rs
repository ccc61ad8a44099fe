use std::time::Duration;
use thiserror::Error;

use crate::models::zone::ZoneId;

/// Why a polygon cannot be used for containment checks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("ring is not closed (first point differs from last)")]
    OpenRing,
    #[error("ring has {0} points, at least 4 are required")]
    TooFewPoints(usize),
    #[error("ring has {0} distinct points, at least 3 are required")]
    Degenerate(usize),
    #[error("polygon has zero area")]
    ZeroArea,
    #[error("coordinate ({lon}, {lat}) is outside WGS84 bounds")]
    OutOfBounds { lon: f64, lat: f64 },
    #[error("ring {ring} self-intersects between segments {first} and {second}")]
    SelfIntersection {
        ring: usize,
        first: usize,
        second: usize,
    },
}

/// Rejection reasons for an incoming GPS fix.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("vehicle id is empty")]
    EmptyVehicleId,
    #[error("{0} is missing")]
    MissingCoordinate(&'static str),
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("timestamp is {ahead_secs}s in the future")]
    FutureTimestamp { ahead_secs: i64 },
    #[error("fix is stale ({age_secs}s old)")]
    StaleTimestamp { age_secs: i64 },
    #[error("accuracy {0}m is negative")]
    NegativeAccuracy(f64),
    #[error("accuracy {accuracy}m exceeds tolerance of {max}m")]
    InaccurateFix { accuracy: f64, max: f64 },
    #[error("speed {0} is negative")]
    NegativeSpeed(f64),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("zone {id} has invalid geometry: {reason}")]
    Geometry { id: ZoneId, reason: String },
    #[error("zone {id} could not be mapped: {reason}")]
    Mapping { id: ZoneId, reason: String },
    #[error("zone source unavailable: {0}")]
    Unavailable(String),
    #[error("zone source did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a detection that could not be completed.
///
/// `Validation` means the fix was rejected; the other variants mean the
/// engine could not determine containment and must not be read as
/// "no violation".
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("invalid GPS fix: {0}")]
    Validation(#[from] ValidationError),
    #[error("zone snapshot is empty and the zone source failed: {0}")]
    SourceUnavailable(#[source] SourceError),
    #[error("zone snapshot is empty and the fallback query timed out after {0:?}")]
    FallbackTimeout(Duration),
}

impl DetectionError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, DetectionError::Validation(_))
    }
}
