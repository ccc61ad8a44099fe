//! Real-time geofence violation detection.
//!
//! GPS fixes are checked against an in-memory snapshot of restricted zones.
//! When the snapshot is empty the zone source is queried directly. Repeat
//! violations for the same vehicle and zone are suppressed inside a
//! configurable window.

pub mod clock;
pub mod config;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod models;
pub mod repository;
pub mod services;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::{DetectionError, GeometryError, SourceError, ValidationError};
pub use crate::models::{DetectionSource, FixPolicy, GpsFix, Severity, ViolationRecord, Zone, ZoneId};
pub use crate::services::detection::{DetectionConfig, DetectionService};
pub use crate::services::AppState;
