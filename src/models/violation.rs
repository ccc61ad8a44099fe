use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::gps::GpsFix;
use crate::models::zone::{Severity, Zone, ZoneId};

/// Which path found the containing zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Snapshot,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub violation_id: String,
    pub vehicle_id: String,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub severity: Severity,
    pub latitude: f64,
    pub longitude: f64,
    pub event_time: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub source: DetectionSource,
}

impl ViolationRecord {
    pub fn new(
        fix: &GpsFix,
        zone: &Zone,
        detected_at: DateTime<Utc>,
        source: DetectionSource,
    ) -> Self {
        Self {
            violation_id: violation_id(&fix.vehicle_id, fix.timestamp, zone.id),
            vehicle_id: fix.vehicle_id.clone(),
            zone_id: zone.id,
            zone_name: zone.name.clone(),
            severity: zone.severity,
            latitude: fix.latitude,
            longitude: fix.longitude,
            event_time: fix.timestamp,
            detected_at,
            source,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity.is_critical()
    }
}

impl fmt::Display for ViolationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Violation[id={}, vehicle={}, zone={}, severity={}]",
            self.violation_id, self.vehicle_id, self.zone_name, self.severity
        )
    }
}

/// `{vehicle}_{event millis}_{zone}`; stable for a given fix and zone.
pub fn violation_id(vehicle_id: &str, event_time: DateTime<Utc>, zone_id: ZoneId) -> String {
    format!("{}_{}_{}", vehicle_id, event_time.timestamp_millis(), zone_id)
}
