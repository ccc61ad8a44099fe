use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Limits applied to a fix before it is evaluated.
#[derive(Clone, Debug, PartialEq)]
pub struct FixPolicy {
    pub max_age: Duration,
    pub max_clock_skew: Duration,
    pub max_accuracy_meters: f64,
}

impl Default for FixPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::seconds(60),
            max_clock_skew: Duration::seconds(60),
            max_accuracy_meters: 50.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

impl GpsFix {
    pub fn new(vehicle_id: &str, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            latitude,
            longitude,
            timestamp,
            accuracy: None,
            speed: None,
            heading: None,
        }
    }

    /// Builds a fix from the compact form used by streaming clients.
    /// An unrepresentable timestamp maps to the epoch and is then rejected as stale.
    pub fn from_stream_message(vehicle_id: &str, lat: f64, lon: f64, epoch_millis: i64) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(epoch_millis)
            .single()
            .unwrap_or_default();
        Self::new(vehicle_id, lat, lon, timestamp)
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Heading is stored in [0, 360).
    pub fn with_heading(mut self, degrees: f64) -> Self {
        self.heading = Some(normalize_heading(degrees));
        self
    }

    pub fn validate(&self, now: DateTime<Utc>, policy: &FixPolicy) -> Result<(), ValidationError> {
        if self.vehicle_id.trim().is_empty() {
            return Err(ValidationError::EmptyVehicleId);
        }

        if !self.latitude.is_finite() {
            return Err(ValidationError::MissingCoordinate("latitude"));
        }
        if !self.longitude.is_finite() {
            return Err(ValidationError::MissingCoordinate("longitude"));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange(self.longitude));
        }

        let ahead = self.timestamp - now;
        if ahead > policy.max_clock_skew {
            return Err(ValidationError::FutureTimestamp {
                ahead_secs: ahead.num_seconds(),
            });
        }
        let age = now - self.timestamp;
        if age > policy.max_age {
            return Err(ValidationError::StaleTimestamp {
                age_secs: age.num_seconds(),
            });
        }

        if let Some(accuracy) = self.accuracy {
            if accuracy < 0.0 {
                return Err(ValidationError::NegativeAccuracy(accuracy));
            }
            if accuracy > policy.max_accuracy_meters {
                return Err(ValidationError::InaccurateFix {
                    accuracy,
                    max: policy.max_accuracy_meters,
                });
            }
        }

        if let Some(speed) = self.speed {
            if speed < 0.0 {
                return Err(ValidationError::NegativeSpeed(speed));
            }
        }

        Ok(())
    }
}

impl fmt::Display for GpsFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpsFix[vehicle={}, lat={:.6}, lon={:.6}, time={}]",
            self.vehicle_id,
            self.latitude,
            self.longitude,
            self.timestamp.to_rfc3339()
        )
    }
}

fn normalize_heading(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_fresh_fix_is_valid() {
        let fix = GpsFix::new("SC-001", 37.78, -122.415, now()).with_accuracy(5.0);
        assert_eq!(fix.validate(now(), &FixPolicy::default()), Ok(()));
    }

    #[test]
    fn test_stale_and_future_fixes_rejected() {
        let policy = FixPolicy::default();
        let stale = GpsFix::new("SC-001", 37.78, -122.415, now() - Duration::seconds(61));
        assert_eq!(
            stale.validate(now(), &policy),
            Err(ValidationError::StaleTimestamp { age_secs: 61 })
        );

        let future = GpsFix::new("SC-001", 37.78, -122.415, now() + Duration::seconds(90));
        assert_eq!(
            future.validate(now(), &policy),
            Err(ValidationError::FutureTimestamp { ahead_secs: 90 })
        );

        let edge = GpsFix::new("SC-001", 37.78, -122.415, now() - Duration::seconds(60));
        assert_eq!(edge.validate(now(), &policy), Ok(()));
    }

    #[test]
    fn test_coordinates_checked() {
        let policy = FixPolicy::default();
        let fix = GpsFix::new("SC-001", 91.0, 0.0, now());
        assert_eq!(
            fix.validate(now(), &policy),
            Err(ValidationError::LatitudeOutOfRange(91.0))
        );
        let fix = GpsFix::new("SC-001", 0.0, -180.5, now());
        assert_eq!(
            fix.validate(now(), &policy),
            Err(ValidationError::LongitudeOutOfRange(-180.5))
        );
        let fix = GpsFix::new("SC-001", f64::NAN, 0.0, now());
        assert_eq!(
            fix.validate(now(), &policy),
            Err(ValidationError::MissingCoordinate("latitude"))
        );
    }

    #[test]
    fn test_accuracy_and_vehicle_checked() {
        let policy = FixPolicy::default();
        let fix = GpsFix::new("SC-001", 0.0, 0.0, now()).with_accuracy(50.5);
        assert!(matches!(
            fix.validate(now(), &policy),
            Err(ValidationError::InaccurateFix { .. })
        ));
        let fix = GpsFix::new("  ", 0.0, 0.0, now());
        assert_eq!(fix.validate(now(), &policy), Err(ValidationError::EmptyVehicleId));
        let fix = GpsFix::new("SC-001", 0.0, 0.0, now()).with_speed(-1.0);
        assert_eq!(fix.validate(now(), &policy), Err(ValidationError::NegativeSpeed(-1.0)));
    }

    #[test]
    fn test_heading_normalized() {
        let fix = GpsFix::new("SC-001", 0.0, 0.0, now()).with_heading(370.0);
        assert_eq!(fix.heading, Some(10.0));
        let fix = GpsFix::new("SC-001", 0.0, 0.0, now()).with_heading(-90.0);
        assert_eq!(fix.heading, Some(270.0));
    }

    #[test]
    fn test_from_stream_message() {
        let fix = GpsFix::from_stream_message("SC-9", 1.0, 2.0, 1_704_110_400_000);
        assert_eq!(fix.timestamp, now());
        assert_eq!(fix.longitude, 2.0);
    }
}
