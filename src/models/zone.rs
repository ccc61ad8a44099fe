use geo::{Area, CoordsIter, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GeometryError;
use crate::geometry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub i64);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ZoneId {
    fn from(id: i64) -> Self {
        ZoneId(id)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// A named restricted area. Boundary coordinates are (lon, lat) in WGS84 degrees.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub description: Option<String>,
    pub boundary: Polygon<f64>,
    pub active: bool,
    pub severity: Severity,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Zone {
    pub fn new(id: impl Into<ZoneId>, name: &str, boundary: Polygon<f64>) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            description: None,
            boundary,
            active: true,
            severity: Severity::default(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Builds a zone from a closed exterior ring of (lon, lat) pairs.
    pub fn from_ring(
        id: impl Into<ZoneId>,
        name: &str,
        ring: Vec<(f64, f64)>,
    ) -> Result<Self, GeometryError> {
        let exterior = geometry::close_ring(ring)?;
        Ok(Self::new(id, name, Polygon::new(exterior, Vec::new())))
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_hole(mut self, ring: Vec<(f64, f64)>) -> Result<Self, GeometryError> {
        let hole = geometry::close_ring(ring)?;
        self.boundary.interiors_push(hole);
        Ok(self)
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        geometry::contains(&self.boundary, lon, lat)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        geometry::validate_polygon(&self.boundary)
    }

    pub fn exterior(&self) -> &LineString<f64> {
        self.boundary.exterior()
    }

    pub fn vertex_count(&self) -> usize {
        self.boundary.coords_count()
    }

    /// Planar area in square degrees; not meaningful as a ground area.
    pub fn area_sq_degrees(&self) -> f64 {
        self.boundary.unsigned_area()
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Zone[id={}, name={}, severity={}]",
            self.id, self.name, self.severity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
    }

    #[test]
    fn test_severity_parses_case_insensitively() {
        assert_eq!("high".parse::<Severity>(), Ok(Severity::High));
        assert_eq!(" Low ".parse::<Severity>(), Ok(Severity::Low));
        assert!("CRITICAL".parse::<Severity>().is_err());
        assert!(Severity::High.is_critical());
        assert!(!Severity::Medium.is_critical());
    }

    #[test]
    fn test_zone_from_open_ring_is_rejected() {
        let ring = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        assert_eq!(
            Zone::from_ring(1, "open", ring).unwrap_err(),
            GeometryError::OpenRing
        );
    }

    #[test]
    fn test_zone_helpers() {
        let zone = Zone::from_ring(7, "square", square())
            .unwrap()
            .with_severity(Severity::High);

        assert_eq!(zone.vertex_count(), 5);
        assert!((zone.area_sq_degrees() - 1.0).abs() < 1e-12);
        assert!(zone.contains(0.5, 0.5));
        assert_eq!(zone.to_string(), "Zone[id=7, name=square, severity=HIGH]");
    }

    #[test]
    fn test_zone_serde_keeps_geometry() {
        let zone = Zone::from_ring(3, "json", square()).unwrap();
        let json = serde_json::to_string(&zone).unwrap();
        let back: Zone = serde_json::from_str(&json).unwrap();
        assert_eq!(back, zone);
        assert!(json.contains("\"severity\":\"MEDIUM\""));
    }
}
