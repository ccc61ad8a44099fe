use async_trait::async_trait;
use geo::{LineString, Polygon};
use serde::Deserialize;
use sqlx::PgPool;

use crate::error::SourceError;
use crate::models::zone::{Severity, Zone, ZoneId};
use crate::repository::ZoneSource;

const ZONE_COLUMNS: &str = "id, name, description, ST_AsGeoJSON(geometry) AS geometry, \
     active, severity, metadata::text AS metadata";

/// Zone catalog backed by the `no_parking_zones` PostGIS table (SRID 4326).
pub struct PostgisZoneSource {
    pool: PgPool,
}

impl PostgisZoneSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ZoneSource for PostgisZoneSource {
    async fn list_active_zones(&self) -> Result<Vec<Zone>, SourceError> {
        let sql = format!(
            "SELECT {} FROM no_parking_zones WHERE active = true ORDER BY id",
            ZONE_COLUMNS
        );
        let rows = sqlx::query_as::<_, ZoneRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(map_rows(rows))
    }

    async fn find_zones_containing(&self, lon: f64, lat: f64) -> Result<Vec<Zone>, SourceError> {
        let rows = sqlx::query_as::<_, ZoneRow>(&containing_sql())
            .bind(lon)
            .bind(lat)
            .fetch_all(&self.pool)
            .await?;

        Ok(map_rows(rows))
    }

    async fn find_zones_near(&self, lon: f64, lat: f64, radius_m: f64) -> Result<Vec<Zone>, SourceError> {
        let rows = sqlx::query_as::<_, ZoneRow>(&near_sql())
            .bind(lon)
            .bind(lat)
            .bind(radius_m)
            .fetch_all(&self.pool)
            .await?;

        Ok(map_rows(rows))
    }

    async fn list_active_by_severity(&self, severity: Severity) -> Result<Vec<Zone>, SourceError> {
        let rows = sqlx::query_as::<_, ZoneRow>(&by_severity_sql())
            .bind(severity.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(map_rows(rows))
    }

    async fn find_zone(&self, id: ZoneId) -> Result<Option<Zone>, SourceError> {
        let sql = format!("SELECT {} FROM no_parking_zones WHERE id = $1", ZONE_COLUMNS);
        let row = sqlx::query_as::<_, ZoneRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Zone::try_from).transpose()
    }

    async fn count_active_zones(&self) -> Result<usize, SourceError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM no_parking_zones WHERE active = true")
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

// PostGIS points are (x, y) = (lon, lat), bound as $1 and $2.
const POINT: &str = "ST_SetSRID(ST_MakePoint($1, $2), 4326)";

/// ST_Covers counts boundary points as inside, matching `geometry::contains`.
fn containing_sql() -> String {
    format!(
        "SELECT {} FROM no_parking_zones \
         WHERE active = true AND ST_Covers(geometry, {}) \
         ORDER BY id",
        ZONE_COLUMNS, POINT
    )
}

/// Geodesic distance in meters; zones covering the point are at distance 0.
fn near_sql() -> String {
    format!(
        "SELECT {cols} FROM no_parking_zones \
         WHERE active = true AND ST_DWithin(geometry::geography, {pt}::geography, $3) \
         ORDER BY ST_Distance(geometry::geography, {pt}::geography), id",
        cols = ZONE_COLUMNS,
        pt = POINT
    )
}

/// Rows with no severity map to MEDIUM, so they match a MEDIUM filter too.
fn by_severity_sql() -> String {
    format!(
        "SELECT {} FROM no_parking_zones \
         WHERE active = true AND COALESCE(NULLIF(UPPER(TRIM(severity)), ''), 'MEDIUM') = $1 \
         ORDER BY id",
        ZONE_COLUMNS
    )
}

/// Unmappable rows are dropped so one bad zone cannot take the rest down.
fn map_rows(rows: Vec<ZoneRow>) -> Vec<Zone> {
    rows.into_iter()
        .filter_map(|row| match Zone::try_from(row) {
            Ok(zone) => Some(zone),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unmappable zone row");
                None
            }
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct ZoneRow {
    id: i64,
    name: String,
    description: Option<String>,
    geometry: Option<String>,
    active: bool,
    severity: Option<String>,
    metadata: Option<String>,
}

/// The subset of a GeoJSON Polygon that `ST_AsGeoJSON` emits.
#[derive(Deserialize)]
struct GeoJsonPolygon {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<Vec<[f64; 2]>>,
}

impl TryFrom<ZoneRow> for Zone {
    type Error = SourceError;

    fn try_from(row: ZoneRow) -> Result<Self, Self::Error> {
        let id = ZoneId(row.id);

        let geometry = row.geometry.ok_or_else(|| SourceError::Geometry {
            id,
            reason: "geometry is null".to_string(),
        })?;
        let boundary = parse_geojson_polygon(&geometry).map_err(|reason| SourceError::Geometry { id, reason })?;

        let severity = match row.severity.as_deref() {
            None | Some("") => Severity::default(),
            Some(raw) => raw
                .parse::<Severity>()
                .map_err(|reason| SourceError::Mapping { id, reason })?,
        };

        let metadata = match row.metadata.as_deref() {
            None => serde_json::Value::Null,
            Some(raw) => serde_json::from_str(raw).map_err(|e| SourceError::Mapping {
                id,
                reason: format!("metadata is not valid JSON: {}", e),
            })?,
        };

        Ok(Zone {
            id,
            name: row.name,
            description: row.description,
            boundary,
            active: row.active,
            severity,
            metadata,
        })
    }
}

fn parse_geojson_polygon(raw: &str) -> Result<Polygon<f64>, String> {
    let parsed: GeoJsonPolygon =
        serde_json::from_str(raw).map_err(|e| format!("unreadable GeoJSON: {}", e))?;
    if parsed.kind != "Polygon" {
        return Err(format!("expected Polygon, found {}", parsed.kind));
    }

    let mut rings = parsed
        .coordinates
        .into_iter()
        .map(|ring| LineString::from(ring.into_iter().map(|[x, y]| (x, y)).collect::<Vec<_>>()));

    let exterior = rings.next().ok_or_else(|| "polygon has no rings".to_string())?;
    Ok(Polygon::new(exterior, rings.collect()))
}
