pub mod memory;
pub mod zone_repo;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::zone::{Severity, Zone, ZoneId};

pub use memory::InMemoryZoneSource;
pub use zone_repo::PostgisZoneSource;

/// Authoritative zone catalog. The engine only reads from it.
#[async_trait]
pub trait ZoneSource: Send + Sync {
    async fn list_active_zones(&self) -> Result<Vec<Zone>, SourceError>;

    /// Active zones whose polygon contains (lon, lat).
    async fn find_zones_containing(&self, lon: f64, lat: f64) -> Result<Vec<Zone>, SourceError>;

    /// Active zones within `radius_m` geodesic meters of (lon, lat), nearest
    /// first and then by id. A zone covering the point is at distance zero.
    async fn find_zones_near(&self, lon: f64, lat: f64, radius_m: f64) -> Result<Vec<Zone>, SourceError>;

    async fn list_active_by_severity(&self, severity: Severity) -> Result<Vec<Zone>, SourceError>;

    /// Looks a zone up regardless of its active flag.
    async fn find_zone(&self, id: ZoneId) -> Result<Option<Zone>, SourceError>;

    async fn count_active_zones(&self) -> Result<usize, SourceError>;
}
