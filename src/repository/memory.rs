use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::SourceError;
use crate::geometry;
use crate::models::zone::{Severity, Zone, ZoneId};
use crate::repository::ZoneSource;

/// In-process zone catalog.
///
/// Useful for embedding the engine without a database and for exercising
/// failure paths: the source can be switched offline or slowed down, and it
/// counts how often each query was issued.
#[derive(Default)]
pub struct InMemoryZoneSource {
    zones: RwLock<BTreeMap<ZoneId, Zone>>,
    offline: AtomicBool,
    latency: RwLock<Option<Duration>>,
    list_calls: AtomicUsize,
    point_queries: AtomicUsize,
}

impl InMemoryZoneSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zones(zones: impl IntoIterator<Item = Zone>) -> Self {
        let source = Self::new();
        for zone in zones {
            source.upsert(zone);
        }
        source
    }

    pub fn upsert(&self, zone: Zone) {
        self.zones.write().insert(zone.id, zone);
    }

    pub fn remove(&self, id: ZoneId) -> Option<Zone> {
        self.zones.write().remove(&id)
    }

    pub fn set_active(&self, id: ZoneId, active: bool) -> bool {
        match self.zones.write().get_mut(&id) {
            Some(zone) => {
                zone.active = active;
                true
            }
            None => false,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn point_queries(&self) -> usize {
        self.point_queries.load(Ordering::SeqCst)
    }

    async fn simulate_io(&self) -> Result<(), SourceError> {
        let latency = *self.latency.read();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("in-memory source is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ZoneSource for InMemoryZoneSource {
    async fn list_active_zones(&self) -> Result<Vec<Zone>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;

        Ok(self
            .zones
            .read()
            .values()
            .filter(|z| z.active)
            .cloned()
            .collect())
    }

    async fn find_zones_containing(&self, lon: f64, lat: f64) -> Result<Vec<Zone>, SourceError> {
        self.point_queries.fetch_add(1, Ordering::SeqCst);
        self.simulate_io().await?;

        Ok(self
            .zones
            .read()
            .values()
            .filter(|z| z.active && z.contains(lon, lat))
            .cloned()
            .collect())
    }

    async fn find_zones_near(&self, lon: f64, lat: f64, radius_m: f64) -> Result<Vec<Zone>, SourceError> {
        self.simulate_io().await?;

        let mut near: Vec<(f64, Zone)> = self
            .zones
            .read()
            .values()
            .filter(|z| z.active)
            .map(|z| (geometry::distance_meters(&z.boundary, lon, lat), z))
            .filter(|(distance, _)| *distance <= radius_m)
            .map(|(distance, z)| (distance, z.clone()))
            .collect();
        // Stable sort keeps id order among equal distances.
        near.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(near.into_iter().map(|(_, zone)| zone).collect())
    }

    async fn list_active_by_severity(&self, severity: Severity) -> Result<Vec<Zone>, SourceError> {
        self.simulate_io().await?;

        Ok(self
            .zones
            .read()
            .values()
            .filter(|z| z.active && z.severity == severity)
            .cloned()
            .collect())
    }

    async fn find_zone(&self, id: ZoneId) -> Result<Option<Zone>, SourceError> {
        self.simulate_io().await?;
        Ok(self.zones.read().get(&id).cloned())
    }

    async fn count_active_zones(&self) -> Result<usize, SourceError> {
        self.simulate_io().await?;
        Ok(self.zones.read().values().filter(|z| z.active).count())
    }
}
