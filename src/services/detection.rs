use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{DetectionError, SourceError};
use crate::models::gps::{FixPolicy, GpsFix};
use crate::models::violation::{DetectionSource, ViolationRecord};
use crate::models::zone::{Severity, Zone, ZoneId};
use crate::repository::ZoneSource;
use crate::services::dedup::{DedupDecision, ViolationDeduplicator};
use crate::services::snapshot::{CacheStats, ZoneChange, ZoneSnapshotStore};

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub fix_policy: FixPolicy,
    /// Upper bound on the direct source query used while the snapshot is empty.
    pub fallback_timeout: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fix_policy: FixPolicy::default(),
            fallback_timeout: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    checked: AtomicU64,
    rejected: AtomicU64,
    fallback: AtomicU64,
    suppressed: AtomicU64,
    emitted: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the detection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionCounters {
    pub checked: u64,
    pub rejected: u64,
    pub fallback: u64,
    pub suppressed: u64,
    pub emitted: u64,
    pub failed: u64,
}

pub struct DetectionService {
    store: Arc<ZoneSnapshotStore>,
    source: Arc<dyn ZoneSource>,
    dedup: Arc<ViolationDeduplicator>,
    clock: Arc<dyn Clock>,
    config: DetectionConfig,
    counters: Counters,
}

impl DetectionService {
    pub fn new(
        store: Arc<ZoneSnapshotStore>,
        source: Arc<dyn ZoneSource>,
        dedup: Arc<ViolationDeduplicator>,
        clock: Arc<dyn Clock>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            store,
            source,
            dedup,
            clock,
            config,
            counters: Counters::default(),
        }
    }

    /// Evaluates one fix and returns a record for every containing zone that
    /// is not suppressed by the dedup window, ordered by zone id.
    ///
    /// An `Err` other than `Validation` means containment could not be
    /// determined; it is never reported as an empty result.
    pub async fn check_violation(&self, fix: &GpsFix) -> Result<Vec<ViolationRecord>, DetectionError> {
        Counters::bump(&self.counters.checked);
        let now = self.clock.now();

        if let Err(e) = fix.validate(now, &self.config.fix_policy) {
            Counters::bump(&self.counters.rejected);
            tracing::warn!(vehicle_id = %fix.vehicle_id, error = %e, "Rejected GPS fix");
            return Err(e.into());
        }

        let (candidates, source) = self.candidate_zones(fix).await?;

        let mut violations = Vec::with_capacity(candidates.len());
        for zone in candidates {
            match self.dedup.check_and_record(&fix.vehicle_id, zone.id, fix.timestamp) {
                DedupDecision::Emit => {
                    let record = ViolationRecord::new(fix, &zone, now, source);
                    Counters::bump(&self.counters.emitted);
                    tracing::info!(
                        violation_id = %record.violation_id,
                        vehicle_id = %record.vehicle_id,
                        zone_id = %record.zone_id,
                        zone_name = %record.zone_name,
                        severity = %record.severity,
                        "Geofence violation detected"
                    );
                    violations.push(record);
                }
                DedupDecision::Suppress => {
                    Counters::bump(&self.counters.suppressed);
                    tracing::debug!(vehicle_id = %fix.vehicle_id, zone_id = %zone.id, "Duplicate violation suppressed");
                }
            }
        }

        Ok(violations)
    }

    async fn candidate_zones(&self, fix: &GpsFix) -> Result<(Vec<Arc<Zone>>, DetectionSource), DetectionError> {
        let snapshot = self.store.current_snapshot();
        if !snapshot.is_empty() {
            return Ok((
                snapshot.containing(fix.longitude, fix.latitude),
                DetectionSource::Snapshot,
            ));
        }

        Counters::bump(&self.counters.fallback);
        tracing::debug!(vehicle_id = %fix.vehicle_id, "Zone snapshot empty, querying source directly");
        self.store.trigger_background_refresh();

        let timeout = self.config.fallback_timeout;
        let query = self.source.find_zones_containing(fix.longitude, fix.latitude);
        let mut zones = match tokio::time::timeout(timeout, query).await {
            Ok(Ok(zones)) => zones,
            Ok(Err(e)) => {
                Counters::bump(&self.counters.failed);
                tracing::error!(vehicle_id = %fix.vehicle_id, error = %e, "Fallback zone query failed");
                return Err(DetectionError::SourceUnavailable(e));
            }
            Err(_) => {
                Counters::bump(&self.counters.failed);
                tracing::error!(vehicle_id = %fix.vehicle_id, timeout_ms = timeout.as_millis() as u64, "Fallback zone query timed out");
                return Err(DetectionError::FallbackTimeout(timeout));
            }
        };

        zones.retain(|z| z.active);
        zones.sort_by_key(|z| z.id);
        zones.dedup_by_key(|z| z.id);
        Ok((zones.into_iter().map(Arc::new).collect(), DetectionSource::Fallback))
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.store.stats().await
    }

    pub async fn force_refresh(&self) -> Result<usize, SourceError> {
        tracing::info!("Forcing zone snapshot refresh");
        self.store.refresh().await
    }

    pub async fn invalidate_zone(&self, id: ZoneId) -> bool {
        self.store.invalidate_zone(id).await
    }

    pub async fn refresh_zone(&self, id: ZoneId) -> Result<ZoneChange, SourceError> {
        self.store.refresh_zone(id).await
    }

    pub async fn clear_cache(&self) {
        self.store.clear().await
    }

    /// Active zones as the source currently reports them.
    pub async fn active_zones(&self) -> Result<Vec<Zone>, SourceError> {
        self.source.list_active_zones().await
    }

    /// Active zones within `radius_m` meters of the position, nearest first.
    /// Always asks the source; a position or radius that cannot match gives
    /// an empty list without a query.
    pub async fn zones_nearby(&self, lat: f64, lon: f64, radius_m: f64) -> Result<Vec<Zone>, SourceError> {
        let in_range = (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon);
        if !in_range || !radius_m.is_finite() || radius_m < 0.0 {
            tracing::debug!(lat, lon, radius_m, "Ignoring nearby-zone lookup with unusable input");
            return Ok(Vec::new());
        }
        self.source.find_zones_near(lon, lat, radius_m).await
    }

    pub async fn zones_by_severity(&self, severity: Severity) -> Result<Vec<Zone>, SourceError> {
        self.source.list_active_by_severity(severity).await
    }

    pub fn counters(&self) -> DetectionCounters {
        let c = &self.counters;
        DetectionCounters {
            checked: c.checked.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            fallback: c.fallback.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            emitted: c.emitted.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }
}
