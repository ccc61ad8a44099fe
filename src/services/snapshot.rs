use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::SourceError;
use crate::models::zone::{Zone, ZoneId};
use crate::repository::ZoneSource;
use crate::services::cache::SnapshotCache;

/// Immutable, versioned set of active zones.
///
/// Zones are keyed by id so iteration, and therefore detection output, is
/// ordered deterministically.
#[derive(Debug, Clone)]
pub struct ZoneSnapshot {
    version: u64,
    built_at: DateTime<Utc>,
    zones: BTreeMap<ZoneId, Arc<Zone>>,
    source_count: Option<usize>,
}

impl ZoneSnapshot {
    pub fn empty(version: u64, built_at: DateTime<Utc>) -> Self {
        Self {
            version,
            built_at,
            zones: BTreeMap::new(),
            source_count: None,
        }
    }

    /// Keeps active zones with valid geometry and drops the rest with a warning.
    pub fn from_zones(
        version: u64,
        built_at: DateTime<Utc>,
        zones: Vec<Zone>,
        source_count: Option<usize>,
    ) -> Self {
        let zones = zones
            .into_iter()
            .filter(admit)
            .map(|zone| (zone.id, Arc::new(zone)))
            .collect();

        Self {
            version,
            built_at,
            zones,
            source_count,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Number of zones the source reported when this snapshot was built.
    pub fn source_count(&self) -> Option<usize> {
        self.source_count
    }

    pub fn get(&self, id: ZoneId) -> Option<&Arc<Zone>> {
        self.zones.get(&id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values()
    }

    pub fn ids(&self) -> Vec<ZoneId> {
        self.zones.keys().copied().collect()
    }

    /// Every zone whose polygon contains (lon, lat), in id order.
    pub fn containing(&self, lon: f64, lat: f64) -> Vec<Arc<Zone>> {
        self.zones
            .values()
            .filter(|zone| zone.contains(lon, lat))
            .cloned()
            .collect()
    }

    fn with_zone(&self, version: u64, built_at: DateTime<Utc>, zone: Arc<Zone>) -> Self {
        let mut zones = self.zones.clone();
        zones.insert(zone.id, zone);
        Self {
            version,
            built_at,
            zones,
            source_count: None,
        }
    }

    fn without_zone(&self, version: u64, built_at: DateTime<Utc>, id: ZoneId) -> Self {
        let mut zones = self.zones.clone();
        zones.remove(&id);
        Self {
            version,
            built_at,
            zones,
            source_count: None,
        }
    }
}

fn admit(zone: &Zone) -> bool {
    if !zone.active {
        tracing::debug!(zone_id = %zone.id, "Skipping inactive zone");
        return false;
    }
    match zone.validate() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(zone_id = %zone.id, name = %zone.name, error = %e, "Skipping zone with invalid geometry");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub cached_count: usize,
    pub source_count: Option<usize>,
    pub healthy: bool,
    pub coverage_percent: f64,
    pub snapshot_version: u64,
}

impl CacheStats {
    pub fn new(cached_count: usize, source_count: Option<usize>, snapshot_version: u64) -> Self {
        let healthy = cached_count > 0 && source_count == Some(cached_count);
        // Cached zones as a percentage of the source's active zones.
        let coverage_percent = match source_count {
            Some(0) | None => 0.0,
            Some(total) => cached_count as f64 / total as f64 * 100.0,
        };
        Self {
            cached_count,
            source_count,
            healthy,
            coverage_percent,
            snapshot_version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneChange {
    Upserted,
    Removed,
    /// The snapshot was empty, so a full rebuild ran instead.
    Rebuilt,
}

/// Holds the published zone snapshot and keeps it in step with the source.
///
/// Readers clone an `Arc` under a lock that is only ever held for a pointer
/// copy or store. Everything that rebuilds and swaps the snapshot goes
/// through `refresh_lock`, so at most one rebuild runs at a time.
pub struct ZoneSnapshotStore {
    source: Arc<dyn ZoneSource>,
    cache: Option<Arc<dyn SnapshotCache>>,
    clock: Arc<dyn Clock>,
    current: RwLock<Arc<ZoneSnapshot>>,
    refresh_lock: Arc<Mutex<()>>,
    versions: AtomicU64,
    source_timeout: Duration,
}

impl ZoneSnapshotStore {
    pub fn new(
        source: Arc<dyn ZoneSource>,
        cache: Option<Arc<dyn SnapshotCache>>,
        clock: Arc<dyn Clock>,
        source_timeout: Duration,
    ) -> Self {
        let initial = ZoneSnapshot::empty(0, clock.now());
        Self {
            source,
            cache,
            clock,
            current: RwLock::new(Arc::new(initial)),
            refresh_lock: Arc::new(Mutex::new(())),
            versions: AtomicU64::new(1),
            source_timeout,
        }
    }

    pub fn current_snapshot(&self) -> Arc<ZoneSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Populates the first snapshot. Never fails: when neither the source nor
    /// the shared cache can provide zones, an explicitly empty snapshot is
    /// published and detection runs on the fallback path.
    pub async fn warm_up(&self) -> usize {
        let _guard = self.refresh_lock.lock().await;
        let started = Instant::now();
        tracing::info!("Starting zone snapshot warm-up");

        match self.fetch_active().await {
            Ok(zones) => {
                let count = self.rebuild(zones).await;
                tracing::info!(
                    zones = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Zone snapshot warm-up completed"
                );
                count
            }
            Err(e) => {
                tracing::error!(error = %e, "Zone source unavailable during warm-up");
                if let Some(count) = self.restore_from_cache().await {
                    return count;
                }
                self.publish(ZoneSnapshot::empty(self.next_version(), self.clock.now()));
                tracing::warn!("Serving with an empty zone snapshot until the next refresh");
                0
            }
        }
    }

    /// Rebuilds from the source. On failure the previous snapshot stays published.
    pub async fn refresh(&self) -> Result<usize, SourceError> {
        let _guard = self.refresh_lock.lock().await;
        let zones = self.fetch_active().await?;
        Ok(self.rebuild(zones).await)
    }

    /// Starts a refresh on the runtime unless one is already running.
    pub fn trigger_background_refresh(self: &Arc<Self>) -> bool {
        let Ok(guard) = Arc::clone(&self.refresh_lock).try_lock_owned() else {
            tracing::debug!("Zone refresh already in progress, not triggering another");
            return false;
        };

        let store = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            match store.fetch_active().await {
                Ok(zones) => {
                    let count = store.rebuild(zones).await;
                    tracing::info!(zones = count, "Background zone refresh completed");
                }
                Err(e) => tracing::warn!(error = %e, "Background zone refresh failed"),
            }
        });
        true
    }

    /// Refreshes every `period` until `shutdown` fires. The first refresh
    /// happens one period after start; a failed tick is not retried early.
    pub fn spawn_scheduled_refresh(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Scheduled zone refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        tracing::info!("Starting scheduled zone refresh");
                        match self.refresh().await {
                            Ok(count) => tracing::info!(zones = count, "Scheduled zone refresh completed"),
                            Err(e) => tracing::error!(error = %e, "Scheduled zone refresh failed, keeping previous snapshot"),
                        }
                    }
                }
            }
        })
    }

    /// Re-reads one zone from the source and patches it into the snapshot.
    pub async fn refresh_zone(&self, id: ZoneId) -> Result<ZoneChange, SourceError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.current_snapshot();

        // Patching an empty snapshot would publish a partial zone set.
        if current.is_empty() {
            let zones = self.fetch_active().await?;
            self.rebuild(zones).await;
            return Ok(ZoneChange::Rebuilt);
        }

        let fetched = self.with_timeout(self.source.find_zone(id)).await?;
        let now = self.clock.now();

        match fetched {
            Some(zone) if admit(&zone) => {
                let zone = Arc::new(zone);
                self.publish(current.with_zone(self.next_version(), now, Arc::clone(&zone)));
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.upsert_zone(&zone).await {
                        tracing::warn!(zone_id = %id, error = %e, "Failed to write zone to shared cache");
                    }
                }
                tracing::info!(zone_id = %id, "Refreshed cached zone");
                Ok(ZoneChange::Upserted)
            }
            _ => {
                self.drop_zone(&current, id, now).await;
                tracing::info!(zone_id = %id, "Zone inactive or gone, removed from snapshot");
                Ok(ZoneChange::Removed)
            }
        }
    }

    /// Removes a zone until the next refresh brings it back. Returns whether
    /// it was present.
    pub async fn invalidate_zone(&self, id: ZoneId) -> bool {
        let _guard = self.refresh_lock.lock().await;
        let current = self.current_snapshot();
        let present = self.drop_zone(&current, id, self.clock.now()).await;
        tracing::info!(zone_id = %id, present, "Invalidated cached zone");
        present
    }

    /// Publishes an empty snapshot and empties the shared cache.
    pub async fn clear(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.publish(ZoneSnapshot::empty(self.next_version(), self.clock.now()));
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear().await {
                tracing::warn!(error = %e, "Failed to clear shared zone cache");
            }
        }
        tracing::info!("Cleared zone snapshot");
    }

    pub async fn stats(&self) -> CacheStats {
        let snapshot = self.current_snapshot();
        let source_count = match self.with_timeout(self.source.count_active_zones()).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "Could not count zones at the source");
                None
            }
        };
        CacheStats::new(snapshot.len(), source_count, snapshot.version())
    }

    async fn drop_zone(&self, current: &ZoneSnapshot, id: ZoneId, now: DateTime<Utc>) -> bool {
        let present = current.get(id).is_some();
        if present {
            self.publish(current.without_zone(self.next_version(), now, id));
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove_zone(id).await {
                tracing::warn!(zone_id = %id, error = %e, "Failed to remove zone from shared cache");
            }
        }
        present
    }

    /// Caller must hold `refresh_lock`.
    async fn rebuild(&self, zones: Vec<Zone>) -> usize {
        let reported = zones.len();
        let snapshot = ZoneSnapshot::from_zones(self.next_version(), self.clock.now(), zones, Some(reported));
        let count = snapshot.len();
        if count < reported {
            tracing::warn!(reported, admitted = count, "Some zones were not admitted to the snapshot");
        }

        let cached: Vec<Zone> = snapshot.zones().map(|z| Zone::clone(z)).collect();
        self.publish(snapshot);

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store_zones(&cached).await {
                tracing::warn!(error = %e, "Failed to write zone snapshot to shared cache");
            }
        }
        count
    }

    async fn restore_from_cache(&self) -> Option<usize> {
        let cache = self.cache.as_ref()?;
        match cache.load_zones().await {
            Ok(Some(zones)) => {
                let snapshot = ZoneSnapshot::from_zones(self.next_version(), self.clock.now(), zones, None);
                if snapshot.is_empty() {
                    return None;
                }
                let count = snapshot.len();
                self.publish(snapshot);
                tracing::warn!(zones = count, "Restored zone snapshot from shared cache");
                Some(count)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "Shared zone cache unavailable");
                None
            }
        }
    }

    async fn fetch_active(&self) -> Result<Vec<Zone>, SourceError> {
        self.with_timeout(self.source.list_active_zones()).await
    }

    async fn with_timeout<T>(
        &self,
        query: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        tokio::time::timeout(self.source_timeout, query)
            .await
            .map_err(|_| SourceError::Timeout(self.source_timeout))?
    }

    /// Swaps in `snapshot` and hands back the one it replaced. The write
    /// guard is gone by the time the caller drops the old snapshot, so
    /// freeing its zones never blocks readers.
    fn publish(&self, snapshot: ZoneSnapshot) -> Arc<ZoneSnapshot> {
        tracing::debug!(version = snapshot.version(), zones = snapshot.len(), "Publishing zone snapshot");
        let next = Arc::new(snapshot);
        std::mem::replace(&mut *self.current.write(), next)
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::SeqCst)
    }
}
