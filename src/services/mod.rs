pub mod cache;
pub mod dedup;
pub mod detection;
pub mod snapshot;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{database, Settings};
use crate::repository::{PostgisZoneSource, ZoneSource};

use self::cache::{RedisZoneCache, SnapshotCache};
use self::dedup::ViolationDeduplicator;
use self::detection::{DetectionConfig, DetectionService};
use self::snapshot::ZoneSnapshotStore;

/// Knobs for assembling the engine, independent of where they were loaded from.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub detection: DetectionConfig,
    pub refresh_interval: Duration,
    pub refresh_timeout: Duration,
    pub dedup_window: chrono::Duration,
    pub dedup_sweep_interval: Duration,
    pub dedup_soft_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            refresh_interval: Duration::from_secs(1800),
            refresh_timeout: Duration::from_secs(30),
            dedup_window: chrono::Duration::seconds(300),
            dedup_sweep_interval: Duration::from_secs(60),
            dedup_soft_capacity: 100_000,
        }
    }
}

impl From<&Settings> for EngineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            detection: settings.detection_config(),
            refresh_interval: settings.refresh_interval(),
            refresh_timeout: settings.refresh_timeout(),
            dedup_window: settings.dedup_window(),
            dedup_sweep_interval: settings.dedup_sweep_interval(),
            dedup_soft_capacity: settings.dedup_soft_capacity,
        }
    }
}

pub struct AppState {
    pub source: Arc<dyn ZoneSource>,
    pub store: Arc<ZoneSnapshotStore>,
    pub dedup: Arc<ViolationDeduplicator>,
    pub detection: Arc<DetectionService>,
    pub clock: Arc<dyn Clock>,
    pub options: EngineOptions,
}

impl AppState {
    pub fn new(
        source: Arc<dyn ZoneSource>,
        cache: Option<Arc<dyn SnapshotCache>>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Self {
        let store = Arc::new(ZoneSnapshotStore::new(
            Arc::clone(&source),
            cache,
            Arc::clone(&clock),
            options.refresh_timeout,
        ));
        // A valid fix can trail the wall clock by max_age or lead it by the skew.
        let policy = &options.detection.fix_policy;
        let dedup = Arc::new(ViolationDeduplicator::new(
            options.dedup_window,
            policy.max_age.max(policy.max_clock_skew),
            options.dedup_soft_capacity,
        ));
        let detection = Arc::new(DetectionService::new(
            Arc::clone(&store),
            Arc::clone(&source),
            Arc::clone(&dedup),
            Arc::clone(&clock),
            options.detection.clone(),
        ));

        Self {
            source,
            store,
            dedup,
            detection,
            clock,
            options,
        }
    }

    /// Production wiring: PostGIS source, optional Redis cache, system clock.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let pool = database::create_pool(&settings.database_url, settings.db_max_connections).await?;
        let source: Arc<dyn ZoneSource> = Arc::new(PostgisZoneSource::new(pool));

        let cache: Option<Arc<dyn SnapshotCache>> = match &settings.redis_url {
            Some(url) if !url.trim().is_empty() => {
                tracing::info!("Using redis as shared zone cache");
                Some(Arc::new(RedisZoneCache::new(url, settings.cache_ttl_secs)?))
            }
            _ => None,
        };

        Ok(Self::new(source, cache, Arc::new(SystemClock), EngineOptions::from(settings)))
    }

    pub async fn warm_up(&self) -> usize {
        self.store.warm_up().await
    }

    /// Starts the scheduled refresh and the dedup sweeper. Both stop when
    /// `shutdown` is cancelled.
    pub fn spawn_background(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            Arc::clone(&self.store)
                .spawn_scheduled_refresh(self.options.refresh_interval, shutdown.child_token()),
            Arc::clone(&self.dedup).spawn_sweeper(
                Arc::clone(&self.clock),
                self.options.dedup_sweep_interval,
                shutdown.child_token(),
            ),
        ]
    }
}
