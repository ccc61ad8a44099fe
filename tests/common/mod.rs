#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use geofence::repository::InMemoryZoneSource;
use geofence::services::cache::MemorySnapshotCache;
use geofence::services::EngineOptions;
use geofence::{AppState, ManualClock, Zone};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Downtown San Francisco block, (37.7749, -122.4194) to (37.7849, -122.4094).
pub fn sf_zone(id: i64) -> Zone {
    Zone::from_ring(
        id,
        "Downtown SF",
        vec![
            (-122.4194, 37.7749),
            (-122.4094, 37.7749),
            (-122.4094, 37.7849),
            (-122.4194, 37.7849),
            (-122.4194, 37.7749),
        ],
    )
    .unwrap()
}

pub fn square(id: i64, x: f64, y: f64, size: f64) -> Zone {
    Zone::from_ring(
        id,
        &format!("zone-{}", id),
        vec![(x, y), (x + size, y), (x + size, y + size), (x, y + size), (x, y)],
    )
    .unwrap()
}

pub fn bowtie(id: i64) -> Zone {
    let mut zone = square(id, 0.0, 0.0, 1.0);
    zone.boundary = geo::Polygon::new(
        geo::LineString::from(vec![(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]),
        Vec::new(),
    );
    zone
}

pub struct Harness {
    pub source: Arc<InMemoryZoneSource>,
    pub cache: Arc<MemorySnapshotCache>,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
}

pub fn harness(zones: Vec<Zone>) -> Harness {
    harness_with(zones, EngineOptions::default())
}

pub fn harness_with(zones: Vec<Zone>, options: EngineOptions) -> Harness {
    let source = Arc::new(InMemoryZoneSource::with_zones(zones));
    let cache = Arc::new(MemorySnapshotCache::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let state = AppState::new(source.clone(), Some(cache.clone()), clock.clone(), options);
    Harness {
        source,
        cache,
        clock,
        state,
    }
}

/// Polls `cond` for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
