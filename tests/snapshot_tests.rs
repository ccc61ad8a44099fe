mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use common::{bowtie, harness, sf_zone, square, t0, wait_until};
use geofence::repository::InMemoryZoneSource;
use geofence::services::cache::{MemorySnapshotCache, SnapshotCache};
use geofence::services::snapshot::{ZoneChange, ZoneSnapshotStore};
use geofence::{ManualClock, SourceError, ZoneId};

#[tokio::test]
async fn test_warm_up_populates_snapshot_and_cache() {
    let h = harness(vec![sf_zone(1), square(2, 0.0, 0.0, 1.0)]);
    assert_eq!(h.state.warm_up().await, 2);

    let snapshot = h.state.store.current_snapshot();
    assert_eq!(snapshot.ids(), vec![ZoneId(1), ZoneId(2)]);
    assert_eq!(snapshot.source_count(), Some(2));
    assert_eq!(h.cache.len(), 2);

    let stats = h.state.store.stats().await;
    assert_eq!(stats.cached_count, 2);
    assert_eq!(stats.source_count, Some(2));
    assert!(stats.healthy);
    assert!((stats.coverage_percent - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_warm_up_survives_source_outage() {
    let h = harness(vec![sf_zone(1)]);
    h.source.set_offline(true);

    assert_eq!(h.state.warm_up().await, 0);
    assert!(h.state.store.current_snapshot().is_empty());

    let stats = h.state.store.stats().await;
    assert_eq!(stats.source_count, None);
    assert!(!stats.healthy);
    assert_eq!(stats.coverage_percent, 0.0);
}

#[tokio::test]
async fn test_warm_restart_from_shared_cache() {
    let cache = Arc::new(MemorySnapshotCache::new());
    let clock = Arc::new(ManualClock::new(t0()));

    let first = Arc::new(InMemoryZoneSource::with_zones([sf_zone(1), square(2, 0.0, 0.0, 1.0)]));
    let store = ZoneSnapshotStore::new(first, Some(cache.clone()), clock.clone(), Duration::from_secs(1));
    assert_eq!(store.warm_up().await, 2);

    let down = Arc::new(InMemoryZoneSource::new());
    down.set_offline(true);
    let restarted = ZoneSnapshotStore::new(down, Some(cache.clone()), clock, Duration::from_secs(1));
    assert_eq!(restarted.warm_up().await, 2);
    assert_eq!(restarted.current_snapshot().source_count(), None);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let h = harness(vec![sf_zone(1)]);
    h.state.warm_up().await;
    let before = h.state.store.current_snapshot();

    h.source.set_offline(true);
    let err = assert_err!(h.state.store.refresh().await);
    assert!(matches!(err, SourceError::Unavailable(_)));

    let after = h.state.store.current_snapshot();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.len(), 1);
}

#[tokio::test]
async fn test_refresh_timeout_keeps_previous_snapshot() {
    let source = Arc::new(InMemoryZoneSource::with_zones([sf_zone(1)]));
    let clock = Arc::new(ManualClock::new(t0()));
    let store = ZoneSnapshotStore::new(source.clone(), None, clock, Duration::from_millis(50));
    store.warm_up().await;

    source.set_latency(Some(Duration::from_millis(500)));
    let err = assert_err!(store.refresh().await);
    assert!(matches!(err, SourceError::Timeout(_)));
    assert_eq!(store.current_snapshot().len(), 1);
}

#[tokio::test]
async fn test_refresh_picks_up_changes() {
    let h = harness(vec![sf_zone(1)]);
    h.state.warm_up().await;
    let v1 = h.state.store.current_snapshot().version();

    h.source.upsert(square(2, 0.0, 0.0, 1.0));
    h.source.set_active(ZoneId(1), false);
    assert_eq!(assert_ok!(h.state.store.refresh().await), 1);

    let snapshot = h.state.store.current_snapshot();
    assert_eq!(snapshot.ids(), vec![ZoneId(2)]);
    assert!(snapshot.version() > v1);
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn test_invalid_zones_are_skipped() {
    let h = harness(vec![sf_zone(1), bowtie(2)]);
    assert_eq!(h.state.warm_up().await, 1);

    let stats = h.state.store.stats().await;
    assert_eq!(stats.cached_count, 1);
    assert_eq!(stats.source_count, Some(2));
    assert!(!stats.healthy);
    assert!((stats.coverage_percent - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_invalidate_zone() {
    let h = harness(vec![sf_zone(1), square(2, 0.0, 0.0, 1.0)]);
    h.state.warm_up().await;

    assert!(h.state.store.invalidate_zone(ZoneId(1)).await);
    assert!(!h.state.store.invalidate_zone(ZoneId(1)).await);
    assert_eq!(h.state.store.current_snapshot().ids(), vec![ZoneId(2)]);

    let cached = assert_ok!(h.cache.load_zones().await).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, ZoneId(2));
}

#[tokio::test]
async fn test_refresh_zone_upserts_and_removes() {
    let h = harness(vec![sf_zone(1), square(2, 0.0, 0.0, 1.0)]);
    h.state.warm_up().await;
    let store = &h.state.store;

    h.source.upsert(square(2, 5.0, 5.0, 1.0));
    assert_eq!(assert_ok!(store.refresh_zone(ZoneId(2)).await), ZoneChange::Upserted);
    let snapshot = store.current_snapshot();
    assert!(snapshot.get(ZoneId(2)).unwrap().contains(5.5, 5.5));
    assert!(!snapshot.get(ZoneId(2)).unwrap().contains(0.5, 0.5));

    h.source.upsert(square(3, 8.0, 8.0, 1.0));
    assert_eq!(assert_ok!(store.refresh_zone(ZoneId(3)).await), ZoneChange::Upserted);
    assert_eq!(store.current_snapshot().len(), 3);

    h.source.set_active(ZoneId(1), false);
    assert_eq!(assert_ok!(store.refresh_zone(ZoneId(1)).await), ZoneChange::Removed);
    h.source.remove(ZoneId(3));
    assert_eq!(assert_ok!(store.refresh_zone(ZoneId(3)).await), ZoneChange::Removed);

    assert_eq!(store.current_snapshot().ids(), vec![ZoneId(2)]);
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn test_refresh_zone_on_empty_snapshot_rebuilds() {
    let h = harness(vec![sf_zone(1), square(2, 0.0, 0.0, 1.0)]);

    assert_eq!(
        assert_ok!(h.state.store.refresh_zone(ZoneId(1)).await),
        ZoneChange::Rebuilt
    );
    assert_eq!(h.state.store.current_snapshot().len(), 2);
}

#[tokio::test]
async fn test_clear_empties_snapshot_and_cache() {
    let h = harness(vec![sf_zone(1)]);
    h.state.warm_up().await;

    h.state.store.clear().await;
    assert!(h.state.store.current_snapshot().is_empty());
    assert!(h.cache.is_empty());
    assert!(assert_ok!(h.cache.load_zones().await).is_none());
}

#[tokio::test]
async fn test_background_refresh_skipped_while_refresh_runs() {
    let h = harness(vec![sf_zone(1)]);
    h.source.set_latency(Some(Duration::from_millis(200)));
    let store = h.state.store.clone();

    let running = tokio::spawn({
        let store = store.clone();
        async move { store.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!store.trigger_background_refresh());
    assert_eq!(assert_ok!(running.await.unwrap()), 1);
    assert_eq!(h.source.list_calls(), 1);

    h.source.set_latency(None);
    assert!(store.trigger_background_refresh());
}

#[tokio::test]
async fn test_scheduled_refresh_runs_until_cancelled() {
    let h = harness(vec![sf_zone(1)]);
    h.state.warm_up().await;
    let store = h.state.store.clone();

    let shutdown = CancellationToken::new();
    let handle = store
        .clone()
        .spawn_scheduled_refresh(Duration::from_millis(20), shutdown.clone());

    h.source.upsert(square(2, 0.0, 0.0, 1.0));
    assert!(wait_until(|| store.current_snapshot().len() == 2).await);

    shutdown.cancel();
    assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await).unwrap();

    let calls = h.source.list_calls();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.source.list_calls(), calls, "no refresh after cancellation");
}
