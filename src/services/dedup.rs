use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::models::zone::ZoneId;

type DedupKey = (String, ZoneId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Emit,
    Suppress,
}

impl DedupDecision {
    pub fn is_emit(&self) -> bool {
        matches!(self, DedupDecision::Emit)
    }
}

/// Suppresses repeat violations for the same vehicle and zone.
///
/// A violation at event time `at` is emitted when no earlier one was recorded
/// for the pair, or when `at` is more than `window` after the last recorded
/// event. Fixes at or before the last recorded event are always suppressed
/// and never move the recorded time backwards.
///
/// Entries outlive their window by `grace`, the furthest a valid fix may lag
/// or lead the wall clock, so a late fix still finds the entry it needs.
pub struct ViolationDeduplicator {
    window: Duration,
    grace: Duration,
    last_seen: DashMap<DedupKey, DateTime<Utc>>,
    soft_capacity: usize,
}

impl ViolationDeduplicator {
    pub fn new(window: Duration, grace: Duration, soft_capacity: usize) -> Self {
        Self {
            window,
            grace: grace.max(Duration::zero()),
            last_seen: DashMap::new(),
            soft_capacity,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Read-only check; does not reserve the slot.
    pub fn should_suppress(&self, vehicle_id: &str, zone_id: ZoneId, at: DateTime<Utc>) -> bool {
        let key = (vehicle_id.to_string(), zone_id);
        match self.last_seen.get(&key) {
            Some(last) => !self.is_new_violation(*last, at),
            None => false,
        }
    }

    /// Records `at` for the pair unless a later event is already recorded.
    pub fn record(&self, vehicle_id: &str, zone_id: ZoneId, at: DateTime<Utc>) {
        self.last_seen
            .entry((vehicle_id.to_string(), zone_id))
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }

    /// Decides and records in one step. Of any number of concurrent callers
    /// for the same pair and time window, exactly one gets `Emit`.
    pub fn check_and_record(&self, vehicle_id: &str, zone_id: ZoneId, at: DateTime<Utc>) -> DedupDecision {
        let decision = match self.last_seen.entry((vehicle_id.to_string(), zone_id)) {
            Entry::Vacant(slot) => {
                slot.insert(at);
                DedupDecision::Emit
            }
            Entry::Occupied(mut slot) => {
                if self.is_new_violation(*slot.get(), at) {
                    slot.insert(at);
                    DedupDecision::Emit
                } else {
                    DedupDecision::Suppress
                }
            }
        };

        // Entry guard is released above; sweeping takes shard locks.
        // `at` may lead the wall clock by up to `grace`.
        if decision.is_emit() && self.last_seen.len() > self.soft_capacity {
            let evicted = self.sweep(at - self.grace);
            tracing::debug!(evicted, "Dedup table over soft capacity, swept expired entries");
        }

        decision
    }

    /// Drops entries whose window plus grace has closed by `now`. Returns how
    /// many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.last_seen.len();
        let keep_for = self.window + self.grace;
        self.last_seen.retain(|_, last| *last + keep_for >= now);
        before.saturating_sub(self.last_seen.len())
    }

    pub fn last_recorded(&self, vehicle_id: &str, zone_id: ZoneId) -> Option<DateTime<Utc>> {
        self.last_seen
            .get(&(vehicle_id.to_string(), zone_id))
            .map(|last| *last)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    pub fn clear(&self) {
        self.last_seen.clear();
    }

    pub fn spawn_sweeper(
        self: Arc<Self>,
        clock: Arc<dyn Clock>,
        period: std::time::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.sweep(clock.now());
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = self.len(), "Swept expired dedup entries");
                        }
                    }
                }
            }
        })
    }

    fn is_new_violation(&self, last: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        at > last && at - last > self.window
    }
}
