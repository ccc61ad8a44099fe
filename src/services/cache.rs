use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::CacheError;
use crate::models::zone::{Zone, ZoneId};

const ZONE_KEY_PREFIX: &str = "zone:data:";
const ALL_ZONES_KEY: &str = "zones:active";

/// Shared copy of the published zone set, so other instances and restarts
/// can start warm.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// `None` when nothing is cached.
    async fn load_zones(&self) -> Result<Option<Vec<Zone>>, CacheError>;

    /// Replaces the cached set with `zones`.
    async fn store_zones(&self, zones: &[Zone]) -> Result<(), CacheError>;

    async fn upsert_zone(&self, zone: &Zone) -> Result<(), CacheError>;

    async fn remove_zone(&self, id: ZoneId) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

pub struct RedisZoneCache {
    pool: Pool,
    ttl_secs: u64,
}

impl RedisZoneCache {
    pub fn new(redis_url: &str, ttl_secs: u64) -> anyhow::Result<Self> {
        let cfg = RedisConfig::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;

        Ok(Self { pool, ttl_secs })
    }

    async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(value)?;
        let _: () = conn.set_ex(key, json, self.ttl_secs).await?;
        Ok(())
    }

    fn zone_key(id: ZoneId) -> String {
        format!("{}{}", ZONE_KEY_PREFIX, id)
    }
}

#[async_trait]
impl SnapshotCache for RedisZoneCache {
    async fn load_zones(&self) -> Result<Option<Vec<Zone>>, CacheError> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.smembers(ALL_ZONES_KEY).await?;
        if ids.is_empty() {
            return Ok(None);
        }

        let keys: Vec<String> = ids.iter().map(|id| format!("{}{}", ZONE_KEY_PREFIX, id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut zones = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            match value {
                Some(json) => match serde_json::from_str::<Zone>(&json) {
                    Ok(zone) => zones.push(zone),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Skipping unreadable cached zone"),
                },
                None => tracing::debug!(key = %key, "Cached zone expired"),
            }
        }

        if zones.is_empty() {
            return Ok(None);
        }
        Ok(Some(zones))
    }

    async fn store_zones(&self, zones: &[Zone]) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let previous: Vec<String> = conn.smembers(ALL_ZONES_KEY).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &previous {
            pipe.del(format!("{}{}", ZONE_KEY_PREFIX, id)).ignore();
        }
        pipe.del(ALL_ZONES_KEY).ignore();

        for zone in zones {
            let json = serde_json::to_string(zone)?;
            pipe.cmd("SET")
                .arg(Self::zone_key(zone.id))
                .arg(json)
                .arg("EX")
                .arg(self.ttl_secs)
                .ignore();
            pipe.sadd(ALL_ZONES_KEY, zone.id.to_string()).ignore();
        }
        if !zones.is_empty() {
            pipe.cmd("EXPIRE").arg(ALL_ZONES_KEY).arg(self.ttl_secs).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        tracing::debug!(count = zones.len(), "Wrote zone snapshot to redis");
        Ok(())
    }

    async fn upsert_zone(&self, zone: &Zone) -> Result<(), CacheError> {
        self.set(&Self::zone_key(zone.id), zone).await?;

        let mut conn = self.pool.get().await?;
        let _: () = conn.sadd(ALL_ZONES_KEY, zone.id.to_string()).await?;
        Ok(())
    }

    async fn remove_zone(&self, id: ZoneId) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(Self::zone_key(id))
            .ignore()
            .srem(ALL_ZONES_KEY, id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.store_zones(&[]).await
    }
}

/// Process-local stand-in for the shared cache.
#[derive(Default)]
pub struct MemorySnapshotCache {
    zones: Mutex<BTreeMap<ZoneId, Zone>>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.zones.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotCache for MemorySnapshotCache {
    async fn load_zones(&self) -> Result<Option<Vec<Zone>>, CacheError> {
        let zones = self.zones.lock();
        if zones.is_empty() {
            return Ok(None);
        }
        Ok(Some(zones.values().cloned().collect()))
    }

    async fn store_zones(&self, zones: &[Zone]) -> Result<(), CacheError> {
        let mut cached = self.zones.lock();
        cached.clear();
        cached.extend(zones.iter().map(|z| (z.id, z.clone())));
        Ok(())
    }

    async fn upsert_zone(&self, zone: &Zone) -> Result<(), CacheError> {
        self.zones.lock().insert(zone.id, zone.clone());
        Ok(())
    }

    async fn remove_zone(&self, id: ZoneId) -> Result<(), CacheError> {
        self.zones.lock().remove(&id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.zones.lock().clear();
        Ok(())
    }
}
