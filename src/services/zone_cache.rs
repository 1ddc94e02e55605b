//! Time-expiring, geometry-aware zone cache.
//!
//! Entries are found by spatial containment rather than key equality: a
//! lookup returns the freshest live entry whose outline contains the point.
//! Expired entries are never returned, even before `purge_expired` runs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use geo::Rect;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::queries::{self, UpsertZoneParams};
use crate::errors::ZoneError;
use crate::models::{BoundingBox, Coordinate, RainZone, ZoneCacheEntry};

#[async_trait]
pub trait ZoneCache: Send + Sync {
    /// Insert or replace an entry under its zone key.
    async fn store(&self, entry: ZoneCacheEntry) -> Result<(), ZoneError>;

    /// Cache a raining zone for `ttl` from now. Returns the zone as stored.
    async fn put(&self, zone: RainZone, ttl: Duration) -> Result<RainZone, ZoneError> {
        if ttl <= Duration::zero() {
            return Err(ZoneError::InvalidInput(format!(
                "zone ttl must be positive, got {}s",
                ttl.num_seconds()
            )));
        }
        let mut zone = zone;
        zone.expires_at = Utc::now() + ttl;
        if zone.expires_at <= zone.generated_at {
            return Err(ZoneError::InvalidInput(format!(
                "zone generated at {} would expire at {}",
                zone.generated_at, zone.expires_at
            )));
        }
        if zone.key.is_none() {
            zone.key = Some(entry_key(&zone));
        }
        self.store(ZoneCacheEntry::raining(zone.clone())).await?;
        Ok(zone)
    }

    /// Freshest live entry whose geometry contains `point` (boundary inclusive).
    async fn lookup_containing(
        &self,
        point: Coordinate,
    ) -> Result<Option<ZoneCacheEntry>, ZoneError>;

    /// Remove expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, ZoneError>;
}

/// Key of a zone computed over `bbox` from the radar frame at `timestamp`.
pub fn zone_key(bbox: &BoundingBox, precision: u32, timestamp: i64) -> String {
    let p = precision as usize;
    format!(
        "{:.p$}:{:.p$}:{:.p$}:{:.p$}@{}",
        bbox.min_lat,
        bbox.max_lat,
        bbox.min_lng,
        bbox.max_lng,
        timestamp,
        p = p
    )
}

/// The zone's own key, or one derived from its bounds and generation time.
pub fn entry_key(zone: &RainZone) -> String {
    if let Some(key) = &zone.key {
        return key.clone();
    }
    match zone.geometry.bounding_rect() {
        Some(rect) => format!(
            "{:.6}:{:.6}:{:.6}:{:.6}@{}",
            rect.min().y,
            rect.max().y,
            rect.min().x,
            rect.max().x,
            zone.generated_at.timestamp_millis()
        ),
        None => format!("empty@{}", zone.generated_at.timestamp_millis()),
    }
}

fn rect_contains(rect: &Rect<f64>, point: Coordinate) -> bool {
    point.longitude >= rect.min().x
        && point.longitude <= rect.max().x
        && point.latitude >= rect.min().y
        && point.latitude <= rect.max().y
}

/// Pick the freshest live entry containing `point`.
fn freshest_containing<'a>(
    entries: impl Iterator<Item = &'a ZoneCacheEntry>,
    point: Coordinate,
    now: DateTime<Utc>,
) -> Option<&'a ZoneCacheEntry> {
    entries
        .filter(|e| e.is_live(now) && e.zone.contains(point))
        .max_by_key(|e| e.zone.generated_at)
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedZone {
    bounds: Option<Rect<f64>>,
    entry: ZoneCacheEntry,
}

/// Process-local cache behind a shared `RwLock`. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryZoneCache {
    entries: Arc<RwLock<HashMap<String, CachedZone>>>,
}

impl MemoryZoneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ZoneCache for MemoryZoneCache {
    async fn store(&self, entry: ZoneCacheEntry) -> Result<(), ZoneError> {
        let key = entry_key(&entry.zone);
        let cached = CachedZone {
            bounds: entry.zone.geometry.bounding_rect(),
            entry,
        };
        self.entries.write().await.insert(key, cached);
        Ok(())
    }

    async fn lookup_containing(
        &self,
        point: Coordinate,
    ) -> Result<Option<ZoneCacheEntry>, ZoneError> {
        point.validate()?;
        let now = Utc::now();
        let entries = self.entries.read().await;
        let candidates = entries
            .values()
            .filter(|c| c.bounds.is_some_and(|b| rect_contains(&b, point)))
            .map(|c| &c.entry);
        Ok(freshest_containing(candidates, point, now).cloned())
    }

    async fn purge_expired(&self) -> Result<u64, ZoneError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, c| c.entry.is_live(now));
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Postgres backend
// ---------------------------------------------------------------------------

/// Shared cache in the `rain_zones` table. Bounds are filtered in SQL,
/// exact containment in process.
#[derive(Debug, Clone)]
pub struct PgZoneCache {
    pool: PgPool,
}

impl PgZoneCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ZoneCache for PgZoneCache {
    async fn store(&self, entry: ZoneCacheEntry) -> Result<(), ZoneError> {
        let key = entry_key(&entry.zone);
        let bounds = entry.zone.geometry.bounding_rect().ok_or_else(|| {
            ZoneError::InvalidInput(format!("zone {} has empty geometry", key))
        })?;
        let geometry = serde_json::to_value(&entry.zone.geometry)
            .map_err(|e| ZoneError::DecodeError(format!("zone geometry: {}", e)))?;
        let metadata = entry
            .zone
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ZoneError::DecodeError(format!("zone metadata: {}", e)))?;

        queries::upsert_zone(
            &self.pool,
            UpsertZoneParams {
                zone_key: &key,
                label: entry.zone.label.as_deref(),
                is_raining: entry.is_raining,
                geometry,
                metadata,
                min_lat: bounds.min().y,
                max_lat: bounds.max().y,
                min_lng: bounds.min().x,
                max_lng: bounds.max().x,
                generated_at: entry.zone.generated_at,
                expires_at: entry.expires_at,
            },
        )
        .await?;
        Ok(())
    }

    async fn lookup_containing(
        &self,
        point: Coordinate,
    ) -> Result<Option<ZoneCacheEntry>, ZoneError> {
        point.validate()?;
        let now = Utc::now();
        let rows =
            queries::find_live_candidates(&self.pool, point.latitude, point.longitude, now).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.zone_key.clone();
            match ZoneCacheEntry::try_from(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping unreadable cached zone {}: {}", key, e),
            }
        }
        Ok(freshest_containing(entries.iter(), point, now).cloned())
    }

    async fn purge_expired(&self) -> Result<u64, ZoneError> {
        let removed = queries::purge_expired(&self.pool, Utc::now()).await?;
        Ok(removed)
    }
}
