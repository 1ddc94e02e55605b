//! Per-request rain zone resolution.
//!
//! Cache first; on a miss the radar is sampled around the grid-rounded point,
//! a contour is built around the target and the result is cached. Confirmed
//! dry areas are cached too, for a shorter time.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::errors::ZoneError;
use crate::grid::GridConfig;
use crate::models::{BoundingBox, Coordinate, RainZone, ZoneCacheEntry, ZoneGeometry};
use crate::services::contour::{generate_polygon, ContourConfig};
use crate::services::radar::RadarSource;
use crate::services::sampler::{SamplerConfig, TileSampler};
use crate::services::zone_cache::{zone_key, ZoneCache};

/// Default radar zoom level for sampling.
pub const DEFAULT_ZOOM: u8 = 6;
/// Default half-width (degrees) of the box sampled around a point.
pub const DEFAULT_SEARCH_RADIUS_DEG: f64 = 2.0;
/// Zones live shorter than the radar refresh interval.
pub const DEFAULT_ZONE_TTL_SECS: i64 = 15 * 60;
pub const DEFAULT_NEGATIVE_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub grid: GridConfig,
    pub zoom: u8,
    pub search_radius_deg: f64,
    pub zone_ttl: Duration,
    pub negative_ttl: Duration,
    pub contour: ContourConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig {
                step: 0.05,
                precision: 2,
            },
            zoom: DEFAULT_ZOOM,
            search_radius_deg: DEFAULT_SEARCH_RADIUS_DEG,
            zone_ttl: Duration::seconds(DEFAULT_ZONE_TTL_SECS),
            negative_ttl: Duration::seconds(DEFAULT_NEGATIVE_TTL_SECS),
            contour: ContourConfig::default(),
        }
    }
}

/// Outcome of resolving a point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    NotRaining,
    Raining(RainZone),
}

impl Resolution {
    pub fn is_raining(&self) -> bool {
        matches!(self, Resolution::Raining(_))
    }

    pub fn zone(&self) -> Option<&RainZone> {
        match self {
            Resolution::Raining(zone) => Some(zone),
            Resolution::NotRaining => None,
        }
    }
}

pub struct ZoneResolver {
    cache: Arc<dyn ZoneCache>,
    radar: Arc<dyn RadarSource>,
    sampler: TileSampler,
    config: ResolverConfig,
}

impl ZoneResolver {
    pub fn new(
        cache: Arc<dyn ZoneCache>,
        radar: Arc<dyn RadarSource>,
        sampler_config: SamplerConfig,
        config: ResolverConfig,
    ) -> Self {
        let sampler = TileSampler::new(radar.clone(), sampler_config);
        Self {
            cache,
            radar,
            sampler,
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ZoneCache> {
        &self.cache
    }

    /// Whether it is raining at `point`, with the zone when it is.
    ///
    /// Transport, HTTP and decode failures are returned as errors, never as
    /// `NotRaining`.
    pub async fn resolve(&self, point: Coordinate) -> Result<Resolution, ZoneError> {
        point.validate()?;

        // 1. Cache
        match self.cache.lookup_containing(point).await {
            Ok(Some(entry)) => {
                tracing::debug!(
                    "Zone cache hit for ({}, {}) (raining: {})",
                    point.latitude,
                    point.longitude,
                    entry.is_raining
                );
                return Ok(if entry.is_raining {
                    Resolution::Raining(entry.zone)
                } else {
                    Resolution::NotRaining
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    "Zone cache lookup failed for ({}, {}), computing: {}",
                    point.latitude,
                    point.longitude,
                    e
                );
            }
        }

        // 2. Sample the radar around the grid-rounded point
        let center = self.config.grid.round_point(point);
        let bbox = BoundingBox::around(center, self.config.search_radius_deg)?;
        let timestamp = self.radar.latest_timestamp().await?;
        let key = zone_key(&bbox, self.config.grid.precision, timestamp);

        let grid = match self
            .sampler
            .sample(&bbox, self.config.grid.step, self.config.zoom, timestamp)
            .await
        {
            Ok(grid) => grid,
            Err(e) if e.is_not_raining() => {
                tracing::debug!(
                    "No precipitation around ({}, {})",
                    center.latitude,
                    center.longitude
                );
                self.remember_dry(&bbox, &key).await;
                return Ok(Resolution::NotRaining);
            }
            Err(e) => return Err(e),
        };

        // 3. Contour around the target
        let contour = match generate_polygon(&grid, point, &self.config.contour) {
            Ok(contour) => contour,
            Err(e) if e.is_not_raining() => {
                tracing::debug!(
                    "({}, {}) not raining: {}",
                    point.latitude,
                    point.longitude,
                    e
                );
                return Ok(Resolution::NotRaining);
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let zone = RainZone::new(contour.geometry(), now, now + self.config.zone_ttl)?
            .with_key(key)
            .with_metadata(contour.metadata);

        // 4. Store
        match self.cache.put(zone.clone(), self.config.zone_ttl).await {
            Ok(stored) => {
                tracing::info!(
                    "Cached rain zone {} ({} samples, tightness {:.2})",
                    stored.key.as_deref().unwrap_or("-"),
                    grid.samples().len(),
                    contour.tightness
                );
                Ok(Resolution::Raining(stored))
            }
            Err(e) => {
                tracing::warn!("Failed to cache rain zone, returning uncached: {}", e);
                Ok(Resolution::Raining(zone))
            }
        }
    }

    /// Cache the searched box as dry so co-located callers skip the radar.
    async fn remember_dry(&self, bbox: &BoundingBox, key: &str) {
        let now = Utc::now();
        let zone = match RainZone::new(
            ZoneGeometry::Polygon(bbox.to_polygon()),
            now,
            now + self.config.negative_ttl,
        ) {
            Ok(zone) => zone.with_key(format!("dry:{}", key)),
            Err(e) => {
                tracing::warn!("Skipping negative cache entry: {}", e);
                return;
            }
        };
        if let Err(e) = self.cache.store(ZoneCacheEntry::dry(zone)).await {
            tracing::warn!("Failed to cache dry area {}: {}", key, e);
        }
    }
}
