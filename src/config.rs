use chrono::Duration;
use std::str::FromStr;

use crate::errors::ZoneError;
use crate::grid::GridConfig;
use crate::models::Coordinate;
use crate::services::contour::ContourConfig;
use crate::services::observations::OPEN_METEO_URL;
use crate::services::radar::{RainViewerSettings, RAINVIEWER_MAPS_URL, RAINVIEWER_TILE_HOST};
use crate::services::resolver::{
    ResolverConfig, DEFAULT_NEGATIVE_TTL_SECS, DEFAULT_SEARCH_RADIUS_DEG, DEFAULT_ZONE_TTL_SECS,
    DEFAULT_ZOOM,
};
use crate::services::sampler::SamplerConfig;

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres cache when set, in-memory cache otherwise.
    pub database_url: Option<String>,
    pub radar_maps_url: String,
    pub radar_tile_host: String,
    pub user_agent: String,
    pub observation_url: String,
    pub grid_step: f64,
    pub radar_zoom: u8,
    pub search_radius_deg: f64,
    pub zone_ttl_secs: i64,
    pub negative_ttl_secs: i64,
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
    /// Hot points kept warm by the `warm` command.
    pub warm_points: Vec<Coordinate>,
    pub warm_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ZoneError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ZoneError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            radar_maps_url: lookup("RADAR_MAPS_URL")
                .unwrap_or_else(|| RAINVIEWER_MAPS_URL.to_string()),
            radar_tile_host: lookup("RADAR_TILE_HOST")
                .unwrap_or_else(|| RAINVIEWER_TILE_HOST.to_string()),
            user_agent: lookup("RADAR_USER_AGENT").unwrap_or_else(|| {
                format!("rain-zones/{}", env!("CARGO_PKG_VERSION"))
            }),
            observation_url: lookup("OBSERVATION_URL")
                .unwrap_or_else(|| OPEN_METEO_URL.to_string()),
            grid_step: parse_var(&lookup, "GRID_STEP", 0.05)?,
            radar_zoom: parse_var(&lookup, "RADAR_ZOOM", DEFAULT_ZOOM)?,
            search_radius_deg: parse_var(&lookup, "SEARCH_RADIUS_DEG", DEFAULT_SEARCH_RADIUS_DEG)?,
            zone_ttl_secs: parse_var(&lookup, "ZONE_TTL_SECS", DEFAULT_ZONE_TTL_SECS)?,
            negative_ttl_secs: parse_var(&lookup, "NEGATIVE_TTL_SECS", DEFAULT_NEGATIVE_TTL_SECS)?,
            fetch_concurrency: parse_var(&lookup, "FETCH_CONCURRENCY", 5)?,
            fetch_timeout_secs: parse_var(&lookup, "FETCH_TIMEOUT_SECS", 10)?,
            warm_points: match lookup("WARM_POINTS") {
                Some(raw) => parse_points(&raw)?,
                None => Vec::new(),
            },
            warm_interval_secs: parse_var(&lookup, "WARM_INTERVAL_SECS", 600)?,
        };

        if config.zone_ttl_secs <= 0 || config.negative_ttl_secs <= 0 {
            return Err(ZoneError::InvalidInput(
                "ZONE_TTL_SECS and NEGATIVE_TTL_SECS must be positive".to_string(),
            ));
        }
        // Validates the step early.
        config.grid()?;
        Ok(config)
    }

    pub fn grid(&self) -> Result<GridConfig, ZoneError> {
        GridConfig::from_step(self.grid_step)
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn radar_settings(&self) -> RainViewerSettings {
        RainViewerSettings {
            maps_url: self.radar_maps_url.clone(),
            tile_host: self.radar_tile_host.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.fetch_timeout(),
            ..RainViewerSettings::default()
        }
    }

    pub fn sampler(&self) -> SamplerConfig {
        SamplerConfig {
            max_concurrent_fetches: self.fetch_concurrency.max(1),
            fetch_timeout: self.fetch_timeout(),
            ..SamplerConfig::default()
        }
    }

    /// Contour settings; a lone raining cell is padded by half a grid step.
    pub fn contour(&self) -> ContourConfig {
        ContourConfig {
            degenerate_padding: self.grid_step / 2.0,
            ..ContourConfig::default()
        }
    }

    pub fn resolver(&self) -> Result<ResolverConfig, ZoneError> {
        Ok(ResolverConfig {
            grid: self.grid()?,
            zoom: self.radar_zoom,
            search_radius_deg: self.search_radius_deg,
            zone_ttl: Duration::seconds(self.zone_ttl_secs),
            negative_ttl: Duration::seconds(self.negative_ttl_secs),
            contour: self.contour(),
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ZoneError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ZoneError::InvalidInput(format!("{} must be valid: {}", name, e))),
        None => Ok(default),
    }
}

/// Parse `"lat,lng;lat,lng"` into validated coordinates.
pub fn parse_points(raw: &str) -> Result<Vec<Coordinate>, ZoneError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| -> Result<Coordinate, ZoneError> {
            let (lat, lng) = pair.split_once(',').ok_or_else(|| {
                ZoneError::InvalidInput(format!("expected 'lat,lng', got '{}'", pair))
            })?;
            let parse = |v: &str| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|e| ZoneError::InvalidInput(format!("bad coordinate '{}': {}", v, e)))
            };
            Coordinate::new(parse(lat)?, parse(lng)?)
        })
        .collect()
}
