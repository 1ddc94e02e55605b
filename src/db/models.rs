use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::errors::ZoneError;
use crate::models::{RainZone, ZoneCacheEntry, ZoneGeometry, ZoneMetadata};

/// A row of `rain_zones`. Geometry and metadata are stored as JSONB.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // Bounds columns are only used by the SQL pre-filter
pub struct ZoneRow {
    pub zone_key: String,
    pub label: Option<String>,
    pub is_raining: bool,
    pub geometry: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<ZoneRow> for ZoneCacheEntry {
    type Error = ZoneError;

    fn try_from(row: ZoneRow) -> Result<Self, Self::Error> {
        let geometry: ZoneGeometry = serde_json::from_value(row.geometry).map_err(|e| {
            ZoneError::DecodeError(format!("zone {} geometry: {}", row.zone_key, e))
        })?;
        let metadata: Option<ZoneMetadata> = row
            .metadata
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ZoneError::DecodeError(format!("zone {} metadata: {}", row.zone_key, e)))?;

        let zone = RainZone {
            key: Some(row.zone_key),
            label: row.label,
            geometry,
            generated_at: row.generated_at,
            expires_at: row.expires_at,
            metadata,
        };
        Ok(ZoneCacheEntry {
            zone,
            is_raining: row.is_raining,
            expires_at: row.expires_at,
        })
    }
}
