use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::ZoneRow;

/// Parameters for inserting or replacing a cached zone.
pub struct UpsertZoneParams<'a> {
    pub zone_key: &'a str,
    pub label: Option<&'a str>,
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

/// Insert a zone, replacing any existing row with the same key.
pub async fn upsert_zone(pool: &PgPool, params: UpsertZoneParams<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO rain_zones (
            zone_key, label, is_raining, geometry, metadata,
            min_lat, max_lat, min_lng, max_lng,
            generated_at, expires_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
        ON CONFLICT (zone_key) DO UPDATE SET
            label = EXCLUDED.label,
            is_raining = EXCLUDED.is_raining,
            geometry = EXCLUDED.geometry,
            metadata = EXCLUDED.metadata,
            min_lat = EXCLUDED.min_lat,
            max_lat = EXCLUDED.max_lat,
            min_lng = EXCLUDED.min_lng,
            max_lng = EXCLUDED.max_lng,
            generated_at = EXCLUDED.generated_at,
            expires_at = EXCLUDED.expires_at,
            updated_at = NOW()",
    )
    .bind(params.zone_key)
    .bind(params.label)
    .bind(params.is_raining)
    .bind(params.geometry)
    .bind(params.metadata)
    .bind(params.min_lat)
    .bind(params.max_lat)
    .bind(params.min_lng)
    .bind(params.max_lng)
    .bind(params.generated_at)
    .bind(params.expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Live zones whose bounding box contains the point, freshest first.
/// Exact polygon containment is checked by the caller.
pub async fn find_live_candidates(
    pool: &PgPool,
    latitude: f64,
    longitude: f64,
    now: DateTime<Utc>,
) -> Result<Vec<ZoneRow>, sqlx::Error> {
    sqlx::query_as::<_, ZoneRow>(
        "SELECT zone_key, label, is_raining, geometry, metadata,
                min_lat, max_lat, min_lng, max_lng, generated_at, expires_at
         FROM rain_zones
         WHERE expires_at > $3
           AND min_lat <= $1 AND max_lat >= $1
           AND min_lng <= $2 AND max_lng >= $2
         ORDER BY generated_at DESC",
    )
    .bind(latitude)
    .bind(longitude)
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Delete expired zones. Returns the number of rows removed.
pub async fn purge_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM rain_zones WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
