//! Background cache warmer.
//!
//! Keeps zones for a fixed set of hot points fresh so feed requests hit the
//! cache. Each cycle purges expired zones, re-resolves every point, then
//! sleeps until shortly after the earliest zone expiry (bounded by the
//! configured interval).
//!
//! State is in-memory (`Arc<RwLock<WarmerState>>`); a snapshot is handed to
//! the caller after every cycle.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::Coordinate;
use crate::services::resolver::{Resolution, ZoneResolver};

/// Buffer added after the earliest zone expiry before waking (seconds).
const WARMER_WAKEUP_BUFFER_SECS: i64 = 5;

/// Minimum sleep between cycles (seconds).
const WARMER_MIN_SLEEP_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Warmer state
// ---------------------------------------------------------------------------

/// Outcome of the last resolution of one hot point.
#[derive(Debug, Clone, Serialize)]
pub struct PointWarmStatus {
    pub latitude: f64,
    pub longitude: f64,
    /// "raining", "not_raining" or "error"
    pub last_result: String,
    pub zone_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmerState {
    pub active: bool,
    pub next_wakeup_at: Option<DateTime<Utc>>,
    pub last_cycle_completed_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: Option<u64>,
    pub total_cycles: u64,
    pub last_purged: u64,
    pub points: Vec<PointWarmStatus>,
}

impl WarmerState {
    pub fn new() -> Self {
        Self {
            active: true,
            next_wakeup_at: None,
            last_cycle_completed_at: None,
            last_cycle_duration_ms: None,
            total_cycles: 0,
            last_purged: 0,
            points: Vec::new(),
        }
    }
}

impl Default for WarmerState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedWarmerState = Arc<RwLock<WarmerState>>;

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

/// Run warm cycles forever, sleeping between them. `on_cycle` receives a
/// snapshot of the state after each cycle.
pub async fn run_warmer<F>(
    resolver: Arc<ZoneResolver>,
    points: Vec<Coordinate>,
    interval_secs: u64,
    state: SharedWarmerState,
    on_cycle: F,
) where
    F: Fn(&WarmerState) + Send,
{
    tracing::info!(
        "Cache warmer started for {} points, interval {}s",
        points.len(),
        interval_secs
    );

    loop {
        let sleep_secs = run_warm_cycle(&resolver, &points, interval_secs, &state).await;
        let snapshot = state.read().await.clone();
        on_cycle(&snapshot);
        tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
    }
}

/// One purge + re-resolve pass. Returns the number of seconds to sleep.
pub async fn run_warm_cycle(
    resolver: &ZoneResolver,
    points: &[Coordinate],
    interval_secs: u64,
    state: &SharedWarmerState,
) -> u64 {
    let cycle_start = Utc::now();

    let purged = match resolver.cache().purge_expired().await {
        Ok(n) => {
            if n > 0 {
                tracing::info!("Warmer: purged {} expired zones", n);
            }
            n
        }
        Err(e) => {
            tracing::error!("Warmer: failed to purge expired zones: {}", e);
            0
        }
    };

    let mut statuses = Vec::with_capacity(points.len());
    for &point in points {
        statuses.push(warm_point(resolver, point).await);
    }

    let expiries: Vec<DateTime<Utc>> = statuses.iter().filter_map(|s| s.expires_at).collect();
    let now = Utc::now();
    let sleep_secs = compute_sleep_secs(now, &expiries, interval_secs);
    let duration_ms = (now - cycle_start).num_milliseconds().max(0) as u64;

    let raining = statuses.iter().filter(|s| s.last_result == "raining").count();
    let failed = statuses.iter().filter(|s| s.last_result == "error").count();
    tracing::info!(
        "Warmer: cycle done in {}ms, {} raining, {} errors, next in {}s",
        duration_ms,
        raining,
        failed,
        sleep_secs
    );

    let mut s = state.write().await;
    s.points = statuses;
    s.last_purged = purged;
    s.total_cycles += 1;
    s.last_cycle_completed_at = Some(now);
    s.last_cycle_duration_ms = Some(duration_ms);
    s.next_wakeup_at = Some(now + Duration::seconds(sleep_secs as i64));

    sleep_secs
}

async fn warm_point(resolver: &ZoneResolver, point: Coordinate) -> PointWarmStatus {
    let mut status = PointWarmStatus {
        latitude: point.latitude,
        longitude: point.longitude,
        last_result: "not_raining".to_string(),
        zone_key: None,
        expires_at: None,
        error: None,
    };

    match resolver.resolve(point).await {
        Ok(Resolution::Raining(zone)) => {
            status.last_result = "raining".to_string();
            status.zone_key = zone.key;
            status.expires_at = Some(zone.expires_at);
        }
        Ok(Resolution::NotRaining) => {}
        Err(e) => {
            tracing::warn!(
                "Warmer: resolve failed for ({}, {}): {}",
                point.latitude,
                point.longitude,
                e
            );
            status.last_result = "error".to_string();
            status.error = Some(e.to_string());
        }
    }
    status
}

/// Seconds until just after the earliest expiry, clamped to
/// `[WARMER_MIN_SLEEP_SECS, interval_secs]`.
pub fn compute_sleep_secs(
    now: DateTime<Utc>,
    expiries: &[DateTime<Utc>],
    interval_secs: u64,
) -> u64 {
    let max = interval_secs.max(WARMER_MIN_SLEEP_SECS);
    match expiries.iter().min() {
        Some(&earliest) => {
            let until = (earliest - now).num_seconds() + WARMER_WAKEUP_BUFFER_SECS;
            (until.max(0) as u64).clamp(WARMER_MIN_SLEEP_SECS, max)
        }
        None => max,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
