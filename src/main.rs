// Rain Zones batch driver v0.1
use chrono::Duration;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rain_zones::config::AppConfig;
use rain_zones::models::{BoundingBox, Coordinate, RainZone, Region};
use rain_zones::services::observations::{any_raining, observation_points, OpenMeteoClient};
use rain_zones::services::radar::{RadarSource, RainViewerClient};
use rain_zones::services::regions::{find_top_regions, region_zones, DEFAULT_REGION_COUNT};
use rain_zones::services::resolver::ZoneResolver;
use rain_zones::services::sampler::TileSampler;
use rain_zones::services::warmer::{run_warmer, SharedWarmerState, WarmerState};
use rain_zones::services::zone_cache::{zone_key, MemoryZoneCache, PgZoneCache, ZoneCache};
use rain_zones::ZoneError;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 1;

#[derive(Debug, Parser)]
#[command(name = "rain-zones", version, about = "Resolve, cache and warm radar rain zones")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Is it raining at a point? Prints the zone when it is.
    Resolve {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
    },
    /// Detect the strongest rain regions around a point and cache their zones.
    Regions {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        #[arg(long, default_value_t = DEFAULT_REGION_COUNT)]
        count: usize,
        #[arg(long, default_value_t = 5)]
        min_cluster_size: usize,
        /// Cluster linking distance in degrees.
        #[arg(long, default_value_t = 0.15)]
        distance: f64,
    },
    /// Cross-check current rain with point observations around a point.
    Observe {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        /// Offset of the surrounding observation points in degrees.
        #[arg(long, default_value_t = 0.25)]
        radius: f64,
    },
    /// Delete expired zones from the cache.
    Purge,
    /// Keep zones for WARM_POINTS fresh until interrupted, printing the warmer
    /// state as one JSON line per cycle.
    Warm,
}

#[derive(Debug, Serialize)]
struct RegionsOutput {
    regions: Vec<Region>,
    zones: Vec<RainZone>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rain_zones=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().expect("Invalid configuration");

    let cache: Arc<dyn ZoneCache> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(DB_POOL_MAX_CONNECTIONS)
                .min_connections(DB_POOL_MIN_CONNECTIONS)
                .connect(url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!()
                .run(&pool)
                .await
                .expect("Failed to run database migrations");

            tracing::info!("Database migrations completed, using Postgres zone cache");
            Arc::new(PgZoneCache::new(pool))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory zone cache");
            Arc::new(MemoryZoneCache::new())
        }
    };

    if let Err(e) = run(cli.command, config, cache).await {
        tracing::error!("Command failed: {}", e);
        std::process::exit(if e.is_retryable() { 75 } else { 1 });
    }
}

async fn run(
    command: Command,
    config: AppConfig,
    cache: Arc<dyn ZoneCache>,
) -> Result<(), ZoneError> {
    let radar: Arc<dyn RadarSource> = Arc::new(RainViewerClient::new(config.radar_settings())?);

    match command {
        Command::Resolve { lat, lng } => {
            let point = Coordinate::new(lat, lng)?;
            let resolver = ZoneResolver::new(cache, radar, config.sampler(), config.resolver()?);
            let resolution = resolver.resolve(point).await?;
            print_json(&resolution)
        }
        Command::Regions {
            lat,
            lng,
            count,
            min_cluster_size,
            distance,
        } => {
            let center = Coordinate::new(lat, lng)?;
            let grid_config = config.grid()?;
            let bbox =
                BoundingBox::around(grid_config.round_point(center), config.search_radius_deg)?;
            let timestamp = radar.latest_timestamp().await?;
            let sampler = TileSampler::new(radar, config.sampler());

            let samples = match sampler
                .sample(&bbox, grid_config.step, config.radar_zoom, timestamp)
                .await
            {
                Ok(grid) => grid.into_samples(),
                Err(e) if e.is_not_raining() => Vec::new(),
                Err(e) => return Err(e),
            };

            let regions = find_top_regions(&samples, count, min_cluster_size, distance)?;
            let ttl = Duration::seconds(config.zone_ttl_secs);
            let base_key = zone_key(&bbox, grid_config.precision, timestamp);
            let now = chrono::Utc::now();
            let fresh = region_zones(&regions, &config.contour(), &base_key, ttl, now)?;
            let mut zones = Vec::with_capacity(fresh.len());
            for zone in fresh {
                zones.push(cache.put(zone, ttl).await?);
            }
            print_json(&RegionsOutput { regions, zones })
        }
        Command::Observe { lat, lng, radius } => {
            let center = Coordinate::new(lat, lng)?;
            let client = OpenMeteoClient::new(
                &config.observation_url,
                &config.user_agent,
                config.fetch_timeout(),
            )?;
            let points = observation_points(center, radius);
            let raining = any_raining(
                &client,
                &points,
                config.fetch_concurrency,
                config.fetch_timeout(),
            )
            .await?;
            print_json(&serde_json::json!({ "raining": raining, "points": points }))
        }
        Command::Purge => {
            let removed = cache.purge_expired().await?;
            tracing::info!("Purged {} expired zones", removed);
            print_json(&serde_json::json!({ "purged": removed }))
        }
        Command::Warm => {
            if config.warm_points.is_empty() {
                return Err(ZoneError::InvalidInput(
                    "WARM_POINTS is empty, nothing to warm".to_string(),
                ));
            }
            let resolver = Arc::new(ZoneResolver::new(
                cache,
                radar,
                config.sampler(),
                config.resolver()?,
            ));
            let state: SharedWarmerState = Arc::new(RwLock::new(WarmerState::new()));
            // One JSON line per cycle on stdout.
            run_warmer(
                resolver,
                config.warm_points.clone(),
                config.warm_interval_secs,
                state,
                |snapshot| match serde_json::to_string(snapshot) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to serialise warmer state: {}", e),
                },
            )
            .await;
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ZoneError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| ZoneError::DecodeError(format!("output serialisation failed: {}", e)))?;
    println!("{}", out);
    Ok(())
}
