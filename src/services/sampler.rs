//! Radar tile sampler.
//!
//! Turns a bounding box into precipitation samples by reading the pixel colour
//! of rendered radar tiles at every grid point. Each distinct tile is fetched
//! once; fetches run concurrently with a bounded fan-out and a per-fetch
//! timeout. A tile that fails to fetch or decode only drops its own points.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ZoneError;
use crate::grid::{generate_grid_points, lat_lng_to_tile, TileId, TILE_SIZE};
use crate::models::{BoundingBox, Coordinate, PrecipitationGrid, PrecipitationSample};
use crate::services::radar::RadarSource;

/// Alpha below which a pixel counts as "no echo".
const TRANSPARENT_ALPHA: u8 = 10;

/// dBZ assigned to full-brightness pixels that match no colour band.
const BRIGHTNESS_MAX_DBZ: f64 = 65.0;

/// Marshall–Palmer Z–R relation: Z = A · R^B.
const MARSHALL_PALMER_A: f64 = 200.0;
const MARSHALL_PALMER_B: f64 = 1.6;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Samples below this rate (mm/hr) are discarded.
    pub min_intensity: f64,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_intensity: 0.1,
            max_concurrent_fetches: 5,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Map a rendered radar pixel to reflectivity (dBZ).
pub fn color_to_dbz(r: u8, g: u8, b: u8, a: u8) -> f64 {
    if a < TRANSPARENT_ALPHA {
        return 0.0;
    }

    // White: extreme echoes
    if r > 230 && g > 230 && b > 230 {
        return 65.0;
    }
    // Red: heavy
    if r > 200 && g < 80 && b < 80 {
        return 50.0;
    }
    // Yellow: moderate-heavy
    if r > 200 && g > 200 && b < 100 {
        return 35.0;
    }
    // Cyan: very light (checked before green/blue, it overlaps both)
    if r < 100 && g > 150 && b > 150 {
        return 15.0;
    }
    // Green: moderate
    if r < 100 && g > 150 && b < 100 {
        return 30.0;
    }
    // Blue: light
    if r < 100 && g < 150 && b > 150 {
        return 20.0;
    }

    let brightness = (r as f64 + g as f64 + b as f64) / (3.0 * 255.0);
    brightness * BRIGHTNESS_MAX_DBZ
}

/// Convert reflectivity to rain rate (mm/hr) with Marshall–Palmer.
pub fn dbz_to_rain_rate(dbz: f64) -> f64 {
    if !dbz.is_finite() || dbz <= 0.0 {
        return 0.0;
    }
    let z = 10f64.powf(dbz / 10.0);
    (z / MARSHALL_PALMER_A).powf(1.0 / MARSHALL_PALMER_B)
}

/// A grid point and the pixel it lands on within its tile.
#[derive(Debug, Clone, Copy)]
struct TilePoint {
    coordinate: Coordinate,
    pixel_x: u32,
    pixel_y: u32,
}

/// Samples radar tiles over a bounding box.
#[derive(Clone)]
pub struct TileSampler {
    source: Arc<dyn RadarSource>,
    config: SamplerConfig,
}

impl TileSampler {
    pub fn new(source: Arc<dyn RadarSource>, config: SamplerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample every grid point of `bbox` from the radar frame at `timestamp`.
    pub async fn sample(
        &self,
        bbox: &BoundingBox,
        grid_step: f64,
        zoom: u8,
        timestamp: i64,
    ) -> Result<PrecipitationGrid, ZoneError> {
        let points = generate_grid_points(bbox, grid_step)?;
        if points.is_empty() {
            return Err(ZoneError::NoGridPoints);
        }

        let groups = group_by_tile(&points, zoom)?;
        let tile_count = groups.len();
        tracing::debug!(
            "Sampling {} grid points across {} tiles at zoom {}",
            points.len(),
            tile_count,
            zoom
        );

        let outcomes: Vec<(TileId, Result<Vec<PrecipitationSample>, ZoneError>)> =
            stream::iter(groups.into_iter().map(|(tile, tile_points)| async move {
                let result = self.sample_tile(tile, &tile_points, timestamp).await;
                (tile, result)
            }))
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut samples = Vec::new();
        let mut failed = 0usize;
        let mut last_error = None;
        for (tile, outcome) in outcomes {
            match outcome {
                Ok(tile_samples) => samples.extend(tile_samples),
                Err(e) => {
                    tracing::warn!(
                        "Radar tile {}/{}/{} dropped: {}",
                        tile.zoom,
                        tile.x,
                        tile.y,
                        e
                    );
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        // Every tile failed: the status is unknown, not dry.
        if failed == tile_count {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        samples.retain(|s| s.intensity_mm_per_hour >= self.config.min_intensity);
        if samples.is_empty() {
            return Err(ZoneError::NoPrecipitation);
        }

        tracing::debug!(
            "Collected {} precipitation samples ({} of {} tiles failed)",
            samples.len(),
            failed,
            tile_count
        );

        PrecipitationGrid::new(*bbox, samples)
    }

    async fn sample_tile(
        &self,
        tile: TileId,
        points: &[TilePoint],
        timestamp: i64,
    ) -> Result<Vec<PrecipitationSample>, ZoneError> {
        let bytes = tokio::time::timeout(
            self.config.fetch_timeout,
            self.source.fetch_tile(tile, timestamp),
        )
        .await
        .map_err(|_| {
            ZoneError::TransportError(format!(
                "tile fetch timed out after {:?}",
                self.config.fetch_timeout
            ))
        })??;

        read_tile_samples(&bytes, points)
    }
}

/// Group grid points by the tile they project onto.
fn group_by_tile(
    points: &[Coordinate],
    zoom: u8,
) -> Result<HashMap<TileId, Vec<TilePoint>>, ZoneError> {
    let mut groups: HashMap<TileId, Vec<TilePoint>> = HashMap::new();
    for &coordinate in points {
        let projected = lat_lng_to_tile(coordinate.latitude, coordinate.longitude, zoom)?;
        groups.entry(projected.tile).or_default().push(TilePoint {
            coordinate,
            pixel_x: projected.pixel_x,
            pixel_y: projected.pixel_y,
        });
    }
    Ok(groups)
}

/// Decode a tile image and read the rain rate under each point.
fn read_tile_samples(
    bytes: &[u8],
    points: &[TilePoint],
) -> Result<Vec<PrecipitationSample>, ZoneError> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ZoneError::DecodeError("empty tile image".to_string()));
    }

    Ok(points
        .iter()
        .map(|p| {
            let pixel = image.get_pixel(
                scale_pixel(p.pixel_x, width),
                scale_pixel(p.pixel_y, height),
            );
            let [r, g, b, a] = pixel.0;
            PrecipitationSample {
                latitude: p.coordinate.latitude,
                longitude: p.coordinate.longitude,
                intensity_mm_per_hour: dbz_to_rain_rate(color_to_dbz(r, g, b, a)),
            }
        })
        .collect())
}

/// Map a pixel index in `TILE_SIZE` space onto an image of `extent` pixels.
fn scale_pixel(pixel: u32, extent: u32) -> u32 {
    let scaled = pixel as u64 * extent as u64 / TILE_SIZE as u64;
    scaled.min(extent as u64 - 1) as u32
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) const GREEN: [u8; 4] = [0, 200, 0, 255];
    pub(crate) const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

    pub(crate) fn png(color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, image::Rgba(color));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    /// In-memory radar source: one solid colour per tile, with failure and
    /// delay injection.
    pub(crate) struct FakeRadar {
        pub timestamp: i64,
        pub default_color: [u8; 4],
        pub colors: HashMap<TileId, [u8; 4]>,
        pub failing: Vec<TileId>,
        pub delay: Option<Duration>,
        pub fetches: AtomicUsize,
        pub timestamp_calls: AtomicUsize,
        pub fetched_tiles: Mutex<Vec<TileId>>,
        pub in_flight: AtomicUsize,
        pub peak_in_flight: AtomicUsize,
    }

    impl FakeRadar {
        pub(crate) fn solid(color: [u8; 4]) -> Self {
            Self {
                timestamp: 1760771400,
                default_color: color,
                colors: HashMap::new(),
                failing: Vec::new(),
                delay: None,
                fetches: AtomicUsize::new(0),
                timestamp_calls: AtomicUsize::new(0),
                fetched_tiles: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        pub(crate) fn network_calls(&self) -> usize {
            self.fetches.load(Ordering::SeqCst) + self.timestamp_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RadarSource for FakeRadar {
        async fn latest_timestamp(&self) -> Result<i64, ZoneError> {
            self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.timestamp)
        }

        async fn fetch_tile(&self, tile: TileId, _timestamp: i64) -> Result<Vec<u8>, ZoneError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.fetched_tiles.lock().unwrap().push(tile);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.failing.contains(&tile) {
                return Err(ZoneError::HttpError(502));
            }
            let color = self.colors.get(&tile).copied().unwrap_or(self.default_color);
            Ok(png(color))
        }
    }

    fn single_tile_bbox() -> BoundingBox {
        BoundingBox::new(40.0, 40.5, -87.5, -86.5).unwrap()
    }

    /// Straddles the x=15 / x=16 tile boundary at zoom 6 (lng -90.0).
    fn two_tile_bbox() -> BoundingBox {
        BoundingBox::new(40.0, 40.5, -90.5, -89.5).unwrap()
    }

    fn sampler(radar: Arc<FakeRadar>) -> TileSampler {
        TileSampler::new(radar, SamplerConfig::default())
    }

    #[test]
    fn test_color_table() {
        assert_eq!(color_to_dbz(255, 255, 255, 0), 0.0);
        assert_eq!(color_to_dbz(255, 255, 255, 255), 65.0);
        assert_eq!(color_to_dbz(255, 0, 0, 255), 50.0);
        assert_eq!(color_to_dbz(255, 255, 0, 255), 35.0);
        assert_eq!(color_to_dbz(0, 200, 0, 255), 30.0);
        assert_eq!(color_to_dbz(0, 0, 255, 255), 20.0);
        assert_eq!(color_to_dbz(0, 255, 255, 255), 15.0);
    }

    #[test]
    fn test_color_brightness_fallback() {
        let dbz = color_to_dbz(128, 128, 128, 255);
        assert!((dbz - 128.0 / 255.0 * 65.0).abs() < 1e-9);
        assert_eq!(color_to_dbz(0, 0, 0, 255), 0.0);
    }

    #[test]
    fn test_marshall_palmer() {
        assert_eq!(dbz_to_rain_rate(0.0), 0.0);
        assert_eq!(dbz_to_rain_rate(-5.0), 0.0);
        // 20 dBZ: Z = 100, R = 0.5^(1/1.6)
        assert!((dbz_to_rain_rate(20.0) - 0.5f64.powf(0.625)).abs() < 1e-9);
        // 23 dBZ ≈ 1 mm/hr
        assert!((dbz_to_rain_rate(23.0) - 1.0).abs() < 0.05);
        assert!(dbz_to_rain_rate(50.0) > dbz_to_rain_rate(35.0));
        assert!(dbz_to_rain_rate(65.0) > 100.0);
    }

    #[test]
    fn test_scale_pixel() {
        assert_eq!(scale_pixel(0, 256), 0);
        assert_eq!(scale_pixel(255, 256), 255);
        assert_eq!(scale_pixel(128, 512), 256);
        assert_eq!(scale_pixel(255, 512), 510);
    }

    #[tokio::test]
    async fn test_sample_single_tile() {
        let radar = Arc::new(FakeRadar::solid(GREEN));
        let grid = sampler(radar.clone())
            .sample(&single_tile_bbox(), 0.25, 6, radar.timestamp)
            .await
            .unwrap();

        assert_eq!(radar.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(grid.samples().len(), 15);
        let expected = dbz_to_rain_rate(30.0);
        for s in grid.samples() {
            assert!((s.intensity_mm_per_hour - expected).abs() < 1e-9);
            assert!(grid.bbox().contains(&s.coordinate()));
        }
    }

    #[tokio::test]
    async fn test_sample_fetches_each_tile_once() {
        let radar = Arc::new(FakeRadar::solid(GREEN));
        let grid = sampler(radar.clone())
            .sample(&two_tile_bbox(), 0.25, 6, radar.timestamp)
            .await
            .unwrap();

        assert_eq!(radar.fetches.load(Ordering::SeqCst), 2);
        let mut tiles = radar.fetched_tiles.lock().unwrap().clone();
        tiles.sort_by_key(|t| t.x);
        tiles.dedup();
        assert_eq!(tiles.len(), 2);
        assert_eq!(grid.samples().len(), 15);
    }

    #[tokio::test]
    async fn test_sample_transparent_is_no_precipitation() {
        let radar = Arc::new(FakeRadar::solid(TRANSPARENT));
        let result = sampler(radar.clone())
            .sample(&single_tile_bbox(), 0.25, 6, radar.timestamp)
            .await;
        assert!(matches!(result, Err(ZoneError::NoPrecipitation)));
    }

    #[tokio::test]
    async fn test_sample_drops_failed_tile_only() {
        let mut fake = FakeRadar::solid(GREEN);
        fake.failing.push(TileId { zoom: 6, x: 15, y: 24 });
        let radar = Arc::new(fake);

        let grid = sampler(radar.clone())
            .sample(&two_tile_bbox(), 0.25, 6, radar.timestamp)
            .await
            .unwrap();

        // Only the lng >= -90.0 columns (x = 16) survive: 3 columns x 3 rows.
        assert_eq!(grid.samples().len(), 9);
        assert!(grid.samples().iter().all(|s| s.longitude >= -90.0));
    }

    #[tokio::test]
    async fn test_sample_bounds_concurrent_fetches() {
        let mut fake = FakeRadar::solid(GREEN);
        fake.delay = Some(Duration::from_millis(20));
        let radar = Arc::new(fake);
        let sampler = TileSampler::new(
            radar.clone(),
            SamplerConfig {
                max_concurrent_fetches: 2,
                ..SamplerConfig::default()
            },
        );

        // Nine tile columns (x = 16..=24) across two tile rows at zoom 6.
        let bbox = BoundingBox::new(40.0, 41.0, -90.0, -45.0).unwrap();
        let grid = sampler
            .sample(&bbox, 1.0, 6, radar.timestamp)
            .await
            .unwrap();

        assert!(radar.fetches.load(Ordering::SeqCst) >= 9);
        assert_eq!(radar.peak_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(radar.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(grid.samples().len(), 92);
    }

    #[tokio::test]
    async fn test_sample_all_tiles_failed_is_error() {
        let mut fake = FakeRadar::solid(GREEN);
        fake.failing.push(TileId { zoom: 6, x: 16, y: 24 });
        let radar = Arc::new(fake);

        let result = sampler(radar.clone())
            .sample(&single_tile_bbox(), 0.25, 6, radar.timestamp)
            .await;
        assert!(matches!(result, Err(ZoneError::HttpError(502))));
    }

    #[tokio::test]
    async fn test_sample_timeout_drops_tile() {
        let mut fake = FakeRadar::solid(GREEN);
        fake.delay = Some(Duration::from_secs(5));
        let radar = Arc::new(fake);
        let sampler = TileSampler::new(
            radar.clone(),
            SamplerConfig {
                fetch_timeout: Duration::from_millis(50),
                ..SamplerConfig::default()
            },
        );

        let result = sampler
            .sample(&single_tile_bbox(), 0.25, 6, radar.timestamp)
            .await;
        assert!(matches!(result, Err(ZoneError::TransportError(_))));
    }

    #[tokio::test]
    async fn test_sample_undecodable_tile() {
        struct Garbage;

        #[async_trait]
        impl RadarSource for Garbage {
            async fn latest_timestamp(&self) -> Result<i64, ZoneError> {
                Ok(0)
            }
            async fn fetch_tile(&self, _: TileId, _: i64) -> Result<Vec<u8>, ZoneError> {
                Ok(b"not a png".to_vec())
            }
        }

        let sampler = TileSampler::new(Arc::new(Garbage), SamplerConfig::default());
        let result = sampler.sample(&single_tile_bbox(), 0.25, 6, 0).await;
        assert!(matches!(result, Err(ZoneError::DecodeError(_))));
    }

    #[tokio::test]
    async fn test_sample_rejects_bad_step() {
        let radar = Arc::new(FakeRadar::solid(GREEN));
        let result = sampler(radar.clone())
            .sample(&single_tile_bbox(), 0.0, 6, radar.timestamp)
            .await;
        assert!(matches!(result, Err(ZoneError::InvalidInput(_))));
        assert_eq!(radar.fetches.load(Ordering::SeqCst), 0);
    }
}
