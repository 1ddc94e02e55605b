//! Grid and coordinate utilities.
//!
//! Rounding precision is derived from the configured grid step rather than a
//! fixed constant, so a 0.05° grid rounds to 2 decimals and a 0.1° grid to 1.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::errors::ZoneError;
use crate::models::{BoundingBox, Coordinate};

/// Pixel width/height of a slippy-map tile.
pub const TILE_SIZE: u32 = 256;

/// Highest zoom level accepted by the projection.
pub const MAX_ZOOM: u8 = 22;

/// Latitude limit of the Web Mercator projection.
const MERCATOR_MAX_LAT: f64 = 85.051_128_78;

/// Slack used when counting lattice steps, absorbs float drift such as 0.3 / 0.1.
const STEP_EPSILON: f64 = 1e-9;

/// Largest number of decimals `decimals_for_step` will report.
const MAX_DECIMALS: u32 = 10;

/// Grid spacing and the rounding precision derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub step: f64,
    pub precision: u32,
}

impl GridConfig {
    pub fn from_step(step: f64) -> Result<Self, ZoneError> {
        validate_step(step)?;
        Ok(Self {
            step,
            precision: decimals_for_step(step),
        })
    }

    pub fn round(&self, x: f64) -> f64 {
        round_coordinate(x, self.precision)
    }

    /// Snap a coordinate onto the grid precision.
    pub fn round_point(&self, c: Coordinate) -> Coordinate {
        Coordinate {
            latitude: self.round(c.latitude),
            longitude: self.round(c.longitude),
        }
    }
}

/// Number of decimals needed to represent `step` exactly (0.05 → 2, 0.5 → 1, 2.0 → 0).
pub fn decimals_for_step(step: f64) -> u32 {
    (0..=MAX_DECIMALS)
        .find(|&d| {
            let scaled = step * 10f64.powi(d as i32);
            (scaled - scaled.round()).abs() < 1e-6
        })
        .unwrap_or(MAX_DECIMALS)
}

/// Round `x` to `precision` decimal places.
pub fn round_coordinate(x: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (x * factor).round() / factor
}

fn validate_step(step: f64) -> Result<(), ZoneError> {
    if !step.is_finite() || step <= 0.0 {
        return Err(ZoneError::InvalidInput(format!(
            "grid step must be positive, got {}",
            step
        )));
    }
    Ok(())
}

/// Every lattice point of `bbox` at `step`, starting at the minimum corner.
///
/// Per axis the count is `floor((max - min) / step) + 1`; no point exceeds `max`.
pub fn generate_grid_points(bbox: &BoundingBox, step: f64) -> Result<Vec<Coordinate>, ZoneError> {
    validate_step(step)?;

    let lat_count = axis_count(bbox.min_lat, bbox.max_lat, step);
    let lng_count = axis_count(bbox.min_lng, bbox.max_lng, step);

    let mut points = Vec::with_capacity(lat_count * lng_count);
    for i in 0..lat_count {
        let latitude = (bbox.min_lat + i as f64 * step).min(bbox.max_lat);
        for j in 0..lng_count {
            let longitude = (bbox.min_lng + j as f64 * step).min(bbox.max_lng);
            points.push(Coordinate {
                latitude,
                longitude,
            });
        }
    }
    Ok(points)
}

fn axis_count(min: f64, max: f64, step: f64) -> usize {
    ((max - min) / step + STEP_EPSILON).floor().max(0.0) as usize + 1
}

/// A slippy-map tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

/// A point projected onto a tile and a pixel within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePixel {
    pub tile: TileId,
    pub pixel_x: u32,
    pub pixel_y: u32,
}

/// Project a WGS84 point onto the Web Mercator tile pyramid.
pub fn lat_lng_to_tile(lat: f64, lng: f64, zoom: u8) -> Result<TilePixel, ZoneError> {
    Coordinate::new(lat, lng)?;
    let n = tiles_per_axis(zoom)? as f64;
    let lat_rad = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();

    let world_x = (lng + 180.0) / 360.0 * n;
    let world_y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;

    let max_index = n - 1.0;
    let tile_x = world_x.floor().clamp(0.0, max_index);
    let tile_y = world_y.floor().clamp(0.0, max_index);

    let max_pixel = (TILE_SIZE - 1) as f64;
    let pixel_x = ((world_x - tile_x) * TILE_SIZE as f64)
        .floor()
        .clamp(0.0, max_pixel);
    let pixel_y = ((world_y - tile_y) * TILE_SIZE as f64)
        .floor()
        .clamp(0.0, max_pixel);

    Ok(TilePixel {
        tile: TileId {
            zoom,
            x: tile_x as u32,
            y: tile_y as u32,
        },
        pixel_x: pixel_x as u32,
        pixel_y: pixel_y as u32,
    })
}

/// Tiles along one axis of the world at `zoom` (`MAX_ZOOM` at most).
pub fn tiles_per_axis(zoom: u8) -> Result<u32, ZoneError> {
    if zoom > MAX_ZOOM {
        return Err(ZoneError::InvalidInput(format!(
            "zoom {} above maximum {}",
            zoom, MAX_ZOOM
        )));
    }
    Ok(1u32 << zoom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimals_for_step() {
        assert_eq!(decimals_for_step(0.05), 2);
        assert_eq!(decimals_for_step(0.1), 1);
        assert_eq!(decimals_for_step(0.25), 2);
        assert_eq!(decimals_for_step(2.0), 0);
        assert_eq!(decimals_for_step(0.001), 3);
    }

    #[test]
    fn test_round_coordinate() {
        assert_eq!(round_coordinate(40.123_456, 2), 40.12);
        assert_eq!(round_coordinate(-87.005, 1), -87.0);
        assert_eq!(round_coordinate(12.5, 0), 13.0);
    }

    #[test]
    fn test_round_coordinate_idempotent() {
        let values = [
            40.123_456,
            -87.987_654,
            0.0,
            89.999_9,
            -179.999_99,
            12.345,
            0.05,
            33.333_333,
        ];
        for precision in 0..6 {
            for &v in &values {
                let once = round_coordinate(v, precision);
                assert_eq!(
                    round_coordinate(once, precision),
                    once,
                    "not idempotent for {} at {}",
                    v,
                    precision
                );
            }
        }
    }

    #[test]
    fn test_grid_config_derives_precision() {
        let cfg = GridConfig::from_step(0.05).unwrap();
        assert_eq!(cfg.precision, 2);
        let p = cfg.round_point(Coordinate::new(40.0049, -87.0151).unwrap());
        assert_eq!(p.latitude, 40.0);
        assert_eq!(p.longitude, -87.02);
        assert!(GridConfig::from_step(0.0).is_err());
    }

    #[test]
    fn test_grid_points_count_and_bounds() {
        let bbox = BoundingBox::new(38.0, 42.0, -89.0, -85.0).unwrap();
        for &step in &[1.0, 0.5, 0.3, 0.7, 0.1] {
            let points = generate_grid_points(&bbox, step).unwrap();
            let per_axis = (4.0 / step + 1e-9).floor() as usize + 1;
            assert_eq!(points.len(), per_axis * per_axis, "step {}", step);
            assert!(points
                .iter()
                .any(|p| p.latitude == 38.0 && p.longitude == -89.0));
            assert!(points.iter().all(|p| bbox.contains(p)));
        }
    }

    #[test]
    fn test_grid_points_integer_steps() {
        let bbox = BoundingBox::new(0.0, 3.0, 0.0, 2.0).unwrap();
        let points = generate_grid_points(&bbox, 1.0).unwrap();
        // 4 latitudes x 3 longitudes
        assert_eq!(points.len(), 12);
        assert_eq!(points[0].latitude, 0.0);
        assert_eq!(points[0].longitude, 0.0);
        assert_eq!(points[11].latitude, 3.0);
        assert_eq!(points[11].longitude, 2.0);
    }

    #[test]
    fn test_grid_points_step_larger_than_box() {
        let bbox = BoundingBox::new(10.0, 10.5, 20.0, 20.5).unwrap();
        let points = generate_grid_points(&bbox, 1.0).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_grid_points_invalid_step() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0).unwrap();
        assert!(matches!(
            generate_grid_points(&bbox, 0.0),
            Err(ZoneError::InvalidInput(_))
        ));
        assert!(matches!(
            generate_grid_points(&bbox, -0.5),
            Err(ZoneError::InvalidInput(_))
        ));
        assert!(generate_grid_points(&bbox, f64::NAN).is_err());
    }

    #[test]
    fn test_lat_lng_to_tile_origin() {
        let tp = lat_lng_to_tile(0.0, 0.0, 1).unwrap();
        assert_eq!(tp.tile, TileId { zoom: 1, x: 1, y: 1 });
        assert_eq!(tp.pixel_x, 0);
        assert_eq!(tp.pixel_y, 0);
    }

    #[test]
    fn test_lat_lng_to_tile_known_value() {
        // Chicago area at zoom 6
        let tp = lat_lng_to_tile(40.0, -87.0, 6).unwrap();
        assert_eq!(tp.tile.x, 16);
        assert_eq!(tp.tile.y, 24);
        assert!(tp.pixel_x < TILE_SIZE);
        assert!(tp.pixel_y < TILE_SIZE);
    }

    #[test]
    fn test_lat_lng_to_tile_clamps_edges() {
        let tp = lat_lng_to_tile(90.0, 180.0, 3).unwrap();
        assert_eq!(tp.tile.x, 7);
        assert_eq!(tp.tile.y, 0);
        assert!(tp.pixel_x <= TILE_SIZE - 1);

        let tp = lat_lng_to_tile(-90.0, -180.0, 3).unwrap();
        assert_eq!(tp.tile.x, 0);
        assert_eq!(tp.tile.y, 7);
        assert_eq!(tp.pixel_y, TILE_SIZE - 1);
    }

    #[test]
    fn test_lat_lng_to_tile_rejects_bad_input() {
        assert!(lat_lng_to_tile(95.0, 0.0, 3).is_err());
        assert!(lat_lng_to_tile(0.0, 0.0, MAX_ZOOM + 1).is_err());
    }

    #[test]
    fn test_tiles_per_axis_doubles_per_zoom() {
        for zoom in 0..MAX_ZOOM {
            assert_eq!(
                tiles_per_axis(zoom + 1).unwrap(),
                tiles_per_axis(zoom).unwrap() * 2
            );
        }
        assert_eq!(tiles_per_axis(0).unwrap(), 1);
        assert_eq!(tiles_per_axis(MAX_ZOOM).unwrap(), 1 << 22);

        // World tile count quadruples.
        let world = |z: u8| (tiles_per_axis(z).unwrap() as u64).pow(2);
        assert_eq!(world(7), world(6) * 4);
    }

    #[test]
    fn test_tiles_per_axis_rejects_deep_zoom() {
        assert!(matches!(
            tiles_per_axis(MAX_ZOOM + 1),
            Err(ZoneError::InvalidInput(_))
        ));
        assert!(tiles_per_axis(32).is_err());
        assert!(tiles_per_axis(u8::MAX).is_err());
    }

    #[test]
    fn test_projection_resolution_increases_with_zoom() {
        // Two points 0.5° apart share a tile at low zoom but split at high zoom.
        let a = (40.0, -87.0);
        let b = (40.0, -86.5);
        let low_a = lat_lng_to_tile(a.0, a.1, 2).unwrap();
        let low_b = lat_lng_to_tile(b.0, b.1, 2).unwrap();
        assert_eq!(low_a.tile, low_b.tile);
        let high_a = lat_lng_to_tile(a.0, a.1, 10).unwrap();
        let high_b = lat_lng_to_tile(b.0, b.1, 10).unwrap();
        assert_ne!(high_a.tile, high_b.tile);
    }
}
