//! Precipitation contour around a target point.
//!
//! Builds a concave hull of the significant samples and loosens it step by step
//! until the target falls inside, trading shape fidelity for inclusion.

use geo::{Coord, Intersects, Polygon};

use crate::errors::ZoneError;
use crate::hull::concave_hull;
use crate::models::{
    Coordinate, PrecipitationGrid, PrecipitationSample, ZoneGeometry, ZoneMetadata,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ContourConfig {
    /// Samples below this rate (mm/hr) are ignored.
    pub min_intensity: f64,
    /// Initial hull tightness, 1.0 tightest.
    pub tightness: f64,
    pub tightness_step: f64,
    pub tightness_floor: f64,
    /// Degrees added around a degenerate (point or line) sample set.
    pub degenerate_padding: f64,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            min_intensity: 0.1,
            tightness: 0.85,
            tightness_step: 0.15,
            tightness_floor: 0.5,
            degenerate_padding: 0.025,
        }
    }
}

impl ContourConfig {
    fn validate(&self) -> Result<(), ZoneError> {
        let unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !unit(self.tightness) || !unit(self.tightness_floor) {
            return Err(ZoneError::InvalidInput(format!(
                "tightness {} and floor {} must lie in [0, 1]",
                self.tightness, self.tightness_floor
            )));
        }
        if !self.tightness_step.is_finite() || self.tightness_step <= 0.0 {
            return Err(ZoneError::InvalidInput(format!(
                "tightness step must be positive, got {}",
                self.tightness_step
            )));
        }
        if !self.min_intensity.is_finite() || !self.degenerate_padding.is_finite() {
            return Err(ZoneError::InvalidInput(
                "contour intensity floor and padding must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// A hull that encloses the target, with the tightness that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourPolygon {
    pub polygon: Polygon<f64>,
    pub tightness: f64,
    pub metadata: ZoneMetadata,
}

impl ContourPolygon {
    pub fn geometry(&self) -> ZoneGeometry {
        ZoneGeometry::Polygon(self.polygon.clone())
    }
}

/// Summary statistics of `samples`, tagged with the hull tightness.
pub fn summarize(samples: &[PrecipitationSample], tightness: Option<f64>) -> ZoneMetadata {
    ZoneMetadata {
        max_intensity: samples
            .iter()
            .map(|s| s.intensity_mm_per_hour)
            .fold(0.0, f64::max),
        total_intensity: samples.iter().map(|s| s.intensity_mm_per_hour).sum(),
        sample_count: samples.len(),
        tightness,
    }
}

fn sample_coords(samples: &[PrecipitationSample]) -> Vec<Coord<f64>> {
    samples.iter().map(|s| s.coordinate().to_geo()).collect()
}

/// Hull of `samples` at `tightness` without any containment check.
pub fn hull_for_samples(
    samples: &[PrecipitationSample],
    tightness: f64,
    padding: f64,
) -> Result<Polygon<f64>, ZoneError> {
    if samples.is_empty() {
        return Err(ZoneError::NoPrecipitation);
    }
    Ok(concave_hull(&sample_coords(samples), tightness, padding))
}

/// Polygon around the significant samples of `grid` that contains `target`.
///
/// Starts at `config.tightness` and steps down by `tightness_step` until the
/// target is inside (boundary counts). The last attempt is clamped to
/// `tightness_floor`, so the floor itself is always tried before giving up.
pub fn generate_polygon(
    grid: &PrecipitationGrid,
    target: Coordinate,
    config: &ContourConfig,
) -> Result<ContourPolygon, ZoneError> {
    target.validate()?;
    config.validate()?;

    let significant: Vec<PrecipitationSample> = grid
        .samples()
        .iter()
        .filter(|s| s.intensity_mm_per_hour >= config.min_intensity)
        .copied()
        .collect();
    if significant.is_empty() {
        return Err(ZoneError::NoPrecipitation);
    }

    let points = sample_coords(&significant);
    let target_coord = target.to_geo();
    let mut tightness = config.tightness;

    loop {
        let polygon = concave_hull(&points, tightness, config.degenerate_padding);
        if polygon.intersects(&target_coord) {
            tracing::debug!(
                "Contour of {} samples encloses ({}, {}) at tightness {:.2}",
                significant.len(),
                target.latitude,
                target.longitude,
                tightness
            );
            return Ok(ContourPolygon {
                polygon,
                tightness,
                metadata: summarize(&significant, Some(tightness)),
            });
        }

        let Some(next) = next_tightness(tightness, config) else {
            tracing::debug!(
                "Target ({}, {}) outside contour down to tightness {:.2}",
                target.latitude,
                target.longitude,
                tightness
            );
            return Err(ZoneError::PointNotEnclosed);
        };
        tightness = next;
    }
}

/// Next looser tightness, or `None` once the floor has been tried.
fn next_tightness(current: f64, config: &ContourConfig) -> Option<f64> {
    if current <= config.tightness_floor + 1e-9 {
        return None;
    }
    Some((current - config.tightness_step).max(config.tightness_floor))
}
