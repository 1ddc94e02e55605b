//! Top-N rain region detection for batch jobs.
//!
//! Greedy clustering: samples are visited strongest first and each unvisited
//! sample seeds a breadth-first flood over neighbours within the distance
//! threshold. Two peaks joined through a shared in-between sample end up in
//! one region.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::errors::ZoneError;
use crate::models::{Coordinate, PrecipitationSample, RainZone, Region, ZoneGeometry};
use crate::services::contour::{hull_for_samples, summarize, ContourConfig};

pub const DEFAULT_REGION_COUNT: usize = 3;

/// Up to `count` regions of at least `min_cluster_size` samples, ranked by
/// total intensity (best first).
pub fn find_top_regions(
    samples: &[PrecipitationSample],
    count: usize,
    min_cluster_size: usize,
    distance_threshold: f64,
) -> Result<Vec<Region>, ZoneError> {
    if !distance_threshold.is_finite() || distance_threshold <= 0.0 {
        return Err(ZoneError::InvalidInput(format!(
            "distance threshold must be positive, got {}",
            distance_threshold
        )));
    }
    let min_cluster_size = min_cluster_size.max(1);

    let mut order: Vec<usize> = (0..samples.len()).collect();
    // Stable sort keeps input order among equal intensities.
    order.sort_by(|&a, &b| {
        samples[b]
            .intensity_mm_per_hour
            .total_cmp(&samples[a].intensity_mm_per_hour)
    });

    let mut visited = vec![false; samples.len()];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for &seed in &order {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut members = vec![seed];
        let mut queue = VecDeque::from([seed]);

        while let Some(current) = queue.pop_front() {
            for &candidate in &order {
                if !visited[candidate]
                    && distance(&samples[current], &samples[candidate]) <= distance_threshold
                {
                    visited[candidate] = true;
                    members.push(candidate);
                    queue.push_back(candidate);
                }
            }
        }

        if members.len() >= min_cluster_size {
            clusters.push(members);
        } else {
            tracing::debug!(
                "Discarding cluster of {} samples (minimum {})",
                members.len(),
                min_cluster_size
            );
        }
    }

    let mut regions: Vec<Region> = clusters
        .into_iter()
        .map(|members| build_region(samples, &members))
        .collect();
    regions.sort_by(|a, b| b.total_intensity.total_cmp(&a.total_intensity));
    regions.truncate(count);

    for (i, region) in regions.iter_mut().enumerate() {
        region.rank = i + 1;
        region.label = format!("Region {}", region.rank);
    }

    tracing::info!(
        "Found {} rain regions among {} samples",
        regions.len(),
        samples.len()
    );
    Ok(regions)
}

fn distance(a: &PrecipitationSample, b: &PrecipitationSample) -> f64 {
    (a.latitude - b.latitude).hypot(a.longitude - b.longitude)
}

fn build_region(samples: &[PrecipitationSample], members: &[usize]) -> Region {
    let members: Vec<PrecipitationSample> = members.iter().map(|&i| samples[i]).collect();
    let n = members.len() as f64;
    let centroid = Coordinate {
        latitude: members.iter().map(|s| s.latitude).sum::<f64>() / n,
        longitude: members.iter().map(|s| s.longitude).sum::<f64>() / n,
    };
    let stats = summarize(&members, None);

    Region {
        rank: 0,
        label: String::new(),
        centroid,
        point_count: members.len(),
        total_intensity: stats.total_intensity,
        max_intensity: stats.max_intensity,
        samples: members,
    }
}

/// Labelled zones around each region's members, live for `ttl` from `now`.
///
/// Each zone is keyed `"{base_key}#{rank}"`, so re-running a batch over the
/// same box and radar frame replaces its zones instead of adding new ones.
pub fn region_zones(
    regions: &[Region],
    config: &ContourConfig,
    base_key: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<RainZone>, ZoneError> {
    regions
        .iter()
        .map(|region| -> Result<RainZone, ZoneError> {
            let polygon =
                hull_for_samples(&region.samples, config.tightness, config.degenerate_padding)?;
            let zone = RainZone::new(ZoneGeometry::Polygon(polygon), now, now + ttl)?
                .with_key(format!("{}#{}", base_key, region.rank))
                .with_label(region.label.clone())
                .with_metadata(summarize(&region.samples, Some(config.tightness)));
            Ok(zone)
        })
        .collect()
}
