//! Point precipitation observations.
//!
//! A cheap cross-check next to the radar path: several points are queried in
//! parallel and the answers are OR-ed together.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

use crate::errors::ZoneError;
use crate::models::Coordinate;

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Current precipitation (mm) at or above which a point counts as raining.
const RAINING_THRESHOLD_MM: f64 = 0.1;

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Whether precipitation is currently observed at `point`.
    async fn is_raining(&self, point: Coordinate) -> Result<bool, ZoneError>;
}

/// Open-Meteo `current=precipitation` client.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current: OpenMeteoCurrent,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    precipitation: f64,
}

impl OpenMeteoClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, ZoneError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| ZoneError::InvalidInput(format!("Invalid User-Agent: {}", e)))?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl ObservationSource for OpenMeteoClient {
    async fn is_raining(&self, point: Coordinate) -> Result<bool, ZoneError> {
        point.validate()?;
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", point.latitude.to_string()),
                ("longitude", point.longitude.to_string()),
                ("current", "precipitation".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ZoneError::HttpError(response.status().as_u16()));
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| ZoneError::DecodeError(format!("Open-Meteo JSON parse error: {}", e)))?;
        Ok(body.current.precipitation >= RAINING_THRESHOLD_MM)
    }
}

/// The center plus four compass points `radius_deg` away, clamped to valid ranges.
pub fn observation_points(center: Coordinate, radius_deg: f64) -> Vec<Coordinate> {
    let at = |dlat: f64, dlng: f64| Coordinate {
        latitude: (center.latitude + dlat).clamp(-90.0, 90.0),
        longitude: (center.longitude + dlng).clamp(-180.0, 180.0),
    };
    vec![
        center,
        at(radius_deg, 0.0),
        at(-radius_deg, 0.0),
        at(0.0, radius_deg),
        at(0.0, -radius_deg),
    ]
}

/// True as soon as any point reports rain; remaining checks are dropped.
///
/// Failed or timed-out checks count as "no answer". If every check fails the
/// last error is returned, since the status is unknown rather than dry.
pub async fn any_raining(
    source: &dyn ObservationSource,
    points: &[Coordinate],
    max_concurrent: usize,
    timeout: Duration,
) -> Result<bool, ZoneError> {
    let mut checks = stream::iter(points.iter().copied().map(|point| async move {
        let outcome = tokio::time::timeout(timeout, source.is_raining(point))
            .await
            .map_err(|_| {
                ZoneError::TransportError(format!("observation timed out after {:?}", timeout))
            })
            .and_then(|result| result);
        (point, outcome)
    }))
    .buffer_unordered(max_concurrent.max(1));

    let mut failed = 0usize;
    let mut last_error = None;
    while let Some((point, outcome)) = checks.next().await {
        match outcome {
            Ok(true) => {
                tracing::debug!(
                    "Observation reports rain at ({}, {})",
                    point.latitude,
                    point.longitude
                );
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    "Observation at ({}, {}) failed: {}",
                    point.latitude,
                    point.longitude,
                    e
                );
                failed += 1;
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if failed == points.len() => Err(e),
        _ => Ok(false),
    }
}
