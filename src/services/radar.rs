//! RainViewer radar client.
//!
//! Resolves the newest radar frame and fetches rendered tiles for it.
//! See: https://www.rainviewer.com/api/weather-maps-api.html

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

use crate::errors::ZoneError;
use crate::grid::{TileId, TILE_SIZE};

pub const RAINVIEWER_MAPS_URL: &str = "https://api.rainviewer.com/public/weather-maps.json";
pub const RAINVIEWER_TILE_HOST: &str = "https://tilecache.rainviewer.com";

/// Source of rendered radar imagery.
#[async_trait]
pub trait RadarSource: Send + Sync {
    /// Unix timestamp of the newest available radar frame.
    async fn latest_timestamp(&self) -> Result<i64, ZoneError>;

    /// Raw image bytes of one tile of the frame at `timestamp`.
    async fn fetch_tile(&self, tile: TileId, timestamp: i64) -> Result<Vec<u8>, ZoneError>;
}

/// Connection settings for [`RainViewerClient`].
#[derive(Debug, Clone)]
pub struct RainViewerSettings {
    pub maps_url: String,
    pub tile_host: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// RainViewer colour scheme id.
    pub color_scheme: u8,
    /// `{smooth}_{snow}` rendering options.
    pub options: String,
}

impl Default for RainViewerSettings {
    fn default() -> Self {
        Self {
            maps_url: RAINVIEWER_MAPS_URL.to_string(),
            tile_host: RAINVIEWER_TILE_HOST.to_string(),
            user_agent: "rain-zones/0.1".to_string(),
            timeout: Duration::from_secs(10),
            color_scheme: 2,
            options: "0_0".to_string(),
        }
    }
}

/// Client for the RainViewer weather-maps API and tile cache.
#[derive(Debug, Clone)]
pub struct RainViewerClient {
    client: reqwest::Client,
    settings: RainViewerSettings,
}

// --- RainViewer JSON response types ---

#[derive(Debug, Deserialize)]
struct WeatherMaps {
    radar: Option<RadarFrames>,
}

#[derive(Debug, Deserialize)]
struct RadarFrames {
    #[serde(default)]
    past: Vec<RadarFrame>,
    #[serde(default)]
    nowcast: Vec<RadarFrame>,
}

#[derive(Debug, Deserialize)]
struct RadarFrame {
    time: i64,
}

impl RainViewerClient {
    pub fn new(settings: RainViewerSettings) -> Result<Self, ZoneError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|e| ZoneError::InvalidInput(format!("Invalid User-Agent: {}", e)))?,
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ZoneError::TransportError(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { client, settings })
    }

    fn tile_url(&self, tile: TileId, timestamp: i64) -> String {
        format!(
            "{}/v2/radar/{}/{}/{}/{}/{}/{}/{}.png",
            self.settings.tile_host.trim_end_matches('/'),
            timestamp,
            TILE_SIZE,
            tile.zoom,
            tile.x,
            tile.y,
            self.settings.color_scheme,
            self.settings.options
        )
    }
}

/// Newest frame time: last `past` frame, else the first `nowcast` frame.
fn newest_frame(maps: &WeatherMaps) -> Option<i64> {
    let radar = maps.radar.as_ref()?;
    radar
        .past
        .iter()
        .map(|f| f.time)
        .max()
        .or_else(|| radar.nowcast.first().map(|f| f.time))
}

#[async_trait]
impl RadarSource for RainViewerClient {
    async fn latest_timestamp(&self) -> Result<i64, ZoneError> {
        let response = self
            .client
            .get(&self.settings.maps_url)
            .send()
            .await
            .map_err(|e| {
                ZoneError::TransportError(format!("radar maps request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ZoneError::HttpError(response.status().as_u16()));
        }

        let maps: WeatherMaps = response.json().await.map_err(|e| {
            ZoneError::DecodeError(format!("radar maps JSON parse error: {}", e))
        })?;

        newest_frame(&maps)
            .ok_or_else(|| ZoneError::TransportError("no radar frames available".to_string()))
    }

    async fn fetch_tile(&self, tile: TileId, timestamp: i64) -> Result<Vec<u8>, ZoneError> {
        let url = self.tile_url(tile, timestamp);
        let response =
            self.client.get(&url).send().await.map_err(|e| {
                ZoneError::TransportError(format!("radar tile request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ZoneError::HttpError(response.status().as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ZoneError::TransportError(format!("radar tile read failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> RainViewerSettings {
        RainViewerSettings {
            maps_url: format!("{}/public/weather-maps.json", server.uri()),
            tile_host: server.uri(),
            user_agent: "rain-zones-test/0.1".to_string(),
            timeout: Duration::from_secs(2),
            ..RainViewerSettings::default()
        }
    }

    #[test]
    fn test_newest_frame_prefers_latest_past() {
        let maps: WeatherMaps = serde_json::from_value(serde_json::json!({
            "version": "2.0",
            "host": "https://tilecache.rainviewer.com",
            "radar": {
                "past": [
                    { "time": 1760770800, "path": "/v2/radar/1760770800" },
                    { "time": 1760771400, "path": "/v2/radar/1760771400" }
                ],
                "nowcast": [
                    { "time": 1760772000, "path": "/v2/radar/nowcast_abc" }
                ]
            }
        }))
        .unwrap();
        assert_eq!(newest_frame(&maps), Some(1760771400));
    }

    #[test]
    fn test_newest_frame_falls_back_to_nowcast() {
        let maps: WeatherMaps = serde_json::from_value(serde_json::json!({
            "radar": { "past": [], "nowcast": [{ "time": 1760772000, "path": "/x" }] }
        }))
        .unwrap();
        assert_eq!(newest_frame(&maps), Some(1760772000));
    }

    #[test]
    fn test_newest_frame_missing_radar() {
        let maps: WeatherMaps = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(newest_frame(&maps), None);
    }

    #[test]
    fn test_tile_url_layout() {
        let client = RainViewerClient::new(RainViewerSettings {
            tile_host: "https://tiles.example/".to_string(),
            ..RainViewerSettings::default()
        })
        .unwrap();
        let url = client.tile_url(TileId { zoom: 6, x: 16, y: 24 }, 1760771400);
        assert_eq!(
            url,
            "https://tiles.example/v2/radar/1760771400/256/6/16/24/2/0_0.png"
        );
    }

    #[tokio::test]
    async fn test_latest_timestamp_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public/weather-maps.json"))
            .and(header("user-agent", "rain-zones-test/0.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "radar": { "past": [{ "time": 1760771400, "path": "/v2/radar/1760771400" }] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RainViewerClient::new(settings_for(&server)).unwrap();
        assert_eq!(client.latest_timestamp().await.unwrap(), 1760771400);
    }

    #[tokio::test]
    async fn test_latest_timestamp_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = RainViewerClient::new(settings_for(&server)).unwrap();
        assert!(matches!(
            client.latest_timestamp().await,
            Err(ZoneError::HttpError(503))
        ));
    }

    #[tokio::test]
    async fn test_fetch_tile_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/radar/1760771400/256/6/16/24/2/0_0.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let client = RainViewerClient::new(settings_for(&server)).unwrap();
        let bytes = client
            .fetch_tile(TileId { zoom: 6, x: 16, y: 24 }, 1760771400)
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_tile_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = RainViewerClient::new(settings_for(&server)).unwrap();
        let result = client.fetch_tile(TileId { zoom: 6, x: 0, y: 0 }, 1).await;
        assert!(matches!(result, Err(ZoneError::HttpError(404))));
    }
}
