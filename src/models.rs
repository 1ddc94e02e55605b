//! Core data model: coordinates, precipitation samples, zones and regions.
//!
//! All geometry uses geo's `(x, y) = (longitude, latitude)` convention. The
//! same order is used on the wire, so exported rings are GeoJSON-compatible.

use chrono::{DateTime, Utc};
use geo::{Area, BoundingRect, Coord, Intersects, LineString, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::errors::ZoneError;

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ZoneError> {
        let c = Self {
            latitude,
            longitude,
        };
        c.validate()?;
        Ok(c)
    }

    /// Reject non-finite or out-of-range values.
    pub fn validate(&self) -> Result<(), ZoneError> {
        validate_latitude(self.latitude)?;
        validate_longitude(self.longitude)
    }

    pub(crate) fn to_geo(self) -> Coord<f64> {
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }
}

fn validate_latitude(lat: f64) -> Result<(), ZoneError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ZoneError::InvalidInput(format!(
            "latitude {} outside [-90, 90]",
            lat
        )));
    }
    Ok(())
}

fn validate_longitude(lng: f64) -> Result<(), ZoneError> {
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(ZoneError::InvalidInput(format!(
            "longitude {} outside [-180, 180]",
            lng
        )));
    }
    Ok(())
}

/// Axis-aligned latitude/longitude box, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Result<Self, ZoneError> {
        validate_latitude(min_lat)?;
        validate_latitude(max_lat)?;
        validate_longitude(min_lng)?;
        validate_longitude(max_lng)?;
        if min_lat > max_lat || min_lng > max_lng {
            return Err(ZoneError::InvalidInput(format!(
                "inverted bounding box lat [{}, {}] lng [{}, {}]",
                min_lat, max_lat, min_lng, max_lng
            )));
        }
        Ok(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Square box of `radius_deg` around `center`, clamped to valid coordinates.
    pub fn around(center: Coordinate, radius_deg: f64) -> Result<Self, ZoneError> {
        center.validate()?;
        if !radius_deg.is_finite() || radius_deg <= 0.0 {
            return Err(ZoneError::InvalidInput(format!(
                "search radius must be positive, got {}",
                radius_deg
            )));
        }
        Self::new(
            (center.latitude - radius_deg).max(-90.0),
            (center.latitude + radius_deg).min(90.0),
            (center.longitude - radius_deg).max(-180.0),
            (center.longitude + radius_deg).min(180.0),
        )
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        c.latitude >= self.min_lat
            && c.latitude <= self.max_lat
            && c.longitude >= self.min_lng
            && c.longitude <= self.max_lng
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.min_lng,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lng,
                y: self.max_lat,
            },
        )
        .to_polygon()
    }
}

/// Rain rate at one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrecipitationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub intensity_mm_per_hour: f64,
}

impl PrecipitationSample {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Samples drawn from one bounding box. Every sample lies inside the box.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecipitationGrid {
    samples: Vec<PrecipitationSample>,
    bbox: BoundingBox,
}

impl PrecipitationGrid {
    pub fn new(bbox: BoundingBox, samples: Vec<PrecipitationSample>) -> Result<Self, ZoneError> {
        if let Some(outside) = samples.iter().find(|s| !bbox.contains(&s.coordinate())) {
            return Err(ZoneError::InvalidInput(format!(
                "sample ({}, {}) lies outside the grid bounding box",
                outside.latitude, outside.longitude
            )));
        }
        if let Some(negative) = samples
            .iter()
            .find(|s| !s.intensity_mm_per_hour.is_finite() || s.intensity_mm_per_hour < 0.0)
        {
            return Err(ZoneError::InvalidInput(format!(
                "sample intensity {} is not a non-negative number",
                negative.intensity_mm_per_hour
            )));
        }
        Ok(Self { samples, bbox })
    }

    pub fn samples(&self) -> &[PrecipitationSample] {
        &self.samples
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn into_samples(self) -> Vec<PrecipitationSample> {
        self.samples
    }
}

// ---------------------------------------------------------------------------
// Zone geometry
// ---------------------------------------------------------------------------

/// Zone outline. Consumers match both variants explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "GeoJsonGeometry", try_from = "GeoJsonGeometry")]
pub enum ZoneGeometry {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

/// GeoJSON geometry object, positions as `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

impl ZoneGeometry {
    /// Boundary-inclusive containment test.
    pub fn contains(&self, point: Coordinate) -> bool {
        let c = point.to_geo();
        match self {
            ZoneGeometry::Polygon(polygon) => polygon.intersects(&c),
            ZoneGeometry::MultiPolygon(multi) => multi.0.iter().any(|p| p.intersects(&c)),
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            ZoneGeometry::Polygon(polygon) => polygon.bounding_rect(),
            ZoneGeometry::MultiPolygon(multi) => multi.bounding_rect(),
        }
    }

    /// Exterior ring of the (largest) polygon as closed `(longitude, latitude)` pairs.
    pub fn exterior_ring(&self) -> Vec<(f64, f64)> {
        let polygon = match self {
            ZoneGeometry::Polygon(polygon) => Some(polygon),
            ZoneGeometry::MultiPolygon(multi) => multi.0.iter().max_by(|a, b| {
                a.unsigned_area()
                    .partial_cmp(&b.unsigned_area())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        };
        polygon
            .map(|p| p.exterior().coords().map(|c| (c.x, c.y)).collect())
            .unwrap_or_default()
    }

    pub fn to_geojson(&self) -> GeoJsonGeometry {
        GeoJsonGeometry::from(self.clone())
    }
}

fn polygon_positions(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
        .collect()
}

fn positions_to_polygon(rings: Vec<Vec<[f64; 2]>>) -> Result<Polygon<f64>, ZoneError> {
    let mut rings = rings.into_iter().map(|ring| {
        if ring.len() < 4 || ring.first() != ring.last() {
            return Err(ZoneError::InvalidInput(
                "polygon rings need at least four positions and must be closed".to_string(),
            ));
        }
        Ok(LineString::new(
            ring.into_iter().map(|[x, y]| Coord { x, y }).collect(),
        ))
    });
    let exterior = rings
        .next()
        .ok_or_else(|| ZoneError::InvalidInput("polygon has no exterior ring".to_string()))??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

impl From<ZoneGeometry> for GeoJsonGeometry {
    fn from(geometry: ZoneGeometry) -> Self {
        match geometry {
            ZoneGeometry::Polygon(polygon) => GeoJsonGeometry::Polygon {
                coordinates: polygon_positions(&polygon),
            },
            ZoneGeometry::MultiPolygon(multi) => GeoJsonGeometry::MultiPolygon {
                coordinates: multi.0.iter().map(polygon_positions).collect(),
            },
        }
    }
}

impl TryFrom<GeoJsonGeometry> for ZoneGeometry {
    type Error = ZoneError;

    fn try_from(geojson: GeoJsonGeometry) -> Result<Self, Self::Error> {
        match geojson {
            GeoJsonGeometry::Polygon { coordinates } => {
                Ok(ZoneGeometry::Polygon(positions_to_polygon(coordinates)?))
            }
            GeoJsonGeometry::MultiPolygon { coordinates } => {
                let polygons = coordinates
                    .into_iter()
                    .map(positions_to_polygon)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ZoneGeometry::MultiPolygon(MultiPolygon::new(polygons)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// Summary of the samples a zone was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMetadata {
    pub max_intensity: f64,
    pub total_intensity: f64,
    pub sample_count: usize,
    /// Hull tightness that produced the outline, if it came from a hull.
    pub tightness: Option<f64>,
}

/// An area currently experiencing precipitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainZone {
    pub key: Option<String>,
    pub label: Option<String>,
    pub geometry: ZoneGeometry,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub metadata: Option<ZoneMetadata>,
}

impl RainZone {
    pub fn new(
        geometry: ZoneGeometry,
        generated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, ZoneError> {
        if expires_at <= generated_at {
            return Err(ZoneError::InvalidInput(format!(
                "zone expiry {} is not after generation time {}",
                expires_at, generated_at
            )));
        }
        Ok(Self {
            key: None,
            label: None,
            geometry,
            generated_at,
            expires_at,
            metadata: None,
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_metadata(mut self, metadata: ZoneMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        self.geometry.contains(point)
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Exported outline: closed ring of `(longitude, latitude)` pairs.
    pub fn polygon(&self) -> Vec<(f64, f64)> {
        self.geometry.exterior_ring()
    }
}

/// A cached zone plus whether it marks rain or a confirmed-dry area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCacheEntry {
    pub zone: RainZone,
    pub is_raining: bool,
    pub expires_at: DateTime<Utc>,
}

impl ZoneCacheEntry {
    pub fn raining(zone: RainZone) -> Self {
        let expires_at = zone.expires_at;
        Self {
            zone,
            is_raining: true,
            expires_at,
        }
    }

    pub fn dry(zone: RainZone) -> Self {
        let expires_at = zone.expires_at;
        Self {
            zone,
            is_raining: false,
            expires_at,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A cluster of samples produced by the region detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    /// 1-based, best first.
    pub rank: usize,
    pub label: String,
    pub centroid: Coordinate,
    pub samples: Vec<PrecipitationSample>,
    pub total_intensity: f64,
    pub max_intensity: f64,
    pub point_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn square() -> ZoneGeometry {
        ZoneGeometry::Polygon(
            BoundingBox::new(39.0, 41.0, -88.0, -86.0)
                .unwrap()
                .to_polygon(),
        )
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(40.0, -87.0).is_ok());
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(91.0, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_bbox_around_clamps() {
        let bbox = BoundingBox::around(Coordinate::new(89.0, 179.0).unwrap(), 2.0).unwrap();
        assert_eq!(bbox.max_lat, 90.0);
        assert_eq!(bbox.max_lng, 180.0);
        assert_eq!(bbox.min_lat, 87.0);
        assert!(BoundingBox::around(Coordinate::new(0.0, 0.0).unwrap(), 0.0).is_err());
    }

    #[test]
    fn test_bbox_rejects_inverted() {
        assert!(BoundingBox::new(41.0, 39.0, -88.0, -86.0).is_err());
    }

    #[test]
    fn test_grid_rejects_sample_outside_bbox() {
        let bbox = BoundingBox::new(39.0, 41.0, -88.0, -86.0).unwrap();
        let inside = PrecipitationSample {
            latitude: 40.0,
            longitude: -87.0,
            intensity_mm_per_hour: 1.0,
        };
        let outside = PrecipitationSample {
            latitude: 42.0,
            ..inside
        };
        assert!(PrecipitationGrid::new(bbox, vec![inside]).is_ok());
        assert!(PrecipitationGrid::new(bbox, vec![inside, outside]).is_err());
    }

    #[test]
    fn test_geometry_contains_boundary() {
        let geometry = square();
        assert!(geometry.contains(Coordinate::new(40.0, -87.0).unwrap()));
        assert!(geometry.contains(Coordinate::new(41.0, -87.0).unwrap()));
        assert!(geometry.contains(Coordinate::new(39.0, -88.0).unwrap()));
        assert!(!geometry.contains(Coordinate::new(42.0, -87.0).unwrap()));
    }

    #[test]
    fn test_multipolygon_contains_any_member() {
        let a = BoundingBox::new(0.0, 1.0, 0.0, 1.0).unwrap().to_polygon();
        let b = BoundingBox::new(10.0, 11.0, 10.0, 11.0).unwrap().to_polygon();
        let geometry = ZoneGeometry::MultiPolygon(MultiPolygon::new(vec![a, b]));
        assert!(geometry.contains(Coordinate::new(10.5, 10.5).unwrap()));
        assert!(!geometry.contains(Coordinate::new(5.0, 5.0).unwrap()));
    }

    #[test]
    fn test_geojson_uses_lng_lat_order() {
        let json = serde_json::to_value(square()).unwrap();
        assert_eq!(json["type"], "Polygon");
        let ring = json["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.first(), ring.last());
        for position in ring {
            let lng = position[0].as_f64().unwrap();
            let lat = position[1].as_f64().unwrap();
            assert!((-88.0..=-86.0).contains(&lng));
            assert!((39.0..=41.0).contains(&lat));
        }
    }

    #[test]
    fn test_geojson_rejects_open_ring() {
        let json = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]
        });
        assert!(serde_json::from_value::<ZoneGeometry>(json).is_err());
    }

    #[test]
    fn test_zone_expiry_invariant() {
        let now = Utc::now();
        assert!(RainZone::new(square(), now, now).is_err());
        assert!(RainZone::new(square(), now, now - Duration::seconds(1)).is_err());
        let zone = RainZone::new(square(), now, now + Duration::minutes(15)).unwrap();
        assert!(zone.is_live(now));
        assert!(!zone.is_live(now + Duration::minutes(15)));
    }

    #[test]
    fn test_zone_polygon_ring_is_closed() {
        let now = Utc::now();
        let zone = RainZone::new(square(), now, now + Duration::minutes(15)).unwrap();
        let ring = zone.polygon();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }
}
