//! Rain zone engine: radar sampling, concave-hull contours, top-N region
//! detection and a geometry-aware zone cache behind `ZoneResolver::resolve`.

pub mod config;
pub mod db;
pub mod errors;
pub mod grid;
pub mod hull;
pub mod models;
pub mod services;

pub use errors::ZoneError;
pub use models::{Coordinate, RainZone, Region, ZoneGeometry};
pub use services::resolver::{Resolution, ZoneResolver};
