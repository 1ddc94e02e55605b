pub mod contour;
pub mod observations;
pub mod radar;
pub mod regions;
pub mod resolver;
pub mod sampler;
pub mod warmer;
pub mod zone_cache;
