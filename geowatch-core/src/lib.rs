//! geowatch core - event model and spatial primitives
//!
//! This crate provides the foundational pieces every other crate builds on:
//! - Signal kinds, normalized events and per-kind retention windows
//! - Producer payloads as they arrive from the feed adapters
//! - The event normalizer (payload -> `NormalizedEvent`)
//! - A coarse lat/lon spatial grid for proximity lookups
//! - Country and data-source registries

pub mod countries;
pub mod events;
pub mod geo;
pub mod grid;
pub mod normalize;
pub mod signals;
pub mod sources;

pub use countries::*;
pub use events::*;
pub use geo::*;
pub use grid::*;
pub use normalize::*;
pub use signals::*;
pub use sources::*;

use thiserror::Error;

/// Default grid bucket size in degrees (both axes)
pub const DEFAULT_BUCKET_DEGREES: f64 = 2.0;

/// Default maximum number of events held per grid cell
pub const DEFAULT_CELL_CAPACITY: usize = 500;

/// Mean Earth radius used for haversine distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Errors from core primitives
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid grid bucket size: {0} degrees")]
    InvalidBucket(f64),

    #[error("Invalid cell capacity: {0}")]
    InvalidCapacity(usize),
}
