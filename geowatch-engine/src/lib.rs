//! geowatch engine - composite risk signals
//!
//! Everything here is synchronous and driven by the caller's clock:
//! - **Aggregator**: owns the event store, derives country clusters and
//!   regional convergence
//! - **Convergence**: per-cell multi-kind detection with cooldown
//! - **Instability**: the Country Instability Index with learning mode
//! - **Escalation**: hotspot scores with exponential decay
//!
//! ## Hotspots
//!
//! Hotspots are defined in TOML files under `hotspots/`.
//! See [`hotspots::HotspotRegistry`] for loading and matching.

pub mod aggregator;
pub mod board;
pub mod config;
pub mod convergence;
pub mod escalation;
pub mod hotspots;
pub mod instability;
pub mod traits;

pub use aggregator::*;
pub use board::*;
pub use config::*;
pub use convergence::*;
pub use escalation::*;
pub use hotspots::*;
pub use instability::*;
pub use traits::*;
