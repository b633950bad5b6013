//! geowatch runtime - the long-lived monitor
//!
//! Wires the synchronous engine into a running service:
//! - **Monitor**: owns all engine state behind one lock
//! - **Scheduler**: jittered refresh timers with in-flight deduplication
//! - **Freshness**: per-source staleness and intelligence gaps
//! - **Feeds**: batch and replay formats

pub mod feeds;
pub mod freshness;
pub mod monitor;
pub mod scheduler;

pub use feeds::*;
pub use freshness::*;
pub use monitor::*;
pub use scheduler::*;
