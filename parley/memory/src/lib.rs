#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Per-user conversation memory split across working, short-term and long-term tiers.

/// Store configuration and errors.
pub mod config;
/// Memory entries, tiers, annotations.
pub mod entry;
/// Coordinates, distances and the coarse location grid.
pub mod geo;
/// Importance, topic and relevance scoring.
pub mod scoring;
/// Bounded insertion-ordered tier buffers.
pub mod tiers;

/// Telemetry helpers for the memory store.
#[path = "../telemetry.rs"]
pub mod telemetry;

#[path = "../main.rs"]
pub mod orchestration_entry;

pub use config::{MemoryConfig, MemoryError};
pub use entry::{Feedback, MemoryEntry, MemoryStats, MemoryTier, ScoredMemory};
pub use geo::{Coordinates, GeoError, GridKey};
pub use orchestration_entry::TieredMemoryStore;
pub use telemetry::{MemoryTelemetry, MemoryTelemetryBuilder};
