//! Shared type definitions for the Heatforge heatmap engine.
//!
//! This crate is the single source of truth for the value types that flow
//! between ingestion, aggregation, rendering, and the session layer.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifiers for matches, sessions, actors, and maps
//! - [`event`] -- The canonical [`EventRecord`] and event-kind filtering
//! - [`map`] -- Map-space bounding boxes and radar metadata
//! - [`params`] -- [`HeatmapParams`] and the tone-mapping triple

pub mod event;
pub mod ids;
pub mod map;
pub mod params;

// Re-export all public types at crate root for convenience.
pub use event::{EventKind, EventKindFilter, EventRecord, Position};
pub use ids::{ActorId, MapId, MatchId, SessionId};
pub use map::{MapBounds, MapInfo};
pub use params::{HeatmapParams, ToneParams};
