//! Configuration, ingestion seams, and session orchestration for the
//! Heatforge heatmap engine.
//!
//! This crate ties the pure grid and render stages to the outside world:
//! it reads events through an [`EventIngestor`], resolves map metadata
//! through a [`MapProvider`], and serves heatmaps to viewer sessions
//! through the [`SessionManager`].
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `heatforge.yaml` into
//!   strongly-typed structs.
//! - [`ingest`] -- [`EventIngestor`] trait, the in-memory ingestor, and the
//!   JSON Lines file ingestor.
//! - [`maps`] -- [`MapProvider`] trait and [`StaticMapProvider`].
//! - [`pipeline`] -- Pure pipeline steps: per-match ingestion, grid
//!   composition, and resolution level admission.
//! - [`session`] -- [`SessionManager`]: session lifecycle, background
//!   ingestion, and heatmap requests.
//! - [`error`] -- [`SessionError`], returned by the session API.
//!
//! [`EventIngestor`]: ingest::EventIngestor
//! [`MapProvider`]: maps::MapProvider
//! [`StaticMapProvider`]: maps::StaticMapProvider
//! [`SessionManager`]: session::SessionManager
//! [`SessionError`]: error::SessionError

pub mod config;
pub mod error;
pub mod ingest;
pub mod maps;
pub mod pipeline;
pub mod session;

pub use config::{ConfigError, EngineConfig};
pub use error::SessionError;
pub use ingest::{EventIngestor, EventStream, IngestionError, JsonLinesIngestor, MemoryIngestor};
pub use maps::{MapError, MapProvider, StaticMapProvider};
pub use pipeline::MatchDiagnostics;
pub use session::{Heatmap, SessionManager, SessionPhase, SessionStatus};
