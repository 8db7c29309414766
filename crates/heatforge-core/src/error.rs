//! Error types for the session layer.
//!
//! Per-match ingestion failures never surface here: they are recorded in
//! the session's diagnostics and the match contributes partial data.
//! [`SessionError`] covers what a caller of the session API can get back.

use heatforge_cache::CacheError;
use heatforge_grid::GridError;
use heatforge_types::{MapId, MatchId, SessionId};

use crate::maps::MapError;
use crate::pipeline::PipelineError;

/// Errors returned by [`SessionManager`](crate::session::SessionManager).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No open session has this identifier.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The match is not loaded in the session.
    #[error("match {match_id} is not loaded in session {session_id}")]
    UnknownMatch {
        /// The session.
        session_id: SessionId,
        /// The match that was not found.
        match_id: MatchId,
    },

    /// The request targets a map other than the session's active map.
    #[error("map {requested} is not active (active map is {active})")]
    InactiveMap {
        /// Map named in the request.
        requested: MapId,
        /// The session's active map.
        active: MapId,
    },

    /// A tone control holds an unusable value.
    #[error("invalid heatmap parameter: {field}")]
    InvalidParams {
        /// Name of the offending field.
        field: &'static str,
    },

    /// No match has finished ingesting yet.
    #[error("session {0} has no aggregated matches yet")]
    NotReady(SessionId),

    /// Map metadata could not be resolved.
    #[error(transparent)]
    Map(#[from] MapError),

    /// The map metadata does not describe a usable grid layout.
    #[error("grid layout error: {0}")]
    Layout(#[from] GridError),

    /// Computing a grid or raster failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A pipeline step failed outside the cache.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
