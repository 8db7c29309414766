//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of a render run so that the
//! helpers in `main` can propagate with `?`.

use std::path::PathBuf;

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: heatforge_core::ConfigError,
    },

    /// A session operation failed.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: heatforge_core::SessionError,
    },

    /// Encoding the raster failed.
    #[error("render error: {source}")]
    Render {
        /// The underlying render error.
        #[from]
        source: heatforge_render::RenderError,
    },

    /// Writing an output file failed.
    #[error("failed to write {path}: {source}")]
    Output {
        /// The file being written.
        path: PathBuf,
        /// The I/O failure.
        source: std::io::Error,
    },

    /// Serializing the session status failed.
    #[error("status serialization failed: {source}")]
    Status {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
