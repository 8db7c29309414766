//! Error types for the `heatforge-render` crate.

/// Errors that can occur while tone mapping or encoding a raster.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A tone-mapping parameter is unusable (non-finite, gamma <= 0, ...).
    #[error("invalid tone parameter: {field}")]
    InvalidTone {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The pixel buffer does not match the raster dimensions.
    #[error("pixel buffer does not fit a {width}x{height} raster")]
    BufferSize {
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
    },

    /// Image encoding failed.
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
