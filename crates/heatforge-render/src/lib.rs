//! Tone mapping and raster output for the Heatforge heatmap engine.
//!
//! Turns a density [`Grid`] plus a [`ToneParams`] triple into an RGBA
//! [`Raster`] the viewer can draw over the map image.
//!
//! # Modules
//!
//! - [`palette`] -- Monotonic intensity-to-color gradients.
//! - [`smooth`] -- Separable Gaussian blur over grid counts.
//! - [`tone`] -- [`ToneMapper`] and the [`Raster`] it produces.
//! - [`error`] -- Error types for rendering.
//!
//! [`Grid`]: heatforge_grid::Grid
//! [`ToneParams`]: heatforge_types::ToneParams

pub mod error;
pub mod palette;
pub mod smooth;
pub mod tone;

pub use error::RenderError;
pub use palette::Palette;
pub use tone::{Raster, ToneMapper, apply_tone};
