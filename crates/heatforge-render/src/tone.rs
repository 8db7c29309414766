//! Tone mapping: grid counts to an RGBA raster.
//!
//! The per-grid maximum `M` is computed once and every cell is mapped in a
//! fixed order:
//!
//! ```text
//! v = count / M                  (0 when M == 0)
//! v = v ^ (1 / gamma)
//! v = 0.5 + (v - 0.5) * contrast
//! v = v + brightness
//! v = clamp(v, 0, 1)
//! ```
//!
//! The alpha channel carries the quantized `v`; RGB comes from the
//! [`Palette`] at the same intensity. Rows are flipped so raster row 0 is
//! the top of the map, matching the map image.

use std::borrow::Cow;
use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use tracing::debug;

use heatforge_grid::Grid;
use heatforge_types::ToneParams;

use crate::error::RenderError;
use crate::palette::{Palette, quantize_channel};
use crate::smooth::gaussian_blur;

/// Apply the tone curve to a normalized intensity.
///
/// `brightness = 0, contrast = 1, gamma = 1` returns `intensity` unchanged
/// (up to floating-point rounding).
pub fn apply_tone(intensity: f64, tone: &ToneParams) -> f64 {
    let gamma_corrected = intensity.max(0.0).powf(1.0 / tone.gamma);
    let contrasted = 0.5 + (gamma_corrected - 0.5) * tone.contrast;
    (contrasted + tone.brightness).clamp(0.0, 1.0)
}

/// A displayable heatmap image derived from exactly one grid and one tone
/// triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    image: RgbaImage,
    resolution_level: u32,
    max_count: f64,
}

impl Raster {
    /// Width in pixels (equals the grid width).
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels (equals the grid height).
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resolution level of the grid this raster was rendered from.
    pub const fn resolution_level(&self) -> u32 {
        self.resolution_level
    }

    /// The maximum count `M` used for normalization.
    pub const fn max_count(&self) -> f64 {
        self.max_count
    }

    /// RGBA of the pixel at column `x`, row `y` (row 0 at the top).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.image.get_pixel_checked(x, y).map(|pixel| pixel.0)
    }

    /// Quantized intensity (the alpha channel) at column `x`, row `y`.
    pub fn intensity(&self, x: u32, y: u32) -> Option<u8> {
        self.pixel(x, y).map(|[_, _, _, alpha]| alpha)
    }

    /// The underlying image buffer.
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Raw RGBA bytes, row-major from the top-left corner.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Heap footprint used for cache budgeting.
    pub fn size_bytes(&self) -> usize {
        self.image.as_raw().len()
    }

    /// Returns `true` if every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|pixel| pixel.0[3] == 0)
    }

    /// Encode the raster as a PNG file in memory.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Encode`] if the encoder fails.
    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

/// Converts grids into rasters with a fixed palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToneMapper {
    palette: Palette,
}

impl ToneMapper {
    /// Create a tone mapper drawing with `palette`.
    pub const fn new(palette: Palette) -> Self {
        Self { palette }
    }

    /// The palette in use.
    pub const fn palette(&self) -> Palette {
        self.palette
    }

    /// Render `grid` with `tone` into a raster of the grid's dimensions.
    ///
    /// An all-zero grid renders fully transparent regardless of the tone
    /// controls.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidTone`] for unusable tone values and
    /// [`RenderError::BufferSize`] if the pixel buffer cannot be assembled.
    pub fn render(&self, grid: &Grid, tone: &ToneParams) -> Result<Raster, RenderError> {
        if let Some(field) = tone.first_invalid_field() {
            return Err(RenderError::InvalidTone { field });
        }

        let width = grid.width();
        let height = grid.height();
        let columns = grid.layout().columns();

        let sigma = level_sigma(tone.smoothing_sigma, grid.resolution_level());
        let density: Cow<'_, [f64]> = if sigma > 0.0 {
            Cow::Owned(gaussian_blur(grid.counts(), columns, grid.layout().rows(), sigma))
        } else {
            Cow::Borrowed(grid.counts())
        };
        let max_count = density.iter().copied().fold(0.0, f64::max);

        let mut pixels = vec![0_u8; grid.layout().cell_count().saturating_mul(4)];
        if max_count > 0.0 {
            // Grid row 0 is the bottom of the map; raster row 0 is the top.
            let grid_rows = density.chunks(columns).rev();
            for (grid_row, raster_row) in grid_rows.zip(pixels.chunks_mut(columns.saturating_mul(4))) {
                for (count, pixel) in grid_row.iter().zip(raster_row.chunks_mut(4)) {
                    let value = apply_tone(count / max_count, tone);
                    let [r, g, b] = self.palette.color(value);
                    pixel.copy_from_slice(&[r, g, b, quantize_channel(value)]);
                }
            }
        }

        let image = RgbaImage::from_raw(width, height, pixels)
            .ok_or(RenderError::BufferSize { width, height })?;

        debug!(
            map = %grid.map_id(),
            level = grid.resolution_level(),
            width,
            height,
            max_count,
            "Raster rendered"
        );

        Ok(Raster {
            image,
            resolution_level: grid.resolution_level(),
            max_count,
        })
    }
}

/// `sigma` is given in full-resolution cells; each coarser level halves
/// the cell count per side, so the same world-space blur takes half the
/// sigma.
fn level_sigma(sigma: f64, resolution_level: u32) -> f64 {
    let level = i32::try_from(resolution_level).unwrap_or(i32::MAX);
    sigma * 0.5_f64.powi(level)
}
