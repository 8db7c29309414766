//! Grid geometry and the world-to-cell projection.
//!
//! A [`GridLayout`] fixes the map-space rectangle a grid covers:
//!
//! ```text
//! cell_i = floor((x - origin_x) / cell_size)
//! cell_j = floor((y - origin_y) / cell_size)
//! ```
//!
//! Row `j = 0` is the *bottom* of the map (smallest y). Renderers flip rows
//! when producing an image.

use serde::{Deserialize, Serialize};

use heatforge_types::MapInfo;

use crate::error::GridError;

/// Origin, cell size, and dimensions of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    /// World x of the left edge of column 0.
    pub origin_x: f64,
    /// World y of the bottom edge of row 0.
    pub origin_y: f64,
    /// Side length of one square cell in world units.
    pub cell_size: f64,
    /// Number of columns.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
}

impl GridLayout {
    /// Create a validated layout.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidLayout`] if the origin is not finite, the
    /// cell size is not strictly positive and finite, or a dimension is zero.
    pub fn new(origin_x: f64, origin_y: f64, cell_size: f64, width: u32, height: u32) -> Result<Self, GridError> {
        if !origin_x.is_finite() || !origin_y.is_finite() {
            return Err(GridError::InvalidLayout {
                reason: format!("origin ({origin_x}, {origin_y}) is not finite"),
            });
        }
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(GridError::InvalidLayout {
                reason: format!("cell size {cell_size} must be finite and strictly positive"),
            });
        }
        if width == 0 || height == 0 {
            return Err(GridError::InvalidLayout {
                reason: format!("dimensions {width}x{height} must be non-zero"),
            });
        }
        Ok(Self {
            origin_x,
            origin_y,
            cell_size,
            width,
            height,
        })
    }

    /// Derive the full-resolution layout for a map: one cell per image pixel.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidLayout`] if the map's bounding box or
    /// pixel dimensions are degenerate.
    pub fn for_map(info: &MapInfo) -> Result<Self, GridError> {
        if info.pixel_width == 0 {
            return Err(GridError::InvalidLayout {
                reason: format!("map {} has zero pixel width", info.map_id),
            });
        }
        let cell_size = info.bounds.width() / f64::from(info.pixel_width);
        Self::new(
            info.bounds.min_x,
            info.bounds.min_y,
            cell_size,
            info.pixel_width,
            info.pixel_height,
        )
    }

    /// Number of cells (`width * height`).
    pub fn cell_count(&self) -> usize {
        let cells = u64::from(self.width).saturating_mul(u64::from(self.height));
        usize::try_from(cells).unwrap_or(usize::MAX)
    }

    /// Number of columns as a `usize`.
    pub fn columns(&self) -> usize {
        usize::try_from(self.width).unwrap_or(usize::MAX)
    }

    /// Number of rows as a `usize`.
    pub fn rows(&self) -> usize {
        usize::try_from(self.height).unwrap_or(usize::MAX)
    }

    /// World x of the right edge of the last column.
    pub fn max_x(&self) -> f64 {
        self.origin_x + self.cell_size * f64::from(self.width)
    }

    /// World y of the top edge of the last row.
    pub fn max_y(&self) -> f64 {
        self.origin_y + self.cell_size * f64::from(self.height)
    }

    /// Project a world position to a row-major cell index.
    ///
    /// Returns `None` if the point lies outside the covered rectangle or is
    /// not finite. Points exactly on the far edges are clamped into the
    /// last column or row.
    pub fn cell_index(&self, x: f64, y: f64) -> Option<usize> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        if x < self.origin_x || y < self.origin_y || x > self.max_x() || y > self.max_y() {
            return None;
        }
        let i = clamp_cell((x - self.origin_x) / self.cell_size, self.width);
        let j = clamp_cell((y - self.origin_y) / self.cell_size, self.height);
        j.checked_mul(self.columns())?.checked_add(i)
    }

    /// Layout of the next coarser resolution level.
    ///
    /// Dimensions are halved rounding up and the cell size doubles; the
    /// origin is unchanged.
    pub fn coarser(&self) -> Self {
        Self {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            cell_size: self.cell_size * 2.0,
            width: self.width.div_ceil(2),
            height: self.height.div_ceil(2),
        }
    }

    /// Short `WxH@cell` description used in errors and logs.
    pub fn describe(&self) -> String {
        format!("{}x{}@{}", self.width, self.height, self.cell_size)
    }
}

/// Floor a fractional cell coordinate and clamp it to `[0, limit)`.
fn clamp_cell(fraction: f64, limit: u32) -> usize {
    let last = limit.saturating_sub(1);
    let floored = fraction.floor().max(0.0);
    // Callers pass in-bounds coordinates, so `floored <= limit`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let cell = floored.min(f64::from(last)) as u32;
    usize::try_from(cell).unwrap_or(0)
}
