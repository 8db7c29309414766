//! Area-sum downsampling into a mip pyramid.
//!
//! Each coarser level halves width and height (rounding up). A coarse cell
//! holds the sum of the up-to-four finer cells it covers, so the total
//! event mass is identical at every level:
//!
//! ```text
//! coarse[i, j] = fine[2i, 2j] + fine[2i+1, 2j] + fine[2i, 2j+1] + fine[2i+1, 2j+1]
//! ```
//!
//! Descent stops once either dimension would fall below the configured
//! minimum; that last grid is the terminal level.

use heatforge_types::{EventKindFilter, MapId};
use tracing::debug;

use crate::error::GridError;
use crate::grid::Grid;
use crate::layout::GridLayout;

/// Smallest width or height a derived level may have.
pub const DEFAULT_MIN_DIMENSION: u32 = 2;

/// Derives progressively coarser grids from a full-resolution grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownsampleEngine {
    min_dimension: u32,
}

impl Default for DownsampleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DIMENSION)
    }
}

impl DownsampleEngine {
    /// Create an engine that never produces a level narrower or shorter
    /// than `min_dimension` cells. A minimum of zero is treated as one.
    pub const fn new(min_dimension: u32) -> Self {
        Self {
            min_dimension: if min_dimension == 0 { 1 } else { min_dimension },
        }
    }

    /// The configured minimum dimension.
    pub const fn min_dimension(&self) -> u32 {
        self.min_dimension
    }

    /// Returns `true` if `grid` is the terminal level: halving it would
    /// push a dimension below the minimum.
    pub const fn is_terminal(&self, grid: &Grid) -> bool {
        self.is_terminal_layout(grid.layout())
    }

    /// [`is_terminal`](Self::is_terminal) for a grid over `layout` that
    /// has not been built.
    pub const fn is_terminal_layout(&self, layout: &GridLayout) -> bool {
        layout.width.div_ceil(2) < self.min_dimension || layout.height.div_ceil(2) < self.min_dimension
            // A 1xN grid cannot shrink along that axis; stop rather than loop.
            || (layout.width == 1 && layout.height == 1)
    }

    /// Resolution level of the terminal grid below `base`.
    pub fn terminal_level(&self, base: &GridLayout) -> u32 {
        let mut layout = *base;
        let mut level: u32 = 0;
        while !self.is_terminal_layout(&layout) {
            layout = layout.coarser();
            level = level.saturating_add(1);
        }
        level
    }

    /// Sum full-resolution `parts` directly into resolution level `level`,
    /// clamped at the terminal level.
    ///
    /// Equivalent to [`Grid::sum`] followed by `level` calls to
    /// [`downsample`](Self::downsample), without building the finer grids.
    ///
    /// # Errors
    ///
    /// Returns a mismatch error if a part is not a full-resolution grid over
    /// `base` compatible with `filter`.
    pub fn compose_level<'a>(
        &self,
        map_id: &MapId,
        base: GridLayout,
        filter: EventKindFilter,
        level: u32,
        parts: impl IntoIterator<Item = &'a Grid>,
    ) -> Result<Grid, GridError> {
        let level = level.min(self.terminal_level(&base));
        Grid::sum_coarsened(map_id, base, filter, level, parts)
    }

    /// Produce the next coarser level.
    ///
    /// Downsampling a terminal grid is a no-op that returns an identical
    /// copy, so calling this repeatedly is idempotent at the bottom.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] only if the summed counts violate a grid
    /// invariant, which cannot happen for a valid input grid.
    pub fn downsample(&self, grid: &Grid) -> Result<Grid, GridError> {
        if self.is_terminal(grid) {
            return Ok(grid.clone());
        }

        let fine_layout = grid.layout();
        let coarse_layout = fine_layout.coarser();
        let coarse_columns = coarse_layout.columns();
        let mut coarse = vec![0.0; coarse_layout.cell_count()];

        for (j, row) in grid.counts().chunks(fine_layout.columns()).enumerate() {
            let Some(base) = (j / 2).checked_mul(coarse_columns) else {
                continue;
            };
            for (i, &count) in row.iter().enumerate() {
                let target = base.checked_add(i / 2);
                if let Some(cell) = target.and_then(|index| coarse.get_mut(index)) {
                    *cell += count;
                }
            }
        }

        Grid::from_counts(
            grid.map_id().clone(),
            coarse_layout,
            grid.event_kind_filter(),
            grid.resolution_level().saturating_add(1),
            coarse,
            grid.contributors().clone(),
        )
    }

    /// Build the full pyramid: `grid` itself at index 0, then every coarser
    /// level down to and including the terminal one.
    ///
    /// # Errors
    ///
    /// Propagates any [`GridError`] from [`downsample`](Self::downsample).
    pub fn pyramid(&self, grid: &Grid) -> Result<Vec<Grid>, GridError> {
        let mut levels = vec![grid.clone()];
        let mut current = grid.clone();
        while !self.is_terminal(&current) {
            current = self.downsample(&current)?;
            levels.push(current.clone());
        }
        debug!(
            map = %grid.map_id(),
            levels = levels.len(),
            base = %grid.layout().describe(),
            "Pyramid built"
        );
        Ok(levels)
    }
}
