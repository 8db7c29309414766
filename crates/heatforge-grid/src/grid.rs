//! The immutable density [`Grid`].
//!
//! A grid is built once per (map, event filter, resolution level, set of
//! contributing matches) and never mutated afterwards. Changing any of
//! those inputs produces a new grid.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use heatforge_types::{EventKindFilter, MapId, MatchId};

use crate::error::GridError;
use crate::layout::GridLayout;

/// Fixed per-grid overhead counted towards cache budgets, in bytes.
const GRID_OVERHEAD_BYTES: usize = 128;

/// 2D density histogram of events over map space.
///
/// Invariants, enforced by every constructor:
/// - `counts.len() == width * height`
/// - every count is finite and `>= 0`
/// - `cell_size` is strictly positive (see [`GridLayout::new`])
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    map_id: MapId,
    layout: GridLayout,
    counts: Vec<f64>,
    event_kind_filter: EventKindFilter,
    resolution_level: u32,
    contributors: BTreeSet<MatchId>,
}

impl Grid {
    /// Create an all-zero full-resolution grid with no contributors.
    ///
    /// This is the identity element of [`Grid::merge`].
    pub fn empty(map_id: MapId, layout: GridLayout, event_kind_filter: EventKindFilter) -> Self {
        Self {
            map_id,
            counts: vec![0.0; layout.cell_count()],
            layout,
            event_kind_filter,
            resolution_level: 0,
            contributors: BTreeSet::new(),
        }
    }

    /// Create a grid from raw counts.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::LengthMismatch`] if `counts` does not have
    /// `width * height` entries, or [`GridError::InvalidCount`] if any count
    /// is negative or not finite.
    pub fn from_counts(
        map_id: MapId,
        layout: GridLayout,
        event_kind_filter: EventKindFilter,
        resolution_level: u32,
        counts: Vec<f64>,
        contributors: BTreeSet<MatchId>,
    ) -> Result<Self, GridError> {
        let expected = layout.cell_count();
        if counts.len() != expected {
            return Err(GridError::LengthMismatch {
                expected,
                actual: counts.len(),
            });
        }
        if let Some((index, &value)) = counts
            .iter()
            .enumerate()
            .find(|(_, value)| !value.is_finite() || **value < 0.0)
        {
            return Err(GridError::InvalidCount { index, value });
        }
        Ok(Self {
            map_id,
            layout,
            counts,
            event_kind_filter,
            resolution_level,
            contributors,
        })
    }

    /// The map this grid covers.
    pub const fn map_id(&self) -> &MapId {
        &self.map_id
    }

    /// Geometry of the grid.
    pub const fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Number of columns.
    pub const fn width(&self) -> u32 {
        self.layout.width
    }

    /// Number of rows.
    pub const fn height(&self) -> u32 {
        self.layout.height
    }

    /// Side length of a cell in world units.
    pub const fn cell_size(&self) -> f64 {
        self.layout.cell_size
    }

    /// Row-major cell counts, row 0 at the bottom of the map.
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Which event kinds contributed.
    pub const fn event_kind_filter(&self) -> EventKindFilter {
        self.event_kind_filter
    }

    /// Mip level: 0 is full resolution, each level halves both dimensions.
    pub const fn resolution_level(&self) -> u32 {
        self.resolution_level
    }

    /// Matches whose events contributed.
    pub const fn contributors(&self) -> &BTreeSet<MatchId> {
        &self.contributors
    }

    /// Count at column `i`, row `j`, or `None` if out of range.
    pub fn get(&self, i: u32, j: u32) -> Option<f64> {
        if i >= self.layout.width || j >= self.layout.height {
            return None;
        }
        let row = usize::try_from(j).ok()?;
        let col = usize::try_from(i).ok()?;
        let index = row.checked_mul(self.layout.columns())?.checked_add(col)?;
        self.counts.get(index).copied()
    }

    /// Sum of all counts (the total event mass).
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Largest single cell count, `0.0` for an all-zero grid.
    pub fn max_count(&self) -> f64 {
        self.counts.iter().copied().fold(0.0, f64::max)
    }

    /// Number of cells with a non-zero count.
    pub fn nonzero_cells(&self) -> usize {
        self.counts.iter().filter(|count| **count > 0.0).count()
    }

    /// Approximate heap footprint, used for cache budgeting.
    pub fn size_bytes(&self) -> usize {
        Self::footprint(&self.layout, self.contributors.len())
    }

    /// Footprint of a grid over `layout` with `contributors` matches, known
    /// before the grid is built.
    pub fn footprint(layout: &GridLayout, contributors: usize) -> usize {
        layout
            .cell_count()
            .saturating_mul(core::mem::size_of::<f64>())
            .saturating_add(contributors.saturating_mul(core::mem::size_of::<MatchId>()))
            .saturating_add(GRID_OVERHEAD_BYTES)
    }

    /// Combine two grids cell by cell.
    ///
    /// The merge is commutative and associative; contributors are unioned.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::MapMismatch`], [`GridError::ShapeMismatch`], or
    /// [`GridError::FilterMismatch`] if the grids are not compatible.
    pub fn merge(&self, other: &Self) -> Result<Self, GridError> {
        self.check_compatible(other)?;
        if self.event_kind_filter != other.event_kind_filter {
            return Err(GridError::FilterMismatch {
                target: self.event_kind_filter,
                part: other.event_kind_filter,
            });
        }
        let mut merged = self.clone();
        merged.absorb(other);
        Ok(merged)
    }

    /// Sum a set of partial grids into a grid for `event_kind_filter`.
    ///
    /// Each part must be filtered by `event_kind_filter` itself or by a
    /// single kind that the filter accepts. This is how an `Any` grid is
    /// assembled from per-kind partials.
    ///
    /// # Errors
    ///
    /// Returns a mismatch error if any part is incompatible with the layout,
    /// map, or filter.
    pub fn sum<'a>(
        map_id: &MapId,
        layout: GridLayout,
        event_kind_filter: EventKindFilter,
        parts: impl IntoIterator<Item = &'a Self>,
    ) -> Result<Self, GridError> {
        Self::sum_coarsened(map_id, layout, event_kind_filter, 0, parts)
    }

    /// Sum full-resolution `parts` laid out as `layout` straight into a grid
    /// `levels` halvings coarser.
    ///
    /// Fine cell `(i, j)` lands in coarse cell `(i >> levels, j >> levels)`,
    /// the same cell repeated [`DownsampleEngine::downsample`] calls would
    /// put it in, so none of the intermediate levels is allocated.
    ///
    /// Callers clamp `levels` at the terminal level; see
    /// [`DownsampleEngine::compose_level`].
    ///
    /// # Errors
    ///
    /// Same as [`sum`](Self::sum).
    ///
    /// [`DownsampleEngine::downsample`]: crate::DownsampleEngine::downsample
    /// [`DownsampleEngine::compose_level`]: crate::DownsampleEngine::compose_level
    pub fn sum_coarsened<'a>(
        map_id: &MapId,
        layout: GridLayout,
        event_kind_filter: EventKindFilter,
        levels: u32,
        parts: impl IntoIterator<Item = &'a Self>,
    ) -> Result<Self, GridError> {
        let mut coarse_layout = layout;
        for _ in 0..levels {
            coarse_layout = coarse_layout.coarser();
        }
        let mut total = Self::empty(map_id.clone(), coarse_layout, event_kind_filter);
        total.resolution_level = levels;
        for part in parts {
            check_shape(map_id, &layout, 0, part)?;
            let covered = match part.event_kind_filter {
                EventKindFilter::Only(kind) => event_kind_filter.accepts(kind),
                EventKindFilter::Any => event_kind_filter == EventKindFilter::Any,
            };
            if !covered {
                return Err(GridError::FilterMismatch {
                    target: event_kind_filter,
                    part: part.event_kind_filter,
                });
            }
            if levels == 0 {
                total.absorb(part);
            } else {
                total.absorb_coarsened(part, levels);
            }
        }
        Ok(total)
    }

    /// Record a match as a contributor even if it produced no events.
    #[must_use]
    pub fn with_contributor(mut self, match_id: MatchId) -> Self {
        self.contributors.insert(match_id);
        self
    }

    /// Replace the counts of a freshly built grid.
    ///
    /// Only used by the aggregator, whose counts have the layout's length
    /// and are non-negative by construction.
    pub(crate) fn with_counts(mut self, counts: Vec<f64>) -> Self {
        if counts.len() == self.counts.len() {
            self.counts = counts;
        }
        self
    }

    fn check_compatible(&self, other: &Self) -> Result<(), GridError> {
        check_shape(&self.map_id, &self.layout, self.resolution_level, other)
    }

    fn absorb(&mut self, other: &Self) {
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += *theirs;
        }
        self.contributors.extend(other.contributors.iter().copied());
    }

    fn absorb_coarsened(&mut self, fine: &Self, levels: u32) {
        let coarse_columns = self.layout.columns();
        for (j, row) in fine.counts.chunks(fine.layout.columns().max(1)).enumerate() {
            let Some(base) = j.checked_shr(levels).and_then(|coarse_row| coarse_row.checked_mul(coarse_columns)) else {
                continue;
            };
            for (i, &count) in row.iter().enumerate() {
                let target = i.checked_shr(levels).and_then(|column| base.checked_add(column));
                if let Some(cell) = target.and_then(|index| self.counts.get_mut(index)) {
                    *cell += count;
                }
            }
        }
        self.contributors.extend(fine.contributors.iter().copied());
    }
}

fn check_shape(map_id: &MapId, layout: &GridLayout, level: u32, part: &Grid) -> Result<(), GridError> {
    if *map_id != part.map_id {
        return Err(GridError::MapMismatch {
            left: map_id.clone(),
            right: part.map_id.clone(),
        });
    }
    if *layout != part.layout || level != part.resolution_level {
        return Err(GridError::ShapeMismatch {
            left: format!("{} level {level}", layout.describe()),
            right: format!("{} level {}", part.layout.describe(), part.resolution_level),
        });
    }
    Ok(())
}
