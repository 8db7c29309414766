//! Folding event streams into density grids.
//!
//! Two entry points share the same projection and diagnostics:
//!
//! - [`SpatialAggregator::aggregate`] folds any number of per-match streams
//!   into one grid for a single event-kind filter.
//! - [`KindAccumulator`] folds one match's stream once into a partial grid
//!   per [`EventKind`], so any filter can later be answered by merging
//!   partials instead of re-reading events.
//!
//! Records with non-finite positions are skipped and counted; records
//! outside the map's bounding box are dropped and counted. Neither aborts
//! the fold.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use heatforge_types::{EventKind, EventKindFilter, EventRecord, MapId, MatchId};

use crate::error::GridError;
use crate::grid::Grid;
use crate::layout::GridLayout;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Per-fold tally of what happened to each record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationDiagnostics {
    /// Records that landed in a cell.
    pub accepted: u64,
    /// Records rejected by the event-kind filter.
    pub filtered_out: u64,
    /// Records outside the map's bounding box.
    pub out_of_range: u64,
    /// Records with a NaN or infinite position.
    pub non_finite: u64,
}

impl AggregationDiagnostics {
    /// Total number of records seen by the fold.
    pub const fn records_seen(&self) -> u64 {
        self.accepted
            .saturating_add(self.filtered_out)
            .saturating_add(self.out_of_range)
            .saturating_add(self.non_finite)
    }

    /// Add another tally to this one.
    pub const fn absorb(&mut self, other: &Self) {
        self.accepted = self.accepted.saturating_add(other.accepted);
        self.filtered_out = self.filtered_out.saturating_add(other.filtered_out);
        self.out_of_range = self.out_of_range.saturating_add(other.out_of_range);
        self.non_finite = self.non_finite.saturating_add(other.non_finite);
    }

    /// Returns `true` if any record was skipped for being malformed or
    /// off-map.
    pub const fn has_dropped_records(&self) -> bool {
        self.out_of_range > 0 || self.non_finite > 0
    }
}

/// Where a single record ended up.
enum Placement {
    Cell(usize),
    OutOfRange,
    NonFinite,
}

fn place(layout: &GridLayout, record: &EventRecord) -> Placement {
    if !record.position.is_finite() {
        return Placement::NonFinite;
    }
    layout
        .cell_index(record.position.x, record.position.y)
        .map_or(Placement::OutOfRange, Placement::Cell)
}

fn bump(counts: &mut [f64], index: usize) -> bool {
    counts.get_mut(index).is_some_and(|cell| {
        *cell += 1.0;
        true
    })
}

// ---------------------------------------------------------------------------
// Spatial aggregator
// ---------------------------------------------------------------------------

/// Result of a single-filter aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// The density grid.
    pub grid: Grid,
    /// What happened to every record.
    pub diagnostics: AggregationDiagnostics,
}

/// Folds event streams into a full-resolution grid for one map.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialAggregator {
    map_id: MapId,
    layout: GridLayout,
}

impl SpatialAggregator {
    /// Create an aggregator targeting `layout` on `map_id`.
    pub const fn new(map_id: MapId, layout: GridLayout) -> Self {
        Self { map_id, layout }
    }

    /// The target map.
    pub const fn map_id(&self) -> &MapId {
        &self.map_id
    }

    /// The target layout.
    pub const fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Fold per-match streams into a grid filtered by `event_kind_filter`.
    ///
    /// Every match listed is recorded as a contributor, even if its stream
    /// is empty. The order of streams and of records within them does not
    /// affect the result.
    pub fn aggregate<S>(
        &self,
        event_kind_filter: EventKindFilter,
        streams: impl IntoIterator<Item = (MatchId, S)>,
    ) -> Aggregation
    where
        S: IntoIterator<Item = EventRecord>,
    {
        let mut counts = vec![0.0; self.layout.cell_count()];
        let mut contributors = BTreeSet::new();
        let mut diagnostics = AggregationDiagnostics::default();

        for (match_id, stream) in streams {
            contributors.insert(match_id);
            for record in stream {
                if !event_kind_filter.accepts(record.event_kind) {
                    diagnostics.filtered_out = diagnostics.filtered_out.saturating_add(1);
                    continue;
                }
                match place(&self.layout, &record) {
                    Placement::Cell(index) => {
                        if bump(&mut counts, index) {
                            diagnostics.accepted = diagnostics.accepted.saturating_add(1);
                        } else {
                            diagnostics.out_of_range = diagnostics.out_of_range.saturating_add(1);
                        }
                    }
                    Placement::OutOfRange => {
                        diagnostics.out_of_range = diagnostics.out_of_range.saturating_add(1);
                    }
                    Placement::NonFinite => {
                        diagnostics.non_finite = diagnostics.non_finite.saturating_add(1);
                    }
                }
            }
        }

        debug!(
            map = %self.map_id,
            filter = %event_kind_filter,
            matches = contributors.len(),
            accepted = diagnostics.accepted,
            out_of_range = diagnostics.out_of_range,
            non_finite = diagnostics.non_finite,
            "Aggregation finished"
        );

        let grid = Grid::empty(self.map_id.clone(), self.layout, event_kind_filter);
        let grid = contributors
            .into_iter()
            .fold(grid, Grid::with_contributor);
        Aggregation {
            grid: grid.with_counts(counts),
            diagnostics,
        }
    }

    /// Start a per-kind fold for a single match.
    pub fn accumulator(&self, match_id: MatchId) -> KindAccumulator {
        KindAccumulator::new(self.map_id.clone(), self.layout, match_id)
    }
}

// ---------------------------------------------------------------------------
// Per-kind accumulator
// ---------------------------------------------------------------------------

/// One match's contribution, split by event kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindGrids {
    /// The match these partials came from.
    pub match_id: MatchId,
    /// One full-resolution grid per event kind, filtered by `Only(kind)`.
    pub grids: BTreeMap<EventKind, Grid>,
    /// What happened to every record of the match.
    pub diagnostics: AggregationDiagnostics,
}

impl KindGrids {
    /// Partials that pass `filter`, ready for [`Grid::sum`].
    pub fn matching(&self, filter: EventKindFilter) -> impl Iterator<Item = &Grid> {
        self.grids
            .iter()
            .filter(move |(kind, _)| filter.accepts(**kind))
            .map(|(_, grid)| grid)
    }

    /// Heap footprint of all per-kind partials.
    pub fn size_bytes(&self) -> usize {
        self.grids.values().map(Grid::size_bytes).fold(0, usize::saturating_add)
    }
}

/// Mutable fold state for one match, producing a [`KindGrids`].
///
/// Workers own their accumulator exclusively; nothing is shared until
/// [`finish`](Self::finish) hands the partials to the merge point.
#[derive(Debug, Clone)]
pub struct KindAccumulator {
    map_id: MapId,
    layout: GridLayout,
    match_id: MatchId,
    counts: BTreeMap<EventKind, Vec<f64>>,
    diagnostics: AggregationDiagnostics,
}

impl KindAccumulator {
    /// Create an empty accumulator for `match_id`.
    pub fn new(map_id: MapId, layout: GridLayout, match_id: MatchId) -> Self {
        let cells = layout.cell_count();
        let counts = EventKind::ALL
            .iter()
            .map(|kind| (*kind, vec![0.0; cells]))
            .collect();
        Self {
            map_id,
            layout,
            match_id,
            counts,
            diagnostics: AggregationDiagnostics::default(),
        }
    }

    /// Fold a single record.
    pub fn fold(&mut self, record: &EventRecord) {
        match place(&self.layout, record) {
            Placement::Cell(index) => {
                let landed = self
                    .counts
                    .get_mut(&record.event_kind)
                    .is_some_and(|counts| bump(counts, index));
                if landed {
                    self.diagnostics.accepted = self.diagnostics.accepted.saturating_add(1);
                } else {
                    self.diagnostics.out_of_range = self.diagnostics.out_of_range.saturating_add(1);
                }
            }
            Placement::OutOfRange => {
                self.diagnostics.out_of_range = self.diagnostics.out_of_range.saturating_add(1);
            }
            Placement::NonFinite => {
                self.diagnostics.non_finite = self.diagnostics.non_finite.saturating_add(1);
            }
        }
    }

    /// Diagnostics gathered so far.
    pub const fn diagnostics(&self) -> &AggregationDiagnostics {
        &self.diagnostics
    }

    /// Close the fold and build one grid per kind.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] only if the accumulated counts violate a grid
    /// invariant, which cannot happen for counts built by [`fold`](Self::fold).
    pub fn finish(self) -> Result<KindGrids, GridError> {
        let mut grids = BTreeMap::new();
        for (kind, counts) in self.counts {
            let grid = Grid::from_counts(
                self.map_id.clone(),
                self.layout,
                EventKindFilter::Only(kind),
                0,
                counts,
                BTreeSet::from([self.match_id]),
            )?;
            grids.insert(kind, grid);
        }
        Ok(KindGrids {
            match_id: self.match_id,
            grids,
            diagnostics: self.diagnostics,
        })
    }
}
