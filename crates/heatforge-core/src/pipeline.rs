//! Pure pipeline steps: ingesting a match into per-kind partials,
//! composing a grid for a request, and admitting resolution levels.
//!
//! Everything here is synchronous and free of shared state, so the
//! session layer can run it on blocking worker threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use heatforge_grid::{AggregationDiagnostics, DownsampleEngine, Grid, GridError, GridLayout, KindAccumulator, KindGrids};
use heatforge_types::{EventKind, EventKindFilter, MapId, MatchId};

use crate::ingest::EventIngestor;

/// Errors raised by pipeline steps.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A grid at this level would exceed the configured memory ceiling.
    #[error("grid at level {level} needs {size_bytes} bytes, ceiling is {limit_bytes}")]
    ResourceExhausted {
        /// Resolution level of the rejected grid.
        level: u32,
        /// Bytes the grid occupies.
        size_bytes: usize,
        /// Configured ceiling.
        limit_bytes: usize,
    },

    /// A grid operation failed.
    #[error("grid error: {0}")]
    Grid(#[from] GridError),
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// What ingesting one match produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchDiagnostics {
    /// Per-record outcome counts.
    pub events: AggregationDiagnostics,
    /// Set when the stream failed; the match then contributed partial data.
    pub ingestion_error: Option<String>,
}

impl MatchDiagnostics {
    /// Returns `true` if the match contributed only part of its data.
    pub const fn is_partial(&self) -> bool {
        self.ingestion_error.is_some()
    }
}

/// Per-kind partial grids of one match plus its diagnostics.
#[derive(Debug, Clone)]
pub struct MatchIngest {
    /// One full-resolution grid per event kind.
    pub partials: KindGrids,
    /// Outcome of the ingestion.
    pub diagnostics: MatchDiagnostics,
}

/// Fold one match's event stream into per-kind partial grids.
///
/// An ingestion error ends the fold; the partials keep every record
/// delivered before it and the error is recorded in the diagnostics.
///
/// # Errors
///
/// Returns a [`GridError`] only if the partial grids cannot be built.
pub fn ingest_match(
    ingestor: &dyn EventIngestor,
    map_id: &MapId,
    layout: GridLayout,
    match_id: MatchId,
) -> Result<MatchIngest, GridError> {
    let mut accumulator = KindAccumulator::new(map_id.clone(), layout, match_id);
    let mut ingestion_error = None;

    match ingestor.stream(match_id) {
        Ok(stream) => {
            for item in stream {
                match item {
                    Ok(record) => accumulator.fold(&record),
                    Err(error) => {
                        ingestion_error = Some(error.to_string());
                        break;
                    }
                }
            }
        }
        Err(error) => ingestion_error = Some(error.to_string()),
    }

    let events = *accumulator.diagnostics();
    Ok(MatchIngest {
        partials: accumulator.finish()?,
        diagnostics: MatchDiagnostics { events, ingestion_error },
    })
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Running per-kind sum over a set of matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KindTotals {
    grids: BTreeMap<EventKind, Grid>,
}

impl KindTotals {
    /// Sum the partials of every match in `matches`.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] if the partials do not share a layout.
    pub fn from_partials<'a>(matches: impl IntoIterator<Item = &'a KindGrids>) -> Result<Self, GridError> {
        let mut totals = Self::default();
        for partials in matches {
            totals.absorb(partials)?;
        }
        Ok(totals)
    }

    /// Add one match's partials to the totals.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] if the partials do not share a layout.
    pub fn absorb(&mut self, partials: &KindGrids) -> Result<(), GridError> {
        for (kind, grid) in &partials.grids {
            let merged = match self.grids.get(kind) {
                Some(existing) => existing.merge(grid)?,
                None => grid.clone(),
            };
            self.grids.insert(*kind, merged);
        }
        Ok(())
    }

    /// Per-kind totals that pass `filter`.
    pub fn matching(&self, filter: EventKindFilter) -> impl Iterator<Item = &Grid> {
        self.grids
            .iter()
            .filter(move |(kind, _)| filter.accepts(**kind))
            .map(|(_, grid)| grid)
    }

    /// Returns `true` if no match has been absorbed.
    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// Heap footprint of the per-kind totals.
    pub fn size_bytes(&self) -> usize {
        self.grids.values().map(Grid::size_bytes).fold(0, usize::saturating_add)
    }
}

/// The per-kind data a request's grid is composed from.
#[derive(Debug, Clone)]
pub enum GridSource {
    /// The running totals, when the request covers every ready match.
    Totals(Arc<KindTotals>),
    /// Individual match partials, for any other subset.
    Matches(Vec<Arc<KindGrids>>),
}

impl GridSource {
    /// Compose the grid for `filter` at resolution `level` below `layout`.
    ///
    /// Partials are summed straight into the target level, so no finer
    /// grid is allocated on the way.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] if a partial does not fit `layout`.
    pub fn compose(
        &self,
        map_id: &MapId,
        layout: GridLayout,
        filter: EventKindFilter,
        downsampler: &DownsampleEngine,
        level: u32,
    ) -> Result<Grid, GridError> {
        match self {
            Self::Totals(totals) => downsampler.compose_level(map_id, layout, filter, level, totals.matching(filter)),
            Self::Matches(matches) => downsampler.compose_level(
                map_id,
                layout,
                filter,
                level,
                matches.iter().flat_map(|partials| partials.matching(filter)),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Level admission
// ---------------------------------------------------------------------------

/// Outcome of checking a grid against the rendering limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Render this level.
    Accept,
    /// Too many cells to render directly; try the next coarser level.
    TooManyCells {
        /// Cells in the grid.
        cells: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Limits that decide which resolution level is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPolicy {
    /// Largest cell count rendered directly.
    pub max_render_cells: usize,
    /// Largest grid footprint in bytes.
    pub max_grid_bytes: usize,
}

impl LevelPolicy {
    /// Check a level over `layout` against the limits before its grid is
    /// built. The terminal level is always accepted, since nothing coarser
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ResourceExhausted`] if a non-terminal grid
    /// over `layout` would exceed the memory ceiling.
    pub fn admit(
        &self,
        layout: &GridLayout,
        level: u32,
        contributors: usize,
        terminal: bool,
    ) -> Result<Admission, PipelineError> {
        if terminal {
            return Ok(Admission::Accept);
        }
        let size_bytes = Grid::footprint(layout, contributors);
        if size_bytes > self.max_grid_bytes {
            return Err(PipelineError::ResourceExhausted {
                level,
                size_bytes,
                limit_bytes: self.max_grid_bytes,
            });
        }
        let cells = layout.cell_count();
        if cells > self.max_render_cells {
            return Ok(Admission::TooManyCells {
                cells,
                limit: self.max_render_cells,
            });
        }
        Ok(Admission::Accept)
    }
}
