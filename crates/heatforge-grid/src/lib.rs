//! Density grids, spatial aggregation, and downsampling for the Heatforge
//! heatmap engine.
//!
//! This crate turns streams of [`EventRecord`]s into 2D density histograms
//! over map space and derives coarser resolution levels from them.
//!
//! # Modules
//!
//! - [`layout`] -- [`GridLayout`]: origin, cell size, and dimensions, plus
//!   the world-to-cell projection.
//! - [`grid`] -- The immutable [`Grid`] and its commutative merge.
//! - [`aggregate`] -- [`SpatialAggregator`] and the per-kind accumulator
//!   used by ingestion workers.
//! - [`downsample`] -- [`DownsampleEngine`]: area-sum mip levels.
//! - [`error`] -- Error types for grid construction and merging.
//!
//! # Merge Law
//!
//! Grids with the same map, layout, and resolution level form a
//! commutative monoid under [`Grid::merge`], with the empty grid as
//! identity. Matches can therefore be folded independently, in parallel,
//! and merged in any order.
//!
//! [`EventRecord`]: heatforge_types::EventRecord

pub mod aggregate;
pub mod downsample;
pub mod error;
pub mod grid;
pub mod layout;

// Re-export primary types at crate root.
pub use aggregate::{Aggregation, AggregationDiagnostics, KindAccumulator, KindGrids, SpatialAggregator};
pub use downsample::{DEFAULT_MIN_DIMENSION, DownsampleEngine};
pub use error::GridError;
pub use grid::Grid;
pub use layout::GridLayout;
