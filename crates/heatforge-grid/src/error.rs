//! Error types for the `heatforge-grid` crate.
//!
//! All fallible operations in this crate return [`GridError`] through the
//! standard [`Result`] type alias.

use heatforge_types::MapId;

/// Errors that can occur while building or combining grids.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// The layout has a non-positive or non-finite extent.
    #[error("invalid grid layout: {reason}")]
    InvalidLayout {
        /// What is wrong with the layout.
        reason: String,
    },

    /// The number of counts does not match `width * height`.
    #[error("grid has {actual} counts, expected {expected}")]
    LengthMismatch {
        /// `width * height` of the layout.
        expected: usize,
        /// Length of the supplied counts.
        actual: usize,
    },

    /// A count is negative or not finite.
    #[error("grid count at index {index} is invalid: {value}")]
    InvalidCount {
        /// Row-major index of the offending cell.
        index: usize,
        /// The offending value.
        value: f64,
    },

    /// Two grids for different maps were combined.
    #[error("cannot merge grids of different maps ({left} vs {right})")]
    MapMismatch {
        /// Map of the left operand.
        left: MapId,
        /// Map of the right operand.
        right: MapId,
    },

    /// Two grids with different layouts or resolution levels were combined.
    #[error("cannot merge grids with different shapes ({left} vs {right})")]
    ShapeMismatch {
        /// Shape description of the left operand.
        left: String,
        /// Shape description of the right operand.
        right: String,
    },

    /// A partial grid's event filter is not covered by the target filter.
    #[error("partial grid filtered by {part} cannot contribute to a grid filtered by {target}")]
    FilterMismatch {
        /// Filter of the target grid.
        target: heatforge_types::EventKindFilter,
        /// Filter of the partial grid.
        part: heatforge_types::EventKindFilter,
    },
}
