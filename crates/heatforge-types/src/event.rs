//! The canonical spatial event produced by match-file ingestion.
//!
//! An [`EventRecord`] is immutable once produced. The aggregation pipeline
//! owns records only for the duration of a single fold; grids are the
//! durable artifact.

use serde::{Deserialize, Serialize};

use crate::ids::{ActorId, MatchId};

/// The kind of spatial event recorded in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An actor moved and produced a footstep sample.
    Footstep,
    /// An actor died at this position.
    Death,
    /// Any other positional event (grenade detonations, pickups, ...).
    Other,
}

impl EventKind {
    /// Every event kind, in a fixed order.
    pub const ALL: [Self; 3] = [Self::Footstep, Self::Death, Self::Other];

    /// Short lowercase name used in logs and on the command line.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Footstep => "footstep",
            Self::Death => "death",
            Self::Other => "other",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which event kinds contribute to a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKindFilter {
    /// Events of every kind contribute.
    #[default]
    Any,
    /// Only events of the given kind contribute.
    Only(EventKind),
}

impl EventKindFilter {
    /// Returns `true` if events of `kind` pass this filter.
    pub const fn accepts(self, kind: EventKind) -> bool {
        match self {
            Self::Any => true,
            Self::Only(wanted) => wanted as u8 == kind as u8,
        }
    }

    /// Parse a filter from its command-line spelling.
    ///
    /// Accepts `any`, `footstep`, `death`, and `other` (plural forms too).
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "any" | "all" => Some(Self::Any),
            "footstep" | "footsteps" => Some(Self::Only(EventKind::Footstep)),
            "death" | "deaths" => Some(Self::Only(EventKind::Death)),
            "other" => Some(Self::Only(EventKind::Other)),
            _ => None,
        }
    }
}

impl core::fmt::Display for EventKindFilter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Only(kind) => write!(f, "{kind}"),
        }
    }
}

/// A position in map (world) space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// World x coordinate.
    pub x: f64,
    /// World y coordinate.
    pub y: f64,
    /// World z coordinate (height). Not used for 2D density.
    pub z: f64,
}

impl Position {
    /// Create a position from its three coordinates.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns `true` if the planar coordinates are finite.
    ///
    /// The height is ignored because it never reaches the grid.
    pub const fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One spatial event recorded in a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The match this event was recorded in.
    pub match_id: MatchId,
    /// The actor that produced the event.
    pub actor_id: ActorId,
    /// What happened.
    pub event_kind: EventKind,
    /// Where it happened.
    pub position: Position,
    /// Server tick of the event.
    pub tick: u64,
}
