//! Type-safe identifier wrappers.
//!
//! Matches and sessions are identified by UUID v7 (time-ordered) so that
//! identifiers minted by concurrent ingestion workers sort by creation
//! time. Actors keep the numeric identity assigned by the match file, and
//! maps are identified by their level name (e.g. `de_dust2`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares UUID v7 identifiers minted by the engine itself.
macro_rules! uuid_ids {
    ($($(#[$meta:meta])* $name:ident;)+) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh, time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    )+};
}

uuid_ids! {
    /// Unique identifier for a recorded match.
    MatchId;
    /// Unique identifier for a viewer session (a working set of matches).
    SessionId;
}

/// Identifier of a player or other actor within a match file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl core::fmt::Display for ActorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Identifier of a map (the level name recorded in the match header).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub String);

impl MapId {
    /// Create a map identifier from its level name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the level name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for MapId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MapId {
    fn from(name: &str) -> Self {
        Self(String::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_values() {
        let a = MatchId::new();
        let b = MatchId::new();
        assert_ne!(a, b);
        assert_ne!(a.0, Uuid::nil());
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let first = SessionId::new();
        let second = SessionId::new();
        assert!(first <= second);
    }

    #[test]
    fn map_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&MapId::from("de_inferno")).ok();
        assert_eq!(json.as_deref(), Some("\"de_inferno\""));
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = MatchId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
