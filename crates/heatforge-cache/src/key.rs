//! Cache keys.
//!
//! A [`CacheKey`] is the full identity of a cached artifact: the session
//! partition it belongs to, whether it is a grid or a raster, the grid
//! selector (map, event filter, contributing matches, resolution level),
//! and for rasters the exact tone controls. Equal keys imply equal
//! expected output.

use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use heatforge_types::{EventKindFilter, MapId, MatchId, SessionId, ToneParams};

/// Which cache layer an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    /// Density grids (the expensive layer).
    Grid,
    /// Tone-mapped rasters (the cheap layer).
    Raster,
}

impl CacheLayer {
    /// Stable lowercase name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Raster => "raster",
        }
    }
}

/// Bit-exact, hashable form of [`ToneParams`].
///
/// Floating-point fields are keyed by their bit patterns, with `-0.0`
/// folded into `0.0` so the two spellings of zero share an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ToneKey {
    brightness: u64,
    contrast: u64,
    gamma: u64,
    smoothing_sigma: u64,
}

impl ToneKey {
    /// Key the given tone controls.
    pub const fn new(tone: &ToneParams) -> Self {
        Self {
            brightness: normalized_bits(tone.brightness),
            contrast: normalized_bits(tone.contrast),
            gamma: normalized_bits(tone.gamma),
            smoothing_sigma: normalized_bits(tone.smoothing_sigma),
        }
    }

    /// The tone controls this key was built from.
    pub const fn params(&self) -> ToneParams {
        ToneParams {
            brightness: f64::from_bits(self.brightness),
            contrast: f64::from_bits(self.contrast),
            gamma: f64::from_bits(self.gamma),
            smoothing_sigma: f64::from_bits(self.smoothing_sigma),
        }
    }
}

impl From<&ToneParams> for ToneKey {
    fn from(tone: &ToneParams) -> Self {
        Self::new(tone)
    }
}

const fn normalized_bits(value: f64) -> u64 {
    if value == 0.0 { 0.0_f64.to_bits() } else { value.to_bits() }
}

/// Identity of one cached grid or raster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CacheKey {
    /// Session partition the entry belongs to.
    pub session_id: SessionId,
    /// Grid or raster layer.
    pub layer: CacheLayer,
    /// Map the grid covers.
    pub map_id: MapId,
    /// Event-kind filter the grid was built with.
    pub event_kind_filter: EventKindFilter,
    /// Matches whose events contributed to the grid.
    pub match_ids: BTreeSet<MatchId>,
    /// Mip level (0 is full resolution).
    pub resolution_level: u32,
    /// Tone controls for raster entries; `None` for grid entries.
    pub tone: Option<ToneKey>,
}

impl CacheKey {
    /// Key of a grid entry.
    pub const fn grid(
        session_id: SessionId,
        map_id: MapId,
        event_kind_filter: EventKindFilter,
        match_ids: BTreeSet<MatchId>,
        resolution_level: u32,
    ) -> Self {
        Self {
            session_id,
            layer: CacheLayer::Grid,
            map_id,
            event_kind_filter,
            match_ids,
            resolution_level,
            tone: None,
        }
    }

    /// The raster entry derived from this grid key with `tone`.
    #[must_use]
    pub fn raster(&self, tone: &ToneParams) -> Self {
        Self {
            layer: CacheLayer::Raster,
            tone: Some(ToneKey::new(tone)),
            ..self.clone()
        }
    }

    /// Returns `true` if `match_id` contributed to this entry.
    pub fn involves(&self, match_id: &MatchId) -> bool {
        self.match_ids.contains(match_id)
    }

    /// Deterministic 64-bit digest, rendered as hex, for log correlation.
    pub fn digest(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:L{}:{}m",
            self.layer.as_str(),
            self.map_id,
            self.event_kind_filter,
            self.resolution_level,
            self.match_ids.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use heatforge_types::EventKind;

    use super::*;

    fn base() -> CacheKey {
        let matches: BTreeSet<MatchId> = [MatchId::new(), MatchId::new()].into_iter().collect();
        CacheKey::grid(
            SessionId::new(),
            MapId::from("de_mirage"),
            EventKindFilter::Only(EventKind::Death),
            matches,
            0,
        )
    }

    #[test]
    fn negative_zero_shares_a_key() {
        let positive = ToneParams { brightness: 0.0, ..ToneParams::IDENTITY };
        let negative = ToneParams { brightness: -0.0, ..ToneParams::IDENTITY };
        assert_eq!(ToneKey::new(&positive), ToneKey::new(&negative));
    }

    #[test]
    fn tone_key_round_trips_params() {
        let tone = ToneParams {
            brightness: 0.25,
            contrast: 1.5,
            gamma: 3.0,
            smoothing_sigma: 1.0,
        };
        assert_eq!(ToneKey::new(&tone).params(), tone);
    }

    #[test]
    fn raster_key_differs_from_grid_key() {
        let grid = base();
        let raster = grid.raster(&ToneParams::IDENTITY);
        assert_ne!(grid, raster);
        assert_eq!(raster.layer, CacheLayer::Raster);
        assert_eq!(raster.match_ids, grid.match_ids);
        assert_ne!(grid.digest(), raster.digest());
    }

    #[test]
    fn match_order_does_not_affect_key() {
        let a = MatchId::new();
        let b = MatchId::new();
        let session = SessionId::new();
        let forward = CacheKey::grid(session, MapId::from("de_nuke"), EventKindFilter::Any, [a, b].into(), 1);
        let reverse = CacheKey::grid(session, MapId::from("de_nuke"), EventKindFilter::Any, [b, a].into(), 1);
        assert_eq!(forward, reverse);
        assert_eq!(forward.digest(), reverse.digest());
    }

    #[test]
    fn involves_checks_contributors() {
        let key = base();
        let first = key.match_ids.iter().next().copied();
        assert!(first.is_some_and(|id| key.involves(&id)));
        assert!(!key.involves(&MatchId::new()));
    }
}
