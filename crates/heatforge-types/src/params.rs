//! Heatmap request parameters.
//!
//! [`HeatmapParams`] is a value type: two params with equal fields are
//! interchangeable for caching. The "expensive" part (map, event filter,
//! active matches) selects a grid; the "cheap" [`ToneParams`] only affect
//! the raster derived from it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::event::EventKindFilter;
use crate::ids::{MapId, MatchId};

/// Tone-mapping controls applied when turning a grid into a raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneParams {
    /// Additive offset applied last, before clamping.
    #[serde(default)]
    pub brightness: f64,
    /// Linear scale around the 0.5 midpoint.
    #[serde(default = "default_contrast")]
    pub contrast: f64,
    /// Gamma exponent; intensities are raised to `1 / gamma`.
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Standard deviation (in cells) of the Gaussian blur applied to the
    /// counts before normalization. Zero disables smoothing.
    #[serde(default)]
    pub smoothing_sigma: f64,
}

impl ToneParams {
    /// The identity transform: raw normalized intensity, no smoothing.
    pub const IDENTITY: Self = Self {
        brightness: 0.0,
        contrast: 1.0,
        gamma: 1.0,
        smoothing_sigma: 0.0,
    };

    /// Name of the first field holding an unusable value, if any.
    ///
    /// Every field must be finite, `gamma` strictly positive, and
    /// `smoothing_sigma` non-negative.
    pub const fn first_invalid_field(&self) -> Option<&'static str> {
        if !self.brightness.is_finite() {
            return Some("brightness");
        }
        if !self.contrast.is_finite() {
            return Some("contrast");
        }
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return Some("gamma");
        }
        if !self.smoothing_sigma.is_finite() || self.smoothing_sigma < 0.0 {
            return Some("smoothing_sigma");
        }
        None
    }
}

impl Default for ToneParams {
    fn default() -> Self {
        Self::IDENTITY
    }
}

const fn default_contrast() -> f64 {
    1.0
}

const fn default_gamma() -> f64 {
    1.0
}

/// Everything that identifies a requested heatmap within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapParams {
    /// The map the heatmap is drawn over.
    pub map_id: MapId,
    /// Which event kinds contribute.
    pub event_kind_filter: EventKindFilter,
    /// Matches whose events contribute. Order is irrelevant.
    pub active_match_ids: BTreeSet<MatchId>,
    /// Tone-mapping controls.
    #[serde(default)]
    pub tone: ToneParams,
}

impl HeatmapParams {
    /// Create params with the identity tone mapping.
    pub fn new(
        map_id: MapId,
        event_kind_filter: EventKindFilter,
        active_match_ids: impl IntoIterator<Item = MatchId>,
    ) -> Self {
        Self {
            map_id,
            event_kind_filter,
            active_match_ids: active_match_ids.into_iter().collect(),
            tone: ToneParams::IDENTITY,
        }
    }

    /// Replace the tone-mapping controls.
    #[must_use]
    pub const fn with_tone(mut self, tone: ToneParams) -> Self {
        self.tone = tone;
        self
    }
}
