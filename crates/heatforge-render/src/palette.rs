//! Monotonic intensity-to-color gradients.
//!
//! Every palette is a list of color stops with linear interpolation between
//! them. Each channel is non-decreasing along the gradient, so a hotter
//! intensity never maps to a darker or more transparent pixel.

use serde::{Deserialize, Serialize};

type Stop = (f64, [u8; 3]);

const HOT: &[Stop] = &[
    (0.0, [0, 0, 0]),
    (0.375, [255, 0, 0]),
    (0.75, [255, 255, 0]),
    (1.0, [255, 255, 255]),
];

const FIRE: &[Stop] = &[
    (0.0, [128, 0, 0]),
    (0.5, [255, 128, 0]),
    (1.0, [255, 255, 64]),
];

const GRAYSCALE: &[Stop] = &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])];

/// Color gradient used to display intensities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    /// Black, red, yellow, white.
    #[default]
    Hot,
    /// Dark red, orange, pale yellow.
    Fire,
    /// Black to white.
    Grayscale,
}

impl Palette {
    const fn stops(self) -> &'static [Stop] {
        match self {
            Self::Hot => HOT,
            Self::Fire => FIRE,
            Self::Grayscale => GRAYSCALE,
        }
    }

    /// RGB color for an intensity in `[0, 1]`; values outside are clamped.
    pub fn color(self, intensity: f64) -> [u8; 3] {
        let v = if intensity.is_nan() { 0.0 } else { intensity.clamp(0.0, 1.0) };
        let stops = self.stops();
        let mut lower = stops.first().copied().unwrap_or((0.0, [0, 0, 0]));
        for &upper in stops {
            if v <= upper.0 {
                let span = upper.0 - lower.0;
                let t = if span > 0.0 { (v - lower.0) / span } else { 1.0 };
                return lerp(lower.1, upper.1, t);
            }
            lower = upper;
        }
        lower.1
    }
}

fn lerp(from: [u8; 3], to: [u8; 3], t: f64) -> [u8; 3] {
    let mut out = [0_u8; 3];
    for ((slot, a), b) in out.iter_mut().zip(from).zip(to) {
        let value = f64::from(a) + (f64::from(b) - f64::from(a)) * t;
        *slot = quantize_channel(value / 255.0);
    }
    out
}

/// Quantize a `[0, 1]` value to an 8-bit channel, rounding to nearest.
pub fn quantize_channel(value: f64) -> u8 {
    let scaled = (value.clamp(0.0, 1.0) * 255.0).round();
    // Clamped to [0, 255] above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let byte = scaled as u8;
    byte
}
