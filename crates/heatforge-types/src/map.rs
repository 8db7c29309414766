//! Map-space bounding boxes and the metadata supplied by the map-asset
//! provider.
//!
//! Radar images for a level come with three numbers: the world position of
//! the image's top-left corner and the number of world units covered by one
//! pixel. World y grows upward while image rows grow downward, so the
//! top-left corner is the *maximum* y of the box.

use serde::{Deserialize, Serialize};

use crate::ids::MapId;

/// Axis-aligned bounding box in map (world) space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapBounds {
    /// Smallest world x covered by the map.
    pub min_x: f64,
    /// Smallest world y covered by the map.
    pub min_y: f64,
    /// Largest world x covered by the map.
    pub max_x: f64,
    /// Largest world y covered by the map.
    pub max_y: f64,
}

impl MapBounds {
    /// Build a bounding box from radar metadata.
    ///
    /// `(pos_x, pos_y)` is the world position of the radar's top-left
    /// corner and `scale` the world units per pixel.
    pub fn from_radar(pos_x: f64, pos_y: f64, scale: f64, width: u32, height: u32) -> Self {
        let span_x = scale * f64::from(width);
        let span_y = scale * f64::from(height);
        Self {
            min_x: pos_x,
            min_y: pos_y - span_y,
            max_x: pos_x + span_x,
            max_y: pos_y,
        }
    }

    /// Horizontal extent in world units.
    pub const fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Vertical extent in world units.
    pub const fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Returns `true` if the point lies inside the box (edges included).
    pub const fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Everything the engine needs to know about a map's image asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapInfo {
    /// The map this metadata describes.
    pub map_id: MapId,
    /// World-space area covered by the map image.
    pub bounds: MapBounds,
    /// Width of the map image in pixels.
    pub pixel_width: u32,
    /// Height of the map image in pixels.
    pub pixel_height: u32,
}

impl MapInfo {
    /// Build map metadata from radar numbers.
    pub fn from_radar(map_id: MapId, pos_x: f64, pos_y: f64, scale: f64, width: u32, height: u32) -> Self {
        Self {
            map_id,
            bounds: MapBounds::from_radar(pos_x, pos_y, scale, width, height),
            pixel_width: width,
            pixel_height: height,
        }
    }
}
