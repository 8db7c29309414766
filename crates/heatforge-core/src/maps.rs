//! Map metadata provider seam.
//!
//! The engine never loads map images itself. It asks a [`MapProvider`]
//! for each map's world-space bounding box and radar pixel dimensions,
//! which fix the full-resolution grid layout.

use std::collections::BTreeMap;

use heatforge_types::{MapId, MapInfo};

/// Errors raised while resolving map metadata.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The provider has no metadata for the map.
    #[error("unknown map: {0}")]
    UnknownMap(MapId),

    /// The stored metadata cannot describe a grid.
    #[error("invalid metadata for map {map_id}: {reason}")]
    InvalidMetadata {
        /// The map with unusable metadata.
        map_id: MapId,
        /// What is wrong with it.
        reason: String,
    },
}

/// A source of map metadata.
pub trait MapProvider: Send + Sync {
    /// Bounding box and pixel dimensions of `map_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::UnknownMap`] if the map is not known.
    fn map_info(&self, map_id: &MapId) -> Result<MapInfo, MapError>;
}

/// A fixed table of maps, built from configuration or in code.
#[derive(Debug, Clone, Default)]
pub struct StaticMapProvider {
    maps: BTreeMap<MapId, MapInfo>,
}

impl StaticMapProvider {
    /// Create an empty provider.
    pub const fn new() -> Self {
        Self { maps: BTreeMap::new() }
    }

    /// Add (or replace) a map, builder style.
    #[must_use]
    pub fn with_map(mut self, info: MapInfo) -> Self {
        self.insert(info);
        self
    }

    /// Add (or replace) a map.
    pub fn insert(&mut self, info: MapInfo) {
        self.maps.insert(info.map_id.clone(), info);
    }

    /// Known map identifiers, in order.
    pub fn map_ids(&self) -> impl Iterator<Item = &MapId> {
        self.maps.keys()
    }

    /// Number of known maps.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Returns `true` if no maps are known.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl MapProvider for StaticMapProvider {
    fn map_info(&self, map_id: &MapId) -> Result<MapInfo, MapError> {
        let info = self
            .maps
            .get(map_id)
            .cloned()
            .ok_or_else(|| MapError::UnknownMap(map_id.clone()))?;
        if !(info.bounds.width() > 0.0 && info.bounds.height() > 0.0) {
            return Err(MapError::InvalidMetadata {
                map_id: map_id.clone(),
                reason: String::from("bounding box has no area"),
            });
        }
        if info.pixel_width == 0 || info.pixel_height == 0 {
            return Err(MapError::InvalidMetadata {
                map_id: map_id.clone(),
                reason: String::from("zero pixel dimensions"),
            });
        }
        Ok(info)
    }
}
