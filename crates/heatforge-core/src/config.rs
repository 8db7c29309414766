//! Configuration loading and typed config structures for the Heatforge
//! engine.
//!
//! The canonical configuration lives in `heatforge.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads it. Every field has a
//! default, so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use heatforge_render::Palette;
use heatforge_types::{MapId, MapInfo, ToneParams};

use crate::maps::StaticMapProvider;

/// Environment variable that overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "HEATFORGE_LOG_LEVEL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Grid resolution and memory ceilings.
    #[serde(default)]
    pub grid: GridConfig,

    /// Per-session cache budgets.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Raster appearance.
    #[serde(default)]
    pub render: RenderConfig,

    /// Ingestion worker limits.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Radar metadata for known maps, keyed by map name.
    #[serde(default)]
    pub maps: BTreeMap<String, RadarConfig>,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `HEATFORGE_LOG_LEVEL` overrides `logging.level`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_with_env(yaml, |key| std::env::var(key).ok())
    }

    /// Built-in defaults with environment overrides applied, for runs
    /// without a configuration file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.logging.apply_env_overrides();
        config
    }

    fn parse_with_env(yaml: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.logging.apply_overrides(env);
        Ok(config)
    }

    /// Build a map provider from the `maps` section.
    pub fn map_provider(&self) -> StaticMapProvider {
        self.maps
            .iter()
            .fold(StaticMapProvider::new(), |provider, (name, radar)| {
                provider.with_map(radar.to_map_info(MapId::new(name.as_str())))
            })
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// Grid resolution and memory ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GridConfig {
    /// Smallest width or height a downsampled level may have.
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,

    /// Largest cell count rendered directly; bigger grids are downsampled.
    #[serde(default = "default_max_render_cells")]
    pub max_render_cells: usize,

    /// Largest grid footprint in bytes; bigger grids are downsampled.
    #[serde(default = "default_max_grid_bytes")]
    pub max_grid_bytes: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_dimension: default_min_dimension(),
            max_render_cells: default_max_render_cells(),
            max_grid_bytes: default_max_grid_bytes(),
        }
    }
}

const fn default_min_dimension() -> u32 {
    heatforge_grid::DEFAULT_MIN_DIMENSION
}

const fn default_max_render_cells() -> usize {
    1_048_576
}

const fn default_max_grid_bytes() -> usize {
    67_108_864
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Per-session cache budgets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Byte budget of the grid layer.
    #[serde(default = "default_grid_budget_bytes")]
    pub grid_budget_bytes: usize,

    /// Byte budget of the raster layer.
    #[serde(default = "default_raster_budget_bytes")]
    pub raster_budget_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            grid_budget_bytes: default_grid_budget_bytes(),
            raster_budget_bytes: default_raster_budget_bytes(),
        }
    }
}

const fn default_grid_budget_bytes() -> usize {
    268_435_456
}

const fn default_raster_budget_bytes() -> usize {
    134_217_728
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

/// Raster appearance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct RenderConfig {
    /// Color gradient for intensities.
    #[serde(default)]
    pub palette: Palette,

    /// Tone controls used when a caller does not supply its own.
    #[serde(default)]
    pub default_tone: ToneParams,
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

/// Ingestion worker limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestConfig {
    /// Maximum number of matches folded concurrently across all sessions.
    #[serde(default = "default_max_parallel_matches")]
    pub max_parallel_matches: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_parallel_matches: default_max_parallel_matches(),
        }
    }
}

const fn default_max_parallel_matches() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(level) = env(LOG_LEVEL_ENV) {
            self.level = level;
        }
    }
}

fn default_log_level() -> String {
    String::from("info")
}

// ---------------------------------------------------------------------------
// Maps
// ---------------------------------------------------------------------------

/// Radar image metadata for one map.
///
/// `(pos_x, pos_y)` is the world position of the radar's top-left corner
/// and `scale` the world units covered by one radar pixel.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RadarConfig {
    /// World x of the radar's left edge.
    pub pos_x: f64,
    /// World y of the radar's top edge.
    pub pos_y: f64,
    /// World units per radar pixel.
    pub scale: f64,
    /// Radar width in pixels.
    #[serde(default = "default_radar_pixels")]
    pub width: u32,
    /// Radar height in pixels.
    #[serde(default = "default_radar_pixels")]
    pub height: u32,
}

impl RadarConfig {
    /// Map metadata for `map_id` described by this radar.
    pub fn to_map_info(&self, map_id: MapId) -> MapInfo {
        MapInfo::from_radar(map_id, self.pos_x, self.pos_y, self.scale, self.width, self.height)
    }
}

const fn default_radar_pixels() -> u32 {
    1024
}
