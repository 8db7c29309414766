//! Cached values.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use heatforge_grid::Grid;
use heatforge_render::Raster;

use crate::key::CacheKey;

/// Fixed bookkeeping charged to every entry on top of its payload.
const ENTRY_OVERHEAD_BYTES: usize = 96;

/// The artifact produced by a compute function.
#[derive(Debug, Clone)]
pub enum CachePayload {
    /// A density grid.
    Grid(Arc<Grid>),
    /// A tone-mapped raster.
    Raster(Arc<Raster>),
}

impl CachePayload {
    /// Bytes the payload is charged against the store budget.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Grid(grid) => grid.size_bytes(),
            Self::Raster(raster) => raster.size_bytes(),
        }
    }
}

impl From<Grid> for CachePayload {
    fn from(grid: Grid) -> Self {
        Self::Grid(Arc::new(grid))
    }
}

impl From<Raster> for CachePayload {
    fn from(raster: Raster) -> Self {
        Self::Raster(Arc::new(raster))
    }
}

/// One stored grid or raster with its LRU bookkeeping.
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    grid: Option<Arc<Grid>>,
    raster: Option<Arc<Raster>>,
    size_bytes: usize,
    created_at: DateTime<Utc>,
    last_access: AtomicU64,
}

impl CacheEntry {
    /// Wrap a freshly computed payload for `key`.
    pub fn new(key: CacheKey, payload: CachePayload) -> Self {
        let size_bytes = payload.size_bytes().saturating_add(ENTRY_OVERHEAD_BYTES);
        let (grid, raster) = match payload {
            CachePayload::Grid(grid) => (Some(grid), None),
            CachePayload::Raster(raster) => (None, Some(raster)),
        };
        Self {
            key,
            grid,
            raster,
            size_bytes,
            created_at: Utc::now(),
            last_access: AtomicU64::new(0),
        }
    }

    /// The key this entry is stored under.
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The cached grid, for grid-layer entries.
    pub const fn grid(&self) -> Option<&Arc<Grid>> {
        self.grid.as_ref()
    }

    /// The cached raster, for raster-layer entries.
    pub const fn raster(&self) -> Option<&Arc<Raster>> {
        self.raster.as_ref()
    }

    /// Bytes charged against the store budget.
    pub const fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Wall-clock time the entry was computed.
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Logical time of the most recent access.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::AcqRel);
    }
}
