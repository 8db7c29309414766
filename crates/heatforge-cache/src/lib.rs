//! Session-scoped cache of computed grids and rasters.
//!
//! A [`CacheStore`] is one partition of the cache: it memoizes
//! [`CacheEntry`] values by [`CacheKey`], coalesces concurrent misses for
//! the same key into a single computation, and evicts least-recently-used
//! entries once the stored bytes exceed its budget. Entries are removed
//! eagerly when a contributing match is invalidated.
//!
//! # Modules
//!
//! - [`key`] -- [`CacheKey`], its layer, and the bit-exact tone key
//! - [`entry`] -- [`CacheEntry`] and the [`CachePayload`] it carries
//! - [`store`] -- [`CacheStore`] and its [`CacheStats`]
//! - [`error`] -- [`CacheError`]

pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, CachePayload};
pub use error::CacheError;
pub use key::{CacheKey, CacheLayer, ToneKey};
pub use store::{CacheStats, CacheStore};
