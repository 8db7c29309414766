//! Error types for the cache layer.

/// Errors delivered to the requesters of a single cache key.
///
/// The enum is `Clone` because every requester coalesced onto the same
/// in-flight computation receives its own copy of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The compute function for a key failed.
    #[error("computation for key {key} failed: {message}")]
    Compute {
        /// Digest of the key whose computation failed.
        key: String,
        /// Human-readable description of the failure.
        message: String,
    },
}

impl CacheError {
    /// Build a [`CacheError::Compute`] for the key with the given digest.
    pub fn compute(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Compute {
            key: key.into(),
            message: message.into(),
        }
    }
}
