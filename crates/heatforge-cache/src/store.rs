//! The cache partition: lookup, coalesced computation, LRU eviction, and
//! invalidation.
//!
//! Slots live in a map behind a [`RwLock`]. Hits take the read lock only,
//! so any number of readers proceed in parallel; the access time is an
//! atomic inside the entry. A miss inserts a slot holding a per-key
//! [`OnceCell`] and releases the lock before computing, so requesters for
//! the same key wait on that cell while requests for other keys are not
//! blocked at all.
//!
//! Access times come from a logical clock that increments on every touch,
//! which makes LRU order strict. Bytes are charged when a computation
//! settles; eviction only considers settled entries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

use heatforge_types::MatchId;

use crate::entry::{CacheEntry, CachePayload};
use crate::error::CacheError;
use crate::key::CacheKey;

/// What a coalesced computation resolves to, shared by all its waiters.
type Outcome = Result<Arc<CacheEntry>, CacheError>;

#[derive(Debug)]
struct Slot {
    cell: Arc<OnceCell<Outcome>>,
    /// Bytes charged to the budget; `None` while the computation is in
    /// flight.
    charged: Option<usize>,
}

impl Slot {
    fn pending() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            charged: None,
        }
    }

    fn ready_entry(&self) -> Option<&Arc<CacheEntry>> {
        self.cell.get().and_then(|outcome| outcome.as_ref().ok())
    }

    fn failed(&self) -> bool {
        self.cell.get().is_some_and(Result::is_err)
    }
}

#[derive(Debug, Default)]
struct Slots {
    map: HashMap<CacheKey, Slot>,
    total_bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Point-in-time statistics of one cache partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a stored entry.
    pub hits: u64,
    /// Lookups that found no stored entry.
    pub misses: u64,
    /// Compute functions actually run.
    pub computations: u64,
    /// Entries removed to stay within the byte budget.
    pub evictions: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
    /// Entries currently stored (including in-flight slots).
    pub entries: usize,
    /// Bytes currently charged.
    pub total_bytes: usize,
    /// Configured byte budget.
    pub budget_bytes: usize,
}

/// One size-budgeted, LRU-evicting cache partition.
#[derive(Debug)]
pub struct CacheStore {
    label: &'static str,
    budget_bytes: usize,
    slots: RwLock<Slots>,
    clock: AtomicU64,
    counters: Counters,
}

impl CacheStore {
    /// Create an empty partition named `label` holding at most
    /// `budget_bytes` of entries.
    pub fn new(label: &'static str, budget_bytes: usize) -> Self {
        Self {
            label,
            budget_bytes,
            slots: RwLock::new(Slots::default()),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Name of this partition, used in logs.
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Configured byte budget.
    pub const fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Return the entry for `key`, computing it with `compute` on a miss.
    ///
    /// Concurrent callers for the same key share one computation: the
    /// first runs its `compute`, the others wait for its outcome and drop
    /// their own closures unused. A failure is delivered to exactly those
    /// callers and the key is left empty, so the next request retries.
    ///
    /// An entry larger than the whole budget is returned but not stored.
    ///
    /// # Errors
    ///
    /// Returns the [`CacheError`] produced by the computation for `key`.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> Result<Arc<CacheEntry>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachePayload, CacheError>>,
    {
        if let Some(entry) = self.get(&key).await {
            return Ok(entry);
        }

        let cell = self.claim_slot(&key).await;
        let ran = AtomicBool::new(false);
        let outcome = cell
            .get_or_init(|| {
                ran.store(true, Ordering::Relaxed);
                let computation = compute();
                let entry_key = key.clone();
                async move {
                    computation
                        .await
                        .map(|payload| Arc::new(CacheEntry::new(entry_key, payload)))
                }
            })
            .await
            .clone();

        if ran.load(Ordering::Relaxed) {
            Counters::bump(&self.counters.computations, 1);
            self.settle(&key, &cell, &outcome).await;
        } else if let Ok(entry) = &outcome {
            debug!(cache = self.label, key = %key, digest = %key.digest(), "Coalesced onto in-flight computation");
            entry.touch(self.tick());
        }
        outcome
    }

    /// Return the stored entry for `key` and mark it as most recently
    /// used. In-flight and failed computations are not visible here.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let slots = self.slots.read().await;
        let entry = slots.map.get(key).and_then(Slot::ready_entry).map(Arc::clone);
        drop(slots);
        if let Some(entry) = &entry {
            entry.touch(self.tick());
            Counters::bump(&self.counters.hits, 1);
            debug!(cache = self.label, key = %key, "Cache hit");
        }
        entry
    }

    /// Returns `true` if a computed entry is stored for `key`. Does not
    /// affect LRU order or statistics.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.slots.read().await.map.get(key).and_then(Slot::ready_entry).is_some()
    }

    /// Remove every entry whose key satisfies `predicate`, including
    /// computations still in flight (their waiters still receive the
    /// result, but it is not stored). Returns the number removed.
    pub async fn invalidate_where(&self, mut predicate: impl FnMut(&CacheKey) -> bool) -> usize {
        let mut slots = self.slots.write().await;
        let Slots { map, total_bytes } = &mut *slots;
        let mut removed = 0_usize;
        map.retain(|key, slot| {
            if !predicate(key) {
                return true;
            }
            if let Some(bytes) = slot.charged {
                *total_bytes = total_bytes.saturating_sub(bytes);
            }
            removed = removed.saturating_add(1);
            false
        });
        drop(slots);

        if removed > 0 {
            Counters::bump(&self.counters.invalidations, u64::try_from(removed).unwrap_or(u64::MAX));
            debug!(cache = self.label, removed, "Entries invalidated");
        }
        removed
    }

    /// Remove every entry that `match_id` contributed to.
    pub async fn invalidate_match(&self, match_id: MatchId) -> usize {
        self.invalidate_where(|key| key.involves(&match_id)).await
    }

    /// Remove every entry.
    pub async fn clear(&self) -> usize {
        self.invalidate_where(|_| true).await
    }

    /// Number of slots (stored entries plus in-flight computations).
    pub async fn len(&self) -> usize {
        self.slots.read().await.map.len()
    }

    /// Returns `true` if the partition holds no slots.
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.map.is_empty()
    }

    /// Bytes currently charged against the budget.
    pub async fn total_bytes(&self) -> usize {
        self.slots.read().await.total_bytes
    }

    /// Snapshot of the partition's counters and occupancy.
    pub async fn stats(&self) -> CacheStats {
        let slots = self.slots.read().await;
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entries: slots.map.len(),
            total_bytes: slots.total_bytes,
            budget_bytes: self.budget_bytes,
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Find or create the slot for `key` and return its cell.
    async fn claim_slot(&self, key: &CacheKey) -> Arc<OnceCell<Outcome>> {
        Counters::bump(&self.counters.misses, 1);
        let mut slots = self.slots.write().await;
        match slots.map.get(key) {
            Some(slot) if !slot.failed() => Arc::clone(&slot.cell),
            _ => {
                let slot = Slot::pending();
                let cell = Arc::clone(&slot.cell);
                slots.map.insert(key.clone(), slot);
                debug!(cache = self.label, key = %key, digest = %key.digest(), "Cache miss");
                cell
            }
        }
    }

    /// Record the outcome of a computation this caller ran.
    async fn settle(&self, key: &CacheKey, cell: &Arc<OnceCell<Outcome>>, outcome: &Outcome) {
        let mut slots = self.slots.write().await;
        let current = slots
            .map
            .get(key)
            .is_some_and(|slot| Arc::ptr_eq(&slot.cell, cell));
        if !current {
            debug!(cache = self.label, key = %key, "Slot invalidated during computation; result not stored");
            return;
        }

        let entry = match outcome {
            Ok(entry) => entry,
            Err(error) => {
                slots.map.remove(key);
                warn!(cache = self.label, key = %key, error = %error, "Computation failed");
                return;
            }
        };

        let size = entry.size_bytes();
        if size > self.budget_bytes {
            slots.map.remove(key);
            warn!(
                cache = self.label,
                key = %key,
                size_bytes = size,
                budget_bytes = self.budget_bytes,
                "Entry exceeds the cache budget; returned without storing"
            );
            return;
        }

        entry.touch(self.tick());
        if let Some(slot) = slots.map.get_mut(key) {
            slot.charged = Some(size);
        }
        slots.total_bytes = slots.total_bytes.saturating_add(size);
        debug!(
            cache = self.label,
            key = %key,
            size_bytes = size,
            total_bytes = slots.total_bytes,
            "Entry stored"
        );
        self.evict_over_budget(&mut slots);
    }

    /// Drop least-recently-used settled entries until within budget.
    fn evict_over_budget(&self, slots: &mut Slots) {
        while slots.total_bytes > self.budget_bytes {
            let victim = slots
                .map
                .iter()
                .filter_map(|(key, slot)| {
                    let bytes = slot.charged?;
                    let entry = slot.ready_entry()?;
                    Some((entry.last_access(), key, bytes))
                })
                .min_by_key(|(last_access, _, _)| *last_access)
                .map(|(_, key, bytes)| (key.clone(), bytes));

            let Some((key, bytes)) = victim else {
                break;
            };
            slots.map.remove(&key);
            slots.total_bytes = slots.total_bytes.saturating_sub(bytes);
            Counters::bump(&self.counters.evictions, 1);
            debug!(cache = self.label, key = %key, size_bytes = bytes, "Entry evicted");
        }
    }
}
