//! Bounded, TTL-based memory cache holding one serialized state snapshot.
//!
//! The cache stores a single aggregate object, so eviction is all-or-nothing:
//! an oversized snapshot is first reduced to its compact projection and
//! dropped if that is still too large; an expired snapshot is never served.

pub mod clock;
pub mod compact;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::config::{DEFAULT_MAX_CACHE_AGE_SECS, DEFAULT_MAX_CACHE_BYTES};
use crate::state::types::GlobalState;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compact::{CompactState, CompactTaskFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_bytes: usize,
    pub max_age: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_CACHE_BYTES,
            max_age: Duration::from_secs(DEFAULT_MAX_CACHE_AGE_SECS),
        }
    }
}

/// Serialized, timestamped copy of the state.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    payload: Arc<[u8]>,
    timestamp: DateTime<Utc>,
    size_bytes: usize,
    optimized: bool,
}

impl CacheSnapshot {
    fn encode<T: Serialize>(
        value: &T,
        timestamp: DateTime<Utc>,
        optimized: bool,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self {
            size_bytes: bytes.len(),
            payload: Arc::from(bytes),
            timestamp,
            optimized,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// True once non-essential fields were pruned.
    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    /// Decode the full state. Optimized snapshots cannot be restored.
    pub fn restore(&self) -> Option<GlobalState> {
        if self.optimized {
            return None;
        }
        serde_json::from_slice(&self.payload).ok()
    }

    /// Decode the compact projection, whichever form the snapshot is in.
    pub fn compact(&self) -> Option<CompactState> {
        if self.optimized {
            serde_json::from_slice(&self.payload).ok()
        } else {
            self.restore().map(|state| CompactState::from(&state))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub optimizations: u64,
    pub invalidations: u64,
    pub expirations: u64,
}

struct CacheInner {
    snapshot: Option<CacheSnapshot>,
    stats: CacheStats,
}

pub struct MemoryCache {
    limits: CacheLimits,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl MemoryCache {
    pub fn new(limits: CacheLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            inner: Mutex::new(CacheInner {
                snapshot: None,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheLimits::default(), Arc::new(SystemClock))
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, snapshot: &CacheSnapshot, now: DateTime<Utc>) -> bool {
        clock::elapsed_between(snapshot.timestamp, now) >= self.limits.max_age
    }

    /// Store a fresh snapshot of `state`, optimizing it if it exceeds the size bound.
    pub fn put(&self, state: &GlobalState) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.stats.puts += 1;

        let snapshot = match CacheSnapshot::encode(state, now, false) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(target: "cache", "Failed to serialize state snapshot: {}", e);
                inner.snapshot = None;
                return;
            }
        };

        if snapshot.size_bytes <= self.limits.max_bytes {
            inner.snapshot = Some(snapshot);
            return;
        }

        tracing::debug!(
            target: "cache",
            size_bytes = snapshot.size_bytes,
            max_bytes = self.limits.max_bytes,
            "Snapshot over budget, optimizing"
        );
        inner.stats.optimizations += 1;
        inner.snapshot = self.compact_within_bounds(&CompactState::from(state), now);
    }

    /// Return the snapshot unless it is missing or expired. Never blocks on a rebuild.
    pub fn get(&self) -> Option<CacheSnapshot> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = inner
            .snapshot
            .as_ref()
            .map(|snapshot| self.is_expired(snapshot, now));

        match expired {
            None => {
                inner.stats.misses += 1;
                None
            }
            Some(true) => {
                inner.snapshot = None;
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                tracing::debug!(target: "cache", "Snapshot expired");
                None
            }
            Some(false) => {
                inner.stats.hits += 1;
                inner.snapshot.clone()
            }
        }
    }

    /// Prune the held snapshot to its compact projection.
    ///
    /// Returns the new size, or `None` when there is nothing cached or the
    /// compact form still exceeds the bound (in which case it is dropped).
    pub fn optimize(&self) -> Option<usize> {
        let mut inner = self.lock();
        let snapshot = inner.snapshot.take()?;

        if snapshot.optimized {
            let size = snapshot.size_bytes;
            inner.snapshot = Some(snapshot);
            return Some(size);
        }

        inner.stats.optimizations += 1;
        let before = snapshot.size_bytes;
        let Some(compact) = snapshot.compact() else {
            tracing::warn!(target: "cache", "Cached payload could not be decoded, dropping it");
            return None;
        };

        inner.snapshot = self.compact_within_bounds(&compact, snapshot.timestamp);
        let after = inner.snapshot.as_ref().map(|s| s.size_bytes);
        tracing::info!(
            target: "cache",
            before_bytes = before,
            after_bytes = after.unwrap_or(0),
            "Snapshot optimized"
        );
        after
    }

    fn compact_within_bounds(
        &self,
        compact: &CompactState,
        timestamp: DateTime<Utc>,
    ) -> Option<CacheSnapshot> {
        match CacheSnapshot::encode(compact, timestamp, true) {
            Ok(snapshot) if snapshot.size_bytes <= self.limits.max_bytes => Some(snapshot),
            Ok(snapshot) => {
                tracing::warn!(
                    target: "cache",
                    size_bytes = snapshot.size_bytes,
                    max_bytes = self.limits.max_bytes,
                    "Compact snapshot still over budget, dropping it"
                );
                None
            }
            Err(e) => {
                tracing::warn!(target: "cache", "Failed to serialize compact snapshot: {}", e);
                None
            }
        }
    }

    /// Drop the snapshot entirely.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        if inner.snapshot.take().is_some() {
            tracing::info!(target: "cache", "Snapshot invalidated");
        }
        inner.stats.invalidations += 1;
    }

    /// Release what can be released without losing live data: an expired
    /// snapshot is dropped. Returns the number of payload bytes freed.
    pub fn reclaim(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();

        let expired = inner
            .snapshot
            .as_ref()
            .is_some_and(|snapshot| self.is_expired(snapshot, now));
        if !expired {
            return 0;
        }

        inner.stats.expirations += 1;
        inner.snapshot.take().map(|s| s.size_bytes).unwrap_or(0)
    }

    /// Size of the held snapshot, expired or not.
    pub fn size_bytes(&self) -> usize {
        self.lock().snapshot.as_ref().map(|s| s.size_bytes).unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}
