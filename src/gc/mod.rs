//! Interval-driven memory housekeeping.
//!
//! The scheduler is ticked on every user interaction. Once `interval` has
//! elapsed since the previous pass it runs a collection pass: reclaim what
//! the cache can release, sample process memory, and drop the cache
//! snapshot entirely when usage is above the warning threshold. It never
//! touches the canonical store contents.

pub mod probe;

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use crate::cache::clock::elapsed_between;
use crate::cache::{Clock, MemoryCache};
use crate::core::config::{DEFAULT_GC_INTERVAL_SECS, DEFAULT_WARNING_PERCENT};

pub use probe::{FnProbe, MemoryProbe, MemorySample, SysinfoProbe};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcError {
    #[error("Failed to sample process memory: {0}")]
    Sampling(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcConfig {
    pub interval: Duration,
    pub warning_threshold_percent: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            warning_threshold_percent: DEFAULT_WARNING_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Idle,
    CollectionInProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GcOutcome {
    /// Memory was below the threshold; only reclaiming happened.
    Healthy,
    /// Memory was above the threshold and the cache was invalidated.
    CacheInvalidated,
    /// Memory could not be sampled; no further action taken.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcReport {
    pub ran_at: DateTime<Utc>,
    pub reclaimed_bytes: usize,
    pub before: Option<MemorySample>,
    pub after: Option<MemorySample>,
    pub outcome: GcOutcome,
}

struct GcState {
    phase: GcPhase,
    last_gc: DateTime<Utc>,
    passes: u64,
}

pub struct GcScheduler {
    config: GcConfig,
    clock: Arc<dyn Clock>,
    probe: Box<dyn MemoryProbe>,
    cache: Arc<MemoryCache>,
    state: Mutex<GcState>,
}

impl GcScheduler {
    pub fn new(
        config: GcConfig,
        cache: Arc<MemoryCache>,
        probe: Box<dyn MemoryProbe>,
    ) -> Self {
        let clock = cache.clock();
        let now = clock.now();
        Self {
            config,
            clock,
            probe,
            cache,
            state: Mutex::new(GcState {
                phase: GcPhase::Idle,
                last_gc: now,
                passes: 0,
            }),
        }
    }

    pub fn with_sysinfo(config: GcConfig, cache: Arc<MemoryCache>) -> Self {
        Self::new(config, cache, Box::new(SysinfoProbe))
    }

    fn lock(&self) -> MutexGuard<'_, GcState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> GcPhase {
        self.lock().phase
    }

    pub fn passes(&self) -> u64 {
        self.lock().passes
    }

    pub fn last_gc_time(&self) -> DateTime<Utc> {
        self.lock().last_gc
    }

    pub fn is_due(&self) -> bool {
        let last = self.lock().last_gc;
        elapsed_between(last, self.clock.now()) >= self.config.interval
    }

    /// Called once per interaction. Runs a pass when the interval has elapsed.
    pub fn tick(&self) -> Option<GcReport> {
        {
            let mut state = self.lock();
            let now = self.clock.now();
            if state.phase == GcPhase::CollectionInProgress
                || elapsed_between(state.last_gc, now) < self.config.interval
            {
                return None;
            }
            state.phase = GcPhase::CollectionInProgress;
        }

        let report = self.collect();

        let mut state = self.lock();
        state.phase = GcPhase::Idle;
        state.last_gc = report.ran_at;
        state.passes += 1;
        Some(report)
    }

    /// Run a pass now, regardless of the interval.
    pub fn run_pass(&self) -> GcReport {
        self.lock().phase = GcPhase::CollectionInProgress;
        let report = self.collect();

        let mut state = self.lock();
        state.phase = GcPhase::Idle;
        state.last_gc = report.ran_at;
        state.passes += 1;
        report
    }

    fn collect(&self) -> GcReport {
        let ran_at = self.clock.now();
        let mut reclaimed_bytes = self.cache.reclaim();

        let before = match self.probe.sample() {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(target: "gc", "Skipping GC pass: {}", e);
                return GcReport {
                    ran_at,
                    reclaimed_bytes,
                    before: None,
                    after: None,
                    outcome: GcOutcome::Skipped {
                        reason: e.to_string(),
                    },
                };
            }
        };

        if before.percent_of_total <= self.config.warning_threshold_percent {
            tracing::debug!(
                target: "gc",
                rss_mb = before.rss_mb(),
                percent = before.percent_of_total,
                reclaimed_bytes,
                "GC pass complete"
            );
            return GcReport {
                ran_at,
                reclaimed_bytes,
                before: Some(before),
                after: Some(before),
                outcome: GcOutcome::Healthy,
            };
        }

        let cached = self.cache.size_bytes();
        self.cache.invalidate();
        reclaimed_bytes += cached + self.cache.reclaim();

        let after = match self.probe.sample() {
            Ok(sample) => Some(sample),
            Err(e) => {
                tracing::warn!(target: "gc", "Failed to resample memory after invalidation: {}", e);
                None
            }
        };

        tracing::warn!(
            target: "gc",
            before_rss_mb = before.rss_mb(),
            before_percent = before.percent_of_total,
            after_rss_mb = after.map(|s| s.rss_mb()),
            after_percent = after.map(|s| s.percent_of_total),
            threshold = self.config.warning_threshold_percent,
            reclaimed_bytes,
            "Memory above threshold, cache invalidated"
        );

        GcReport {
            ran_at,
            reclaimed_bytes,
            before: Some(before),
            after,
            outcome: GcOutcome::CacheInvalidated,
        }
    }
}
