// Generic TTL cache holding a single value produced by an injected fetch function.
// Reads within the TTL are served from memory; everything else goes through the fetcher.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

// Fetch function wrapped by a cache. Every call must produce a fresh value.
pub type Fetcher<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

// Live counters for the cache
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub refresh_count: AtomicUsize,
    pub failed_refresh_count: AtomicUsize,
    pub total_fetches: AtomicUsize,
    pub average_fetch_time_ms: AtomicU64,
}

// Point-in-time copy of the counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub hit_count: usize,
    pub miss_count: usize,
    pub refresh_count: usize,
    pub failed_refresh_count: usize,
    pub total_fetches: usize,
    pub average_fetch_time_ms: u64,
}

// How concurrent misses are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    // Every miss triggers its own fetch; the last fetch to finish wins
    #[default]
    Independent,
    // Fetches go through a per-cache gate; waiters re-check freshness first
    SingleFlight,
}

struct Slot<T> {
    value: Option<Arc<T>>,
    last_updated: Option<DateTime<Utc>>,
}

pub struct TtlCache<T, E> {
    name: String,
    ttl: Duration,
    policy: MissPolicy,
    fetcher: Fetcher<T, E>,
    // value and timestamp only ever change together, under one write guard
    slot: RwLock<Slot<T>>,
    gate: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl<T, E> TtlCache<T, E>
where
    T: Send + Sync + 'static,
    E: Display + Send + 'static,
{
    pub fn new(name: impl Into<String>, ttl: Duration, fetcher: Fetcher<T, E>) -> Self {
        Self::with_clock(name, ttl, fetcher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        ttl: Duration,
        fetcher: Fetcher<T, E>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        info!("Cache {} initialized with ttl of {:?}", name, ttl);
        Self {
            name,
            ttl,
            policy: MissPolicy::default(),
            fetcher,
            slot: RwLock::new(Slot {
                value: None,
                last_updated: None,
            }),
            gate: tokio::sync::Mutex::new(()),
            clock,
            stats: CacheStats::default(),
        }
    }

    pub fn with_policy(mut self, policy: MissPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the stored value while it is younger than the TTL, otherwise
    /// behaves exactly like [`TtlCache::refresh`].
    pub async fn read(&self) -> Result<Arc<T>, E> {
        if let Some(value) = self.fresh_value() {
            debug!("Cache-Hit: {}", self.name);
            self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
            return Ok(value);
        }

        info!("Cache-Miss: {}", self.name);
        self.stats.miss_count.fetch_add(1, Ordering::SeqCst);

        match self.policy {
            MissPolicy::Independent => self.fetch_and_store().await,
            MissPolicy::SingleFlight => {
                let _gate = self.gate.lock().await;
                // Another task may have refreshed while we were waiting
                if let Some(value) = self.fresh_value() {
                    debug!("Cache {} filled by concurrent fetch", self.name);
                    return Ok(value);
                }
                self.fetch_and_store().await
            }
        }
    }

    /// Unconditionally runs the fetcher. On failure the previous value and
    /// timestamp stay in place and the error is returned as-is.
    pub async fn refresh(&self) -> Result<Arc<T>, E> {
        match self.policy {
            MissPolicy::Independent => self.fetch_and_store().await,
            MissPolicy::SingleFlight => {
                let _gate = self.gate.lock().await;
                self.fetch_and_store().await
            }
        }
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.slot.read().last_updated
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
            refresh_count: self.stats.refresh_count.load(Ordering::SeqCst),
            failed_refresh_count: self.stats.failed_refresh_count.load(Ordering::SeqCst),
            total_fetches: self.stats.total_fetches.load(Ordering::SeqCst),
            average_fetch_time_ms: self.stats.average_fetch_time_ms.load(Ordering::SeqCst),
        }
    }

    fn fresh_value(&self) -> Option<Arc<T>> {
        let slot = self.slot.read();
        match (&slot.value, slot.last_updated) {
            (Some(value), Some(updated)) if self.is_fresh(updated) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    fn is_fresh(&self, updated: DateTime<Utc>) -> bool {
        match (self.clock.now() - updated).to_std() {
            Ok(age) => age < self.ttl,
            // clock went backwards; only a zero ttl still forces a miss
            Err(_) => !self.ttl.is_zero(),
        }
    }

    async fn fetch_and_store(&self) -> Result<Arc<T>, E> {
        let started = Instant::now();
        let result = (self.fetcher)().await;
        self.store_fetch_time(started);

        match result {
            Ok(value) => {
                let value = Arc::new(value);
                let now = self.clock.now();
                {
                    let mut slot = self.slot.write();
                    if slot.value.is_none() {
                        info!("Cache {} ready", self.name);
                    }
                    slot.value = Some(Arc::clone(&value));
                    slot.last_updated = Some(now);
                }
                self.stats.refresh_count.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                warn!("Refreshing cache {} failed: {}", self.name, e);
                self.stats.failed_refresh_count.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn store_fetch_time(&self, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        // each fetch gets its own position in the running average
        let fetches = self.stats.total_fetches.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let current_avg = self.stats.average_fetch_time_ms.load(Ordering::SeqCst);

        let new_avg = if fetches == 1 {
            duration_ms
        } else {
            (current_avg * (fetches - 1) + duration_ms) / fetches
        };

        self.stats
            .average_fetch_time_ms
            .store(new_avg, Ordering::SeqCst);
    }
}
