//! Simulation result cache
//!
//! Specialises [`KeyedCacheStore`] for simulation results: entries are keyed by
//! the parameter fingerprint and partitioned by canonical country. The store and
//! its recency list live behind one mutex so every cache operation is applied in
//! full before another can observe the map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::keys::{canonical_country, SimulationParameterKey};
use super::store::KeyedCacheStore;
use super::CacheConfig;
use crate::simulation::{ResultPayload, SimulationConfig};
use crate::types::{Result, SimError};

/// Provenance attached to a cached result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Where the result came from ("worker", "prefetch", ...)
    pub source: String,
    pub computed_at: DateTime<Utc>,
    /// Overrides the configured default TTL for this entry
    #[serde(skip)]
    pub ttl: Option<Duration>,
}

impl CacheMetadata {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            computed_at: Utc::now(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A cached simulation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSimulation {
    pub key: SimulationParameterKey,
    pub fingerprint: String,
    pub results: ResultPayload,
    pub metadata: CacheMetadata,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    /// hits / total_requests, 0 when there were no requests
    pub hit_rate: f64,
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Outcome of a prefetch pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    pub computed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SimulationCache {
    store: Mutex<KeyedCacheStore<CachedSimulation>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SimulationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(KeyedCacheStore::with_clock(config.max_entries, clock)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    // A panic mid-operation cannot leave the map and list out of step (each
    // mutation is a single call), so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, KeyedCacheStore<CachedSimulation>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store results for `params`, evicting the LRU entry if at capacity.
    ///
    /// Returns false if `params` is invalid (nothing is stored) or if the
    /// fingerprint is already held by a different canonical key, which means
    /// canonicalisation is broken. A normal overwrite returns true.
    pub fn cache_results(
        &self,
        params: &SimulationConfig,
        results: ResultPayload,
        metadata: CacheMetadata,
    ) -> bool {
        match self.insert(params, results, metadata) {
            Ok(()) => true,
            Err(e @ SimError::KeyCollision(_)) => {
                error!(error = %e, "Refusing to overwrite cached simulation result");
                false
            }
            Err(e) => {
                warn!(country = %params.country, error = %e, "Not caching invalid parameters");
                false
            }
        }
    }

    fn insert(
        &self,
        params: &SimulationConfig,
        results: ResultPayload,
        metadata: CacheMetadata,
    ) -> Result<()> {
        let key = SimulationParameterKey::from_config(params)?;
        let fingerprint = key.fingerprint();
        let partition = key.partition().to_string();
        let ttl = metadata.ttl.unwrap_or(self.config.default_ttl);

        let mut store = self.lock();

        if let Some(existing) = store.peek(&fingerprint, &partition) {
            ensure_same_key(&fingerprint, &existing.value.key, &key)?;
        }

        let entry = CachedSimulation {
            key,
            fingerprint: fingerprint.clone(),
            results,
            metadata,
        };
        if let Some(evicted) = store.set(&fingerprint, entry, &partition, ttl) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(
                evicted_partition = %evicted.partition,
                evicted_key = %evicted.key,
                "Evicted simulation result"
            );
        }
        debug!(fingerprint = %fingerprint, partition = %partition, "Cached simulation result");
        Ok(())
    }

    /// Fetch cached results for `params`, counting a hit or a miss.
    /// Invalid parameters are a miss.
    pub fn get_cached_results(&self, params: &SimulationConfig) -> Option<CachedSimulation> {
        let key = match SimulationParameterKey::from_config(params) {
            Ok(key) => key,
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(country = %params.country, error = %e, "Cache lookup with invalid parameters");
                return None;
            }
        };
        let fingerprint = key.fingerprint();

        let found = {
            let mut store = self.lock();
            store
                .get(&fingerprint, key.partition())
                .map(|e| e.value.clone())
        };

        match found {
            Some(cached) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint, "Simulation cache hit");
                Some(cached)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint, "Simulation cache miss");
                None
            }
        }
    }

    /// Whether a fresh result exists, without touching recency or statistics
    pub fn contains(&self, params: &SimulationConfig) -> bool {
        match SimulationParameterKey::from_config(params) {
            Ok(key) => self.lock().contains(&key.fingerprint(), key.partition()),
            Err(_) => false,
        }
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hits as f64 / total_requests as f64
        };

        CacheStats {
            size: self.lock().len(),
            hit_rate,
            total_requests,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Remove every entry for one country. Returns the number removed.
    pub fn clear_country_cache(&self, country: &str) -> usize {
        let partition = canonical_country(country);
        let removed = self.lock().clear_partition(&partition);
        info!(country = %partition, removed, "Cleared country cache");
        removed
    }

    /// Compute and cache every parameter set that is not already cached.
    ///
    /// `simulator` is awaited once per uncached set, sequentially. Sets that are
    /// cached and unexpired (including duplicates earlier in the same list) are
    /// skipped. Simulator failures are logged and counted, not propagated.
    pub async fn prefetch_common_simulations<F, Fut>(
        &self,
        params_list: &[SimulationConfig],
        simulator: F,
    ) -> PrefetchReport
    where
        F: Fn(SimulationConfig) -> Fut,
        Fut: Future<Output = Result<ResultPayload>>,
    {
        let mut report = PrefetchReport::default();

        for params in params_list {
            if self.contains(params) {
                report.skipped += 1;
                continue;
            }

            match simulator(params.clone()).await {
                Ok(results) => {
                    if self.cache_results(params, results, CacheMetadata::new("prefetch")) {
                        report.computed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    warn!(country = %params.country, error = %e, "Prefetch simulation failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            computed = report.computed,
            skipped = report.skipped,
            failed = report.failed,
            "Prefetch completed"
        );
        report
    }

    /// Drop all expired entries
    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired()
    }

    pub fn clear(&self) {
        self.lock().clear();
        info!("Simulation cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for SimulationCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Two canonical keys may share a fingerprint only if they are the same key
fn ensure_same_key(
    fingerprint: &str,
    existing: &SimulationParameterKey,
    incoming: &SimulationParameterKey,
) -> Result<()> {
    if existing == incoming {
        return Ok(());
    }
    Err(SimError::KeyCollision(format!(
        "{} held by {}, incoming {}",
        fingerprint, existing, incoming
    )))
}

/// Spawn a background task that periodically purges expired entries
pub fn spawn_cleanup_task(cache: Arc<SimulationCache>) -> tokio::task::JoinHandle<()> {
    let interval = cache.config.cleanup_interval;

    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.purge_expired();
            let stats = cache.get_cache_stats();
            debug!(
                removed,
                entries = stats.size,
                hit_rate = format!("{:.1}%", stats.hit_rate * 100.0),
                "Simulation cache cleanup completed"
            );
        }
    });

    info!("Simulation cache cleanup task started");
    handle
}
