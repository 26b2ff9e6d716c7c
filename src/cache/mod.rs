//! Caching layer
//!
//! - [`store`]: generic partitioned store with per-entry TTL and LRU eviction
//! - [`simulation`]: simulation result cache keyed by parameter fingerprint
//! - [`keys`]: canonical parameter keys and fingerprints
//!
//! TTL policy is the caller's: the store takes a TTL on every `set`, and the
//! simulation cache applies [`CacheConfig::default_ttl`] unless the entry's
//! metadata overrides it.

pub mod clock;
pub mod keys;
pub mod lru;
pub mod simulation;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{canonical_country, fingerprint, SimulationParameterKey, CACHE_FORMAT_VERSION};
pub use simulation::{
    spawn_cleanup_task, CacheMetadata, CacheStats, CachedSimulation, PrefetchReport,
    SimulationCache,
};
pub use store::{CacheEntry, Evicted, KeyedCacheStore};

use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached simulation results
    pub max_entries: usize,
    /// TTL applied when the caller does not supply one
    pub default_ttl: Duration,
    /// Interval of the background expiry sweep
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            default_ttl: Duration::from_secs(3600),     // 1 hour
            cleanup_interval: Duration::from_secs(60), // Sweep every minute
        }
    }
}
