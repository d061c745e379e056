//! Background Cache Sweeper
//!
//! Expiring caches evict lazily: an expired entry is removed when a read
//! finds it. Entries that are never read again stay in memory until
//! something sweeps them. The sweeper is a Tokio task that periodically calls
//! [`ObjectCache::cleanup_expired`].
//!
//! ## Adaptive Frequency
//!
//! When a large share of entries turns out expired the sweeper halves its
//! interval (down to `min_interval`); when a sweep finds nothing it doubles
//! the interval (up to `max_interval`).

use crate::cache::ObjectCache;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the cache sweeper.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Interval before the first sweep (default: 1s)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 100ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 30s)
    pub max_interval: Duration,

    /// Speed up when more than this fraction of entries expired
    pub speedup_threshold: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            speedup_threshold: 0.25,
        }
    }
}

/// A handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct CacheSweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl CacheSweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let cache = Arc::new(ObjectCache::<i64, String>::expiring(Duration::from_secs(5)));
    /// let sweeper = CacheSweeper::start(Arc::clone(&cache), SweepConfig::default());
    /// // ...
    /// drop(sweeper);
    /// ```
    pub fn start<K, V>(cache: Arc<ObjectCache<K, V>>, config: SweepConfig) -> Self
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(cache, config, shutdown_rx));

        info!("Cache sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the sweeper. Also called on drop.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Cache sweeper stopped");
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop<K, V>(
    cache: Arc<ObjectCache<K, V>>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Cache sweeper received shutdown signal");
                    return;
                }
            }
        }

        let entries_before = cache.len();
        let expired = cache.cleanup_expired();

        if expired == 0 {
            current_interval = (current_interval * 2).min(config.max_interval);
            trace!(
                new_interval_ms = current_interval.as_millis(),
                "Nothing expired, slowing down sweeper"
            );
            continue;
        }

        let expiry_rate = expired as f64 / entries_before.max(1) as f64;
        if expiry_rate > config.speedup_threshold {
            current_interval = (current_interval / 2).max(config.min_interval);
        }
        debug!(
            expired = expired,
            remaining = cache.len(),
            new_interval_ms = current_interval.as_millis(),
            "Swept expired cache entries"
        );
    }
}
