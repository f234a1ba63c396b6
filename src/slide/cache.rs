//! Expiring cache of open slides and their pyramid geometry
//!
//! Opening a slide and deriving its DeepZoom geometry is expensive, so both
//! are cached per identifier. Entries carry a fixed expiry stamped at
//! insert; a background sweeper closes and removes entries past their TTL.
//! Expiry is deliberately not refreshed on hit, which bounds the worst-case
//! lifetime of every handle.
//!
//! Slides are closed exactly once, by whichever path removes the entry
//! (sweep, replace, explicit removal, or `empty_all`). Removers collect
//! entries under the write lock and close the handles only after releasing
//! it, so a slow close never starves readers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::{counter, gauge};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deepzoom::{DeepZoomError, DeepZoomPyramid, PyramidOptions};

use super::adapter::{Slide, SlideOpener};

/// One cached slide: identifier, derived geometry, open handle, expiry
pub struct CacheEntry {
    pub id: String,
    pub pyramid: DeepZoomPyramid,
    pub slide: Arc<dyn Slide>,
    expire_at: u64,
}

impl CacheEntry {
    fn expired(&self, now: u64) -> bool {
        self.expire_at <= now
    }
}

struct CacheInner {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    opener: Arc<dyn SlideOpener>,
    ttl: Duration,
}

/// Keyed store of open slides with time-based expiry
pub struct DeepZoomCache {
    inner: Arc<CacheInner>,
    stop: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl DeepZoomCache {
    /// Create a cache and start its background sweeper.
    pub fn new(opener: Arc<dyn SlideOpener>, ttl: Duration, sweep_interval: Duration) -> Self {
        info!(
            "Creating slide cache with ttl {:?} and sweep interval {:?}",
            ttl, sweep_interval
        );
        let inner = Arc::new(CacheInner {
            entries: RwLock::new(HashMap::new()),
            opener,
            ttl,
        });
        let (stop, stop_rx) = watch::channel(false);
        let sweeper = spawn_sweeper(Arc::clone(&inner), sweep_interval, stop_rx);

        Self {
            inner,
            stop,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Return the cached entry for `id`, opening the slide and building its
    /// pyramid on a miss. A hit does not extend the entry's expiry.
    pub async fn get_or_open(
        &self,
        id: &str,
        path: &Path,
        opts: &PyramidOptions,
    ) -> Result<Arc<CacheEntry>, DeepZoomError> {
        let now = now_secs();

        {
            let entries = self.inner.entries.read().await;
            if let Some(entry) = entries.get(id) {
                if !entry.expired(now) {
                    counter!("slidescope_slide_cache_hits_total").increment(1);
                    return Ok(Arc::clone(entry));
                }
            }
        }

        // Miss (or expired entry): open under the write lock so concurrent
        // requests for the same id result in exactly one open
        let stale;
        let entry = {
            let mut entries = self.inner.entries.write().await;

            if let Some(entry) = entries.get(id) {
                if !entry.expired(now) {
                    counter!("slidescope_slide_cache_hits_total").increment(1);
                    return Ok(Arc::clone(entry));
                }
            }

            counter!("slidescope_slide_cache_misses_total").increment(1);
            info!("Not in cache, will add: {}", id);

            let slide = self.inner.opener.open(path)?;
            let pyramid = match DeepZoomPyramid::build(slide.as_ref(), opts) {
                Ok(pyramid) => pyramid,
                Err(e) => {
                    // Never insert a handle the caller will not receive
                    slide.close();
                    return Err(e);
                }
            };

            let entry = Arc::new(CacheEntry {
                id: id.to_string(),
                pyramid,
                slide,
                expire_at: now + self.inner.ttl.as_secs(),
            });
            stale = entries.insert(id.to_string(), Arc::clone(&entry));
            gauge!("slidescope_slide_cache_entries").set(entries.len() as f64);
            entry
        };

        if let Some(old) = stale {
            debug!("Replacing expired entry: {}", old.id);
            old.slide.close();
        }
        Ok(entry)
    }

    /// Peek at an entry without creating it.
    pub async fn read(&self, id: &str) -> Option<Arc<CacheEntry>> {
        let entries = self.inner.entries.read().await;
        entries
            .get(id)
            .filter(|entry| !entry.expired(now_secs()))
            .map(Arc::clone)
    }

    /// Remove an entry, closing its slide.
    pub async fn remove(&self, id: &str) {
        let removed = {
            let mut entries = self.inner.entries.write().await;
            let removed = entries.remove(id);
            gauge!("slidescope_slide_cache_entries").set(entries.len() as f64);
            removed
        };
        if let Some(entry) = removed {
            debug!("Closing slide with ID {}", entry.id);
            entry.slide.close();
        }
    }

    /// Remove every entry, closing every slide.
    pub async fn empty_all(&self) {
        let drained: Vec<Arc<CacheEntry>> = {
            let mut entries = self.inner.entries.write().await;
            gauge!("slidescope_slide_cache_entries").set(0.0);
            entries.drain().map(|(_, entry)| entry).collect()
        };
        debug!("Emptying complete cache ({} entries)", drained.len());
        for entry in drained {
            entry.slide.close();
        }
    }

    /// Remove and close every expired entry. Called by the sweeper on each
    /// tick; exposed so tests can drive expiry deterministically.
    pub async fn sweep(&self) {
        sweep_expired(&self.inner).await;
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop the sweeper and close every cached slide.
    pub async fn shutdown(&self) {
        if self.stop.send(true).is_err() {
            warn!("Slide cache sweeper already stopped");
        }
        if let Some(handle) = self.sweeper.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Slide cache sweeper did not stop cleanly: {}", e);
            }
        }
        self.empty_all().await;
    }
}

fn spawn_sweeper(
    inner: Arc<CacheInner>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => sweep_expired(&inner).await,
            }
        }
        debug!("Slide cache sweeper stopped");
    })
}

async fn sweep_expired(inner: &CacheInner) {
    let now = now_secs();
    let expired: Vec<Arc<CacheEntry>> = {
        let mut entries = inner.entries.write().await;
        let ids: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        let expired = ids
            .iter()
            .filter_map(|id| entries.remove(id))
            .collect::<Vec<_>>();
        gauge!("slidescope_slide_cache_entries").set(entries.len() as f64);
        expired
    };

    // Close outside the lock so readers are never starved by a slow close
    for entry in expired {
        info!("DeepZoom expired: {}", entry.id);
        entry.slide.close();
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
