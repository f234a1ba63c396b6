//! Size-capped cache of encoded tile bytes
//!
//! A rendered tile is immutable for a given slide, address and format, so
//! entries never go stale; the only pressure on this cache is memory.
//! Eviction is therefore purely by weight: each entry costs its encoded
//! bytes plus its key, and moka evicts once the byte cap is exceeded.
//! Keys carry the encoding so jpg and png renditions of one tile coexist.

use bytes::Bytes;
use metrics::{counter, gauge};
use moka::future::Cache;

use crate::deepzoom::TileFormat;

/// Key for encoded-tile cache entries
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TileKey {
    pub slide_id: String,
    pub level: u32,
    pub col: u32,
    pub row: u32,
    pub format: TileFormat,
}

impl TileKey {
    /// Approximate memory cost of the key itself.
    fn weight(&self) -> usize {
        std::mem::size_of::<Self>() + self.slide_id.len()
    }
}

/// Configuration for the encoded-tile cache
#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Total byte cap across all cached tiles
    pub max_size_bytes: u64,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Byte-capped tile cache
pub struct TileCache {
    cache: Cache<TileKey, Bytes>,
}

impl TileCache {
    pub fn new(config: TileCacheConfig) -> Self {
        let cache = Cache::builder()
            .weigher(|key: &TileKey, value: &Bytes| {
                (key.weight() + value.len()).min(u32::MAX as usize) as u32
            })
            .max_capacity(config.max_size_bytes)
            .build();
        Self { cache }
    }

    pub async fn get(&self, key: &TileKey) -> Option<Bytes> {
        let cached = self.cache.get(key).await;
        if cached.is_some() {
            counter!("slidescope_tile_cache_hits_total").increment(1);
        } else {
            counter!("slidescope_tile_cache_misses_total").increment(1);
        }
        cached
    }

    pub async fn insert(&self, key: TileKey, value: Bytes) {
        self.cache.insert(key, value).await;
        gauge!("slidescope_tile_cache_size_bytes").set(self.cache.weighted_size() as f64);
    }
}
