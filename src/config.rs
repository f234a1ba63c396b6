//! Server configuration
//!
//! Configuration is loaded from environment variables. Every value has a
//! sensible default so the server starts with no environment at all.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// DeepZoom geometry configuration
    pub deepzoom: DeepZoomConfig,

    /// Slide cache configuration
    pub cache: SlideCacheConfig,

    /// Path to the catalog manifest, if any
    pub catalog_manifest: Option<PathBuf>,

    /// Encoded-tile cache size cap in bytes
    pub tile_cache_max_bytes: u64,
}

/// DeepZoom geometry configuration
#[derive(Debug, Clone)]
pub struct DeepZoomConfig {
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// Pixels shared between neighbouring tiles
    pub tile_overlap: u32,
    /// Descriptor format: "jpeg" or "png"
    pub format: String,
    /// Honour the slide's declared bounds rectangle
    pub respect_bounds: bool,
}

/// Slide cache configuration
#[derive(Debug, Clone)]
pub struct SlideCacheConfig {
    /// Entry time-to-live
    pub ttl: Duration,
    /// Sweeper interval
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            deepzoom: DeepZoomConfig::default(),
            cache: SlideCacheConfig::default(),
            catalog_manifest: None,
            tile_cache_max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Default for DeepZoomConfig {
    fn default() -> Self {
        Self {
            tile_size: 254,
            tile_overlap: 1,
            format: "jpeg".to_string(),
            respect_bounds: true,
        }
    }
}

impl Default for SlideCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(500),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        if let Ok(val) = env::var("TILE_SIZE")
            && let Ok(size) = val.parse()
        {
            config.deepzoom.tile_size = size;
        }
        if let Ok(val) = env::var("TILE_OVERLAP")
            && let Ok(overlap) = val.parse()
        {
            config.deepzoom.tile_overlap = overlap;
        }
        if let Ok(format) = env::var("TILE_FORMAT")
            && !format.is_empty()
        {
            config.deepzoom.format = format;
        }
        if let Ok(val) = env::var("RESPECT_BOUNDS") {
            config.deepzoom.respect_bounds = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("SLIDE_CACHE_TTL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("SLIDE_CACHE_SWEEP_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.cache.sweep_interval = Duration::from_secs(secs);
        }

        if let Ok(path) = env::var("CATALOG_MANIFEST")
            && !path.is_empty()
        {
            config.catalog_manifest = Some(PathBuf::from(path));
        }

        if let Ok(val) = env::var("TILE_CACHE_MAX_MB")
            && let Ok(mb) = val.parse::<u64>()
        {
            config.tile_cache_max_bytes = mb * 1024 * 1024;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.deepzoom.tile_size, 254);
        assert_eq!(config.deepzoom.tile_overlap, 1);
        assert_eq!(config.deepzoom.format, "jpeg");
        assert!(config.deepzoom.respect_bounds);
        assert_eq!(config.cache.ttl, Duration::from_secs(500));
        assert!(config.catalog_manifest.is_none());
    }

    #[test]
    fn test_config_from_env() {
        // This test doesn't set env vars, so it should return defaults
        let config = Config::from_env();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.deepzoom.tile_size, 254);
    }
}
