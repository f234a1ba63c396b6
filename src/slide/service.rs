//! DeepZoom request facade
//!
//! The only surface the HTTP layer sees. Each operation resolves the
//! identifier through the catalog, looks up or creates the cache entry,
//! and delegates to the engine, encoding the result for the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use metrics::{counter, histogram};
use tracing::debug;

use crate::catalog::Catalog;
use crate::deepzoom::{DeepZoomError, PyramidOptions, TileFormat, generate_dzi_xml};
use crate::slide::SlideError;

use super::cache::{CacheEntry, DeepZoomCache};
use super::tile_cache::{TileCache, TileCacheConfig, TileKey};

/// JPEG quality for the tile endpoint
const TILE_JPEG_QUALITY: u8 = 75;

/// Facade over cache, catalog and engine
pub struct DeepZoomService {
    cache: Arc<DeepZoomCache>,
    catalog: Arc<Catalog>,
    tile_cache: TileCache,
    options: PyramidOptions,
}

impl DeepZoomService {
    pub fn new(
        cache: Arc<DeepZoomCache>,
        catalog: Arc<Catalog>,
        tile_cache_config: TileCacheConfig,
        options: PyramidOptions,
    ) -> Self {
        Self {
            cache,
            catalog,
            tile_cache: TileCache::new(tile_cache_config),
            options,
        }
    }

    /// Resolve an image identifier to its cached entry.
    async fn entry(&self, identifier: &str) -> Result<Arc<CacheEntry>, DeepZoomError> {
        let record = self
            .catalog
            .get(identifier)
            .ok_or_else(|| SlideError::NotFound(identifier.to_string()))?;
        self.cache
            .get_or_open(identifier, &record.path, &self.options)
            .await
    }

    /// Resolve an overlay of an image to its own cached entry, keyed by the
    /// overlay identifier.
    async fn overlay_entry(
        &self,
        identifier: &str,
        overlay_identifier: &str,
    ) -> Result<Arc<CacheEntry>, DeepZoomError> {
        let overlay = self
            .catalog
            .overlay(identifier, overlay_identifier)
            .ok_or_else(|| SlideError::NotFound(overlay_identifier.to_string()))?;
        self.cache
            .get_or_open(&overlay.identifier, &overlay.path, &self.options)
            .await
    }

    /// Render and encode one tile.
    pub async fn get_tile(
        &self,
        identifier: &str,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
    ) -> Result<Bytes, DeepZoomError> {
        let entry = self.entry(identifier).await?;
        self.tile_from_entry(&entry, level, col, row, format).await
    }

    /// Render and encode one tile of an overlay.
    pub async fn get_overlay_tile(
        &self,
        identifier: &str,
        overlay_identifier: &str,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
    ) -> Result<Bytes, DeepZoomError> {
        let entry = self.overlay_entry(identifier, overlay_identifier).await?;
        self.tile_from_entry(&entry, level, col, row, format).await
    }

    async fn tile_from_entry(
        &self,
        entry: &CacheEntry,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
    ) -> Result<Bytes, DeepZoomError> {
        let key = TileKey {
            slide_id: entry.id.clone(),
            level,
            col,
            row,
            format,
        };
        if let Some(bytes) = self.tile_cache.get(&key).await {
            return Ok(bytes);
        }

        let start = Instant::now();
        counter!("slidescope_tile_requests_total").increment(1);

        let result = entry
            .pyramid
            .render_tile(entry.slide.as_ref(), level, col, row)
            .and_then(|tile| encode_image(&tile, format, TILE_JPEG_QUALITY));

        histogram!("slidescope_tile_duration_seconds").record(start.elapsed());
        if result.is_err() {
            counter!("slidescope_tile_errors_total").increment(1);
        }

        let bytes = result?;
        debug!(
            "Rendered tile {} level={} col={} row={} ({} bytes)",
            entry.id,
            level,
            col,
            row,
            bytes.len()
        );
        self.tile_cache.insert(key, bytes.clone()).await;
        Ok(bytes)
    }

    /// DZI descriptor for an image.
    pub async fn get_dzi(&self, identifier: &str) -> Result<String, DeepZoomError> {
        let entry = self.entry(identifier).await?;
        let (width, height) = entry.slide.largest_level_dimensions()?;
        Ok(generate_dzi_xml(&entry.pyramid, width, height))
    }

    /// DZI descriptor for an overlay, keyed by the overlay identifier.
    pub async fn get_overlay_dzi(
        &self,
        identifier: &str,
        overlay_identifier: &str,
    ) -> Result<String, DeepZoomError> {
        let entry = self.overlay_entry(identifier, overlay_identifier).await?;
        let (width, height) = entry.slide.largest_level_dimensions()?;
        Ok(generate_dzi_xml(&entry.pyramid, width, height))
    }

    /// Encoded whole-slide thumbnail bounded by `max_dim`.
    pub async fn get_thumbnail(
        &self,
        identifier: &str,
        max_dim: u32,
        format: TileFormat,
        jpeg_quality: u8,
    ) -> Result<Bytes, DeepZoomError> {
        let entry = self.entry(identifier).await?;
        let thumbnail = entry.slide.thumbnail(max_dim)?;
        encode_image(&thumbnail, format, jpeg_quality)
    }

    /// All properties declared by the slide.
    pub async fn get_properties(
        &self,
        identifier: &str,
    ) -> Result<HashMap<String, String>, DeepZoomError> {
        let entry = self.entry(identifier).await?;
        Ok(entry.slide.properties())
    }
}

/// Encode an RGBA image in the requested format.
fn encode_image(
    image: &RgbaImage,
    format: TileFormat,
    jpeg_quality: u8,
) -> Result<Bytes, DeepZoomError> {
    let mut buffer = Vec::new();
    match format {
        TileFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = image::DynamicImage::ImageRgba8(image.clone()).into_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, jpeg_quality)
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )
                .map_err(|e| DeepZoomError::Codec(format!("jpeg encode error: {}", e)))?;
        }
        TileFormat::Png => {
            PngEncoder::new(&mut buffer)
                .write_image(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    ExtendedColorType::Rgba8,
                )
                .map_err(|e| DeepZoomError::Codec(format!("png encode error: {}", e)))?;
        }
    }
    Ok(Bytes::from(buffer))
}
