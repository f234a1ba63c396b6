//! Slide adapter over OpenSlide
//!
//! The engine only ever talks to slides through the `Slide` trait, a thin
//! capability surface over the decoding library. `OpenSlideAdapter` is the
//! production implementation; tests substitute their own.
//!
//! A single handle may serve concurrent tile requests, so region reads are
//! serialised with an internal mutex. `close` takes the handle out from
//! under the mutex: a racing in-flight read then fails with `ReadFailed`
//! instead of touching a dead handle.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use image::imageops::{self, FilterType};
use openslide_rs::{Address, OpenSlide, Region, Size};
use tracing::debug;

use super::types::SlideError;

/// Capability surface the engine requires from a slide library.
///
/// All methods are synchronous; long reads simply block the calling thread.
pub trait Slide: Send + Sync {
    fn level_count(&self) -> Result<u32, SlideError>;

    /// Dimensions of a native pyramid level.
    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError>;

    /// Dimensions of level 0.
    fn largest_level_dimensions(&self) -> Result<(u32, u32), SlideError> {
        self.level_dimensions(0)
    }

    /// Downsample factor from level 0 to the given level.
    fn level_downsample(&self, level: u32) -> Result<f64, SlideError>;

    fn level_downsamples(&self) -> Result<Vec<f64>, SlideError> {
        (0..self.level_count()?)
            .map(|level| self.level_downsample(level))
            .collect()
    }

    /// The coarsest level whose downsample does not exceed `downsample`.
    fn best_level_for_downsample(&self, downsample: f64) -> Result<u32, SlideError>;

    /// Read a region. `(x, y)` are level-0 coordinates; `(w, h)` are in
    /// `level` pixels. Returns an RGBA image of exactly `(w, h)`.
    fn read_region(&self, x: u32, y: u32, level: u32, w: u32, h: u32)
    -> Result<RgbaImage, SlideError>;

    /// Value of a slide property, or the empty string if absent.
    fn property_value(&self, key: &str) -> String;

    /// All slide properties.
    fn properties(&self) -> HashMap<String, String>;

    /// Dimensions of every associated image, keyed by name.
    fn associated_image_dimensions(&self) -> Result<HashMap<String, (u32, u32)>, SlideError>;

    fn read_associated_image(&self, name: &str) -> Result<RgbaImage, SlideError>;

    /// A whole-slide view bounded by `max_dim` on its longest axis.
    fn thumbnail(&self, max_dim: u32) -> Result<RgbaImage, SlideError>;

    /// Release the underlying handle. Idempotent; reads after close fail.
    fn close(&self);
}

/// Opens slides by path. The seam lets the cache be exercised without
/// real slide files.
pub trait SlideOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn Slide>, SlideError>;

    /// Probe the vendor of a slide file, used at catalog ingestion.
    fn detect_vendor(&self, path: &Path) -> Result<String, SlideError>;
}

/// Production opener backed by OpenSlide.
pub struct OpenSlideOpener;

impl SlideOpener for OpenSlideOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn Slide>, SlideError> {
        debug!("Opening slide at {:?}", path);
        let handle = OpenSlide::new(path)
            .map_err(|e| SlideError::OpenFailed(format!("{:?}: {}", path, e)))?;
        Ok(Arc::new(OpenSlideAdapter {
            handle: Mutex::new(Some(handle)),
        }))
    }

    fn detect_vendor(&self, path: &Path) -> Result<String, SlideError> {
        let slide = self.open(path)?;
        let vendor = slide.property_value("openslide.vendor");
        slide.close();
        if vendor.is_empty() {
            return Err(SlideError::OpenFailed(format!(
                "cannot detect vendor for {:?}",
                path
            )));
        }
        Ok(vendor)
    }
}

/// `Slide` implementation over an OpenSlide handle.
pub struct OpenSlideAdapter {
    handle: Mutex<Option<OpenSlide>>,
}

impl OpenSlideAdapter {
    fn with_handle<T>(
        &self,
        f: impl FnOnce(&OpenSlide) -> Result<T, SlideError>,
    ) -> Result<T, SlideError> {
        let guard = self
            .handle
            .lock()
            .map_err(|_| SlideError::ReadFailed("poisoned slide lock".to_string()))?;
        match guard.as_ref() {
            Some(handle) => f(handle),
            None => Err(SlideError::ReadFailed("slide is closed".to_string())),
        }
    }
}

impl Slide for OpenSlideAdapter {
    fn level_count(&self) -> Result<u32, SlideError> {
        self.with_handle(|s| {
            s.get_level_count()
                .map_err(|e| SlideError::ReadFailed(e.to_string()))
        })
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.with_handle(|s| {
            s.get_level_dimensions(level)
                .map(|d| (d.w as u32, d.h as u32))
                .map_err(|e| SlideError::ReadFailed(e.to_string()))
        })
    }

    fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        self.with_handle(|s| {
            s.get_level_downsample(level)
                .map_err(|e| SlideError::ReadFailed(e.to_string()))
        })
    }

    fn best_level_for_downsample(&self, downsample: f64) -> Result<u32, SlideError> {
        // Largest native downsample that does not exceed the target
        let mut best_level = 0u32;
        let mut best_downsample = self.level_downsample(0)?;
        for level in 1..self.level_count()? {
            let candidate = self.level_downsample(level)?;
            if candidate <= downsample && candidate >= best_downsample {
                best_level = level;
                best_downsample = candidate;
            }
        }
        Ok(best_level)
    }

    fn read_region(
        &self,
        x: u32,
        y: u32,
        level: u32,
        w: u32,
        h: u32,
    ) -> Result<RgbaImage, SlideError> {
        self.with_handle(|s| {
            let region = Region {
                address: Address { x, y },
                level,
                size: Size { w, h },
            };
            s.read_image_rgba(&region).map_err(|e| {
                SlideError::ReadFailed(format!(
                    "region ({}, {}) {}x{} at level {}: {}",
                    x, y, w, h, level, e
                ))
            })
        })
    }

    fn property_value(&self, key: &str) -> String {
        self.with_handle(|s| {
            s.get_property_value(key)
                .map_err(|e| SlideError::ReadFailed(e.to_string()))
        })
        .unwrap_or_default()
    }

    fn properties(&self) -> HashMap<String, String> {
        self.with_handle(|s| {
            let names = s.get_property_names();
            Ok(names
                .into_iter()
                .filter_map(|name| {
                    s.get_property_value(&name)
                        .ok()
                        .map(|value| (name, value))
                })
                .collect())
        })
        .unwrap_or_default()
    }

    fn associated_image_dimensions(&self) -> Result<HashMap<String, (u32, u32)>, SlideError> {
        self.with_handle(|s| {
            let names = s
                .get_associated_image_names()
                .map_err(|e| SlideError::ReadFailed(e.to_string()))?;
            let mut dimensions = HashMap::new();
            for name in names {
                let image = s
                    .read_associated_image_rgba(&name)
                    .map_err(|e| SlideError::ReadFailed(e.to_string()))?;
                dimensions.insert(name, image.dimensions());
            }
            Ok(dimensions)
        })
    }

    fn read_associated_image(&self, name: &str) -> Result<RgbaImage, SlideError> {
        self.with_handle(|s| {
            s.read_associated_image_rgba(name)
                .map_err(|e| SlideError::ReadFailed(format!("associated image {}: {}", name, e)))
        })
    }

    fn thumbnail(&self, max_dim: u32) -> Result<RgbaImage, SlideError> {
        let (w0, h0) = self.largest_level_dimensions()?;
        let longest = w0.max(h0).max(1);
        let downsample = (longest as f64 / max_dim.max(1) as f64).max(1.0);
        let level = self.best_level_for_downsample(downsample)?;
        let (lw, lh) = self.level_dimensions(level)?;
        let image = self.read_region(0, 0, level, lw, lh)?;

        let scale = (max_dim as f64 / longest as f64).min(1.0);
        let tw = ((w0 as f64 * scale).round() as u32).max(1);
        let th = ((h0 as f64 * scale).round() as u32).max(1);
        Ok(imageops::resize(&image, tw, th, FilterType::Lanczos3))
    }

    fn close(&self) {
        if let Ok(mut guard) = self.handle.lock() {
            // Dropping the handle releases the OS resources
            guard.take();
        }
    }
}
