//! Test utilities
//!
//! Mock slide implementations, a mock opener with open/close accounting,
//! and router fixtures. Only compiled for tests.

#![cfg(test)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use image::{Rgba, RgbaImage};
use serde::de::DeserializeOwned;

use crate::catalog::{Catalog, ImageRecord, OverlayRecord};
use crate::deepzoom::PyramidOptions;
use crate::slide::{
    DeepZoomAppState, DeepZoomCache, DeepZoomService, Slide, SlideError, SlideOpener,
    TileCacheConfig, deepzoom_routes,
};

// ============================================================================
// Mock slide
// ============================================================================

/// In-memory slide with configurable geometry, properties and pixel fill
pub struct MockSlide {
    levels: Vec<(u32, u32)>,
    downsamples: Vec<f64>,
    properties: HashMap<String, String>,
    associated: HashMap<String, (u32, u32)>,
    fill: Rgba<u8>,
    closed: AtomicBool,
    close_counter: Option<Arc<AtomicUsize>>,
}

impl MockSlide {
    /// A slide with a single native level at downsample 1.
    pub fn single_level(w: u32, h: u32) -> Self {
        Self::pyramidal(w, h, &[1.0])
    }

    /// A slide with one native level per downsample factor.
    pub fn pyramidal(w: u32, h: u32, downsamples: &[f64]) -> Self {
        let levels = downsamples
            .iter()
            .map(|&d| {
                (
                    ((w as f64 / d).ceil() as u32).max(1),
                    ((h as f64 / d).ceil() as u32).max(1),
                )
            })
            .collect();
        Self {
            levels,
            downsamples: downsamples.to_vec(),
            properties: HashMap::new(),
            associated: HashMap::new(),
            fill: Rgba([127, 127, 127, 255]),
            closed: AtomicBool::new(false),
            close_counter: None,
        }
    }

    pub fn with_properties(mut self, properties: &[(&str, &str)]) -> Self {
        for (key, value) in properties {
            self.properties
                .insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn with_fill(mut self, fill: Rgba<u8>) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_associated_image(mut self, name: &str, w: u32, h: u32) -> Self {
        self.associated.insert(name.to_string(), (w, h));
        self
    }

    fn with_close_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.close_counter = Some(counter);
        self
    }

    fn check_open(&self) -> Result<(), SlideError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SlideError::ReadFailed("slide is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Slide for MockSlide {
    fn level_count(&self) -> Result<u32, SlideError> {
        Ok(self.levels.len() as u32)
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        self.levels
            .get(level as usize)
            .copied()
            .ok_or_else(|| SlideError::ReadFailed(format!("no such level: {}", level)))
    }

    fn level_downsample(&self, level: u32) -> Result<f64, SlideError> {
        self.downsamples
            .get(level as usize)
            .copied()
            .ok_or_else(|| SlideError::ReadFailed(format!("no such level: {}", level)))
    }

    fn best_level_for_downsample(&self, downsample: f64) -> Result<u32, SlideError> {
        let mut best_level = 0u32;
        let mut best_downsample = self.downsamples[0];
        for (level, &candidate) in self.downsamples.iter().enumerate().skip(1) {
            if candidate <= downsample && candidate >= best_downsample {
                best_level = level as u32;
                best_downsample = candidate;
            }
        }
        Ok(best_level)
    }

    fn read_region(
        &self,
        _x: u32,
        _y: u32,
        _level: u32,
        w: u32,
        h: u32,
    ) -> Result<RgbaImage, SlideError> {
        self.check_open()?;
        Ok(RgbaImage::from_pixel(w, h, self.fill))
    }

    fn property_value(&self, key: &str) -> String {
        self.properties.get(key).cloned().unwrap_or_default()
    }

    fn properties(&self) -> HashMap<String, String> {
        self.properties.clone()
    }

    fn associated_image_dimensions(&self) -> Result<HashMap<String, (u32, u32)>, SlideError> {
        Ok(self.associated.clone())
    }

    fn read_associated_image(&self, name: &str) -> Result<RgbaImage, SlideError> {
        self.check_open()?;
        let &(w, h) = self
            .associated
            .get(name)
            .ok_or_else(|| SlideError::ReadFailed(format!("no associated image: {}", name)))?;
        Ok(RgbaImage::from_pixel(w, h, self.fill))
    }

    fn thumbnail(&self, max_dim: u32) -> Result<RgbaImage, SlideError> {
        self.check_open()?;
        let (w, h) = self.levels[0];
        let scale = (max_dim as f64 / w.max(h) as f64).min(1.0);
        let tw = ((w as f64 * scale).round() as u32).max(1);
        let th = ((h as f64 * scale).round() as u32).max(1);
        Ok(RgbaImage::from_pixel(tw, th, self.fill))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(counter) = &self.close_counter {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

// ============================================================================
// Mock opener
// ============================================================================

/// Opener producing `MockSlide`s, with open/close accounting
pub struct MockOpener {
    width: u32,
    height: u32,
    properties: HashMap<String, String>,
    fail: bool,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl MockOpener {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            properties: HashMap::new(),
            fail: false,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every open (and vendor probe) fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of distinct slides closed so far.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SlideOpener for MockOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn Slide>, SlideError> {
        if self.fail {
            return Err(SlideError::OpenFailed(format!("{:?}", path)));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let properties: Vec<(&str, &str)> = self
            .properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        Ok(Arc::new(
            MockSlide::single_level(self.width, self.height)
                .with_properties(&properties)
                .with_close_counter(Arc::clone(&self.closes)),
        ))
    }

    fn detect_vendor(&self, path: &Path) -> Result<String, SlideError> {
        if self.fail {
            return Err(SlideError::OpenFailed(format!(
                "cannot detect vendor for {:?}",
                path
            )));
        }
        Ok("mock".to_string())
    }
}

// ============================================================================
// Router fixtures
// ============================================================================

/// Holds a wired DeepZoom router and its collaborators
pub struct TestContext {
    pub router: Router,
    pub opener: Arc<MockOpener>,
    pub cache: Arc<DeepZoomCache>,
}

impl TestContext {
    pub fn with_slide(identifier: &str, width: u32, height: u32) -> Self {
        Self::build(identifier, None, width, height)
    }

    pub fn with_slide_and_overlay(
        identifier: &str,
        overlay_identifier: &str,
        width: u32,
        height: u32,
    ) -> Self {
        Self::build(identifier, Some(overlay_identifier), width, height)
    }

    fn build(identifier: &str, overlay: Option<&str>, width: u32, height: u32) -> Self {
        let catalog = Arc::new(Catalog::new());
        catalog.insert(ImageRecord {
            identifier: identifier.to_string(),
            path: PathBuf::from(format!("/slides/{identifier}.svs")),
            overlays: overlay
                .map(|id| {
                    vec![OverlayRecord {
                        identifier: id.to_string(),
                        path: PathBuf::from(format!("/masks/{id}.tiff")),
                    }]
                })
                .unwrap_or_default(),
        });

        let opener = Arc::new(MockOpener::new(width, height));
        let cache = Arc::new(DeepZoomCache::new(
            Arc::clone(&opener) as Arc<dyn SlideOpener>,
            Duration::from_secs(500),
            Duration::from_secs(3600),
        ));
        let service = Arc::new(DeepZoomService::new(
            Arc::clone(&cache),
            catalog,
            TileCacheConfig::default(),
            PyramidOptions::default(),
        ));
        let router = deepzoom_routes(DeepZoomAppState { service });

        Self {
            router,
            opener,
            cache,
        }
    }
}

/// Build a GET request for the test router.
pub fn get_request(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .expect("failed to build request")
}

/// Build a request with a JSON body.
pub fn request_with_json(method: &str, path: &str, json: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .expect("failed to build request")
}

/// Deserialize a response body as JSON.
pub async fn body_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("failed to parse body")
}
