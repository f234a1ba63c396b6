//! End-to-end engine tests over an in-memory slide implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use slidescope_server::deepzoom::{DeepZoomPyramid, PyramidOptions};
use slidescope_server::slide::{DeepZoomCache, Slide, SlideError, SlideOpener};

/// Minimal slide: one native level, constant fill, optional properties.
struct FakeSlide {
    width: u32,
    height: u32,
    properties: HashMap<String, String>,
    closes: Arc<AtomicUsize>,
}

impl FakeSlide {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            properties: HashMap::new(),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Slide for FakeSlide {
    fn level_count(&self) -> Result<u32, SlideError> {
        Ok(1)
    }

    fn level_dimensions(&self, level: u32) -> Result<(u32, u32), SlideError> {
        if level != 0 {
            return Err(SlideError::ReadFailed(format!("no such level: {}", level)));
        }
        Ok((self.width, self.height))
    }

    fn level_downsample(&self, _level: u32) -> Result<f64, SlideError> {
        Ok(1.0)
    }

    fn best_level_for_downsample(&self, _downsample: f64) -> Result<u32, SlideError> {
        Ok(0)
    }

    fn read_region(
        &self,
        _x: u32,
        _y: u32,
        _level: u32,
        w: u32,
        h: u32,
    ) -> Result<RgbaImage, SlideError> {
        Ok(RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0])))
    }

    fn property_value(&self, key: &str) -> String {
        self.properties.get(key).cloned().unwrap_or_default()
    }

    fn properties(&self) -> HashMap<String, String> {
        self.properties.clone()
    }

    fn associated_image_dimensions(&self) -> Result<HashMap<String, (u32, u32)>, SlideError> {
        Ok(HashMap::new())
    }

    fn read_associated_image(&self, name: &str) -> Result<RgbaImage, SlideError> {
        Err(SlideError::ReadFailed(format!(
            "no associated image: {}",
            name
        )))
    }

    fn thumbnail(&self, max_dim: u32) -> Result<RgbaImage, SlideError> {
        Ok(RgbaImage::from_pixel(
            max_dim.min(self.width),
            max_dim.min(self.height),
            Rgba([255, 255, 255, 255]),
        ))
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeOpener {
    width: u32,
    height: u32,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeOpener {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SlideOpener for FakeOpener {
    fn open(&self, _path: &Path) -> Result<Arc<dyn Slide>, SlideError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut slide = FakeSlide::new(self.width, self.height);
        slide.closes = Arc::clone(&self.closes);
        Ok(Arc::new(slide))
    }

    fn detect_vendor(&self, _path: &Path) -> Result<String, SlideError> {
        Ok("fake".to_string())
    }
}

#[test]
fn pyramid_of_1024_slide() {
    // 1024x1024, tile 254, overlap 1, one native level: 11 levels, the top
    // a 5x5 grid, the bottom a single pixel
    let slide = FakeSlide::new(1024, 1024);
    let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

    assert_eq!(pyramid.level_count(), 11);
    assert_eq!(pyramid.level_tiles()[10], (5, 5));

    let tile = pyramid.render_tile(&slide, 0, 0, 0).unwrap();
    assert_eq!(tile.dimensions(), (1, 1));
}

#[test]
fn every_tile_matches_declared_size() {
    let slide = FakeSlide::new(1000, 700);
    let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

    for level in 0..pyramid.level_count() {
        let (cols, rows) = pyramid.level_tiles()[level as usize];
        for (col, row) in [(0, 0), (cols - 1, rows - 1), (cols / 2, rows / 2)] {
            let info = pyramid.tile_info(level, col, row).unwrap();
            let tile = pyramid.render_tile(&slide, level, col, row).unwrap();
            assert_eq!(
                tile.dimensions(),
                info.output_tile_size,
                "level={} col={} row={}",
                level,
                col,
                row
            );
        }
    }
}

#[test]
fn transparent_slide_composites_to_white() {
    // FakeSlide returns zero-alpha pixels and declares no background
    let slide = FakeSlide::new(254, 254);
    let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

    let level = pyramid.level_count() - 1;
    let tile = pyramid.render_tile(&slide, level, 0, 0).unwrap();
    assert!(tile.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
}

#[test]
fn middle_tile_of_4096_slide() {
    let slide = FakeSlide::new(4096, 4096);
    let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

    let info = pyramid.tile_info(12, 4, 4).unwrap();
    assert_eq!(info.output_tile_size, (256, 256));
}

#[tokio::test]
async fn ttl_expiry_closes_slide_once() {
    let opener = Arc::new(FakeOpener::new(512, 512));
    let cache = DeepZoomCache::new(
        Arc::clone(&opener) as Arc<dyn SlideOpener>,
        Duration::from_secs(0),
        Duration::from_secs(3600),
    );

    cache
        .get_or_open("a", &PathBuf::from("/a.svs"), &PyramidOptions::default())
        .await
        .unwrap();
    cache.sweep().await;

    assert!(cache.read("a").await.is_none());
    assert_eq!(opener.closes.load(Ordering::SeqCst), 1);

    cache.sweep().await;
    assert_eq!(opener.closes.load(Ordering::SeqCst), 1);
    cache.shutdown().await;
}

#[tokio::test]
async fn concurrent_requests_open_one_slide() {
    let opener = Arc::new(FakeOpener::new(512, 512));
    let cache = Arc::new(DeepZoomCache::new(
        Arc::clone(&opener) as Arc<dyn SlideOpener>,
        Duration::from_secs(500),
        Duration::from_secs(3600),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_open("a", &PathBuf::from("/a.svs"), &PyramidOptions::default())
                    .await
            })
        })
        .collect();
    for task in tasks {
        let entry = task.await.unwrap().unwrap();
        assert_eq!(entry.id, "a");
    }

    assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    cache.shutdown().await;
}

#[tokio::test]
async fn empty_all_closes_every_slide() {
    let opener = Arc::new(FakeOpener::new(256, 256));
    let cache = DeepZoomCache::new(
        Arc::clone(&opener) as Arc<dyn SlideOpener>,
        Duration::from_secs(500),
        Duration::from_secs(3600),
    );

    for id in ["a", "b"] {
        cache
            .get_or_open(
                id,
                &PathBuf::from(format!("/{id}.svs")),
                &PyramidOptions::default(),
            )
            .await
            .unwrap();
    }

    cache.empty_all().await;
    assert!(cache.is_empty().await);
    assert_eq!(opener.closes.load(Ordering::SeqCst), 2);
    cache.shutdown().await;
}
