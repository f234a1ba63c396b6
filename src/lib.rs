//! SlideScope Server Library
//!
//! This module exports the DeepZoom engine and server components for use
//! in integration tests and external tooling.

pub mod catalog;
pub mod config;
pub mod deepzoom;
pub mod slide;

mod test_utils;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogAppState, ImageRecord, OverlayRecord, catalog_routes};
pub use config::Config;
pub use deepzoom::{
    DeepZoomError, DeepZoomPyramid, PyramidOptions, TileFormat, generate_dzi_xml,
};
pub use slide::{
    DeepZoomAppState, DeepZoomCache, DeepZoomService, OpenSlideOpener, Slide, SlideError,
    SlideOpener, TileCacheConfig, deepzoom_routes,
};
