//! Slide access module
//!
//! This module provides:
//! - the `Slide` capability trait and its OpenSlide-backed adapter
//! - the expiring cache of open slides and derived pyramids
//! - the encoded-tile cache
//! - the `DeepZoomService` facade and its HTTP routes

pub mod adapter;
pub mod cache;
pub mod routes;
pub mod service;
pub mod tile_cache;
mod types;

pub use adapter::{OpenSlideOpener, Slide, SlideOpener};
pub use cache::{CacheEntry, DeepZoomCache};
pub use routes::{DeepZoomAppState, deepzoom_routes};
pub use service::DeepZoomService;
pub use tile_cache::{TileCache, TileCacheConfig, TileKey};
pub use types::SlideError;
