//! DeepZoom tiling engine
//!
//! This module provides:
//! - `DeepZoomPyramid`: pyramid geometry derived from a slide
//! - tile resolution and rendering (`TileInfo`, `render_tile`)
//! - the DZI XML descriptor
//! - background colour parsing

pub mod color;
pub mod dzi;
pub mod pyramid;
pub mod tile;
pub mod types;

pub use color::parse_hex_color;
pub use dzi::generate_dzi_xml;
pub use pyramid::{DeepZoomPyramid, PyramidOptions};
pub use tile::TileInfo;
pub use types::{DeepZoomError, TileFormat};
