//! Deep Zoom Image (DZI) descriptor
//!
//! Emits the XML that describes a pyramid to DeepZoom-compatible viewers
//! such as OpenSeadragon. The `Size` element reports the slide's native
//! full-resolution dimensions.

use super::pyramid::DeepZoomPyramid;

/// Generate the DZI XML descriptor for a pyramid over an image of the
/// given full-resolution dimensions.
pub fn generate_dzi_xml(pyramid: &DeepZoomPyramid, width: u32, height: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="{tile_size}"
       Overlap="{overlap}"
       Format="{format}">
  <Size Width="{width}" Height="{height}"/>
</Image>"#,
        tile_size = pyramid.tile_size(),
        overlap = pyramid.tile_overlap(),
        format = pyramid.format().as_str(),
    )
}
