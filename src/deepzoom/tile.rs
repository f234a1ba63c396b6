//! Tile resolution and rendering
//!
//! Resolves a `(level, col, row)` address into a region read at the best
//! native slide level, composites transparent pixels against the pyramid's
//! background colour, and rescales to the exact DeepZoom tile size.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::slide::Slide;

use super::pyramid::DeepZoomPyramid;
use super::types::DeepZoomError;

/// Resolved read parameters for one tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileInfo {
    /// Region origin in native level-0 coordinates
    pub level0_location: (u32, u32),
    /// Native slide level to read from
    pub slide_level: u32,
    /// Region size, in slide-level pixels, to request from the slide
    pub level_output_size: (u32, u32),
    /// Final tile size in DeepZoom pixels at the requested level
    pub output_tile_size: (u32, u32),
}

impl DeepZoomPyramid {
    /// Resolve the read parameters for a tile address.
    pub fn tile_info(&self, level: u32, col: u32, row: u32) -> Result<TileInfo, DeepZoomError> {
        if level >= self.level_count() {
            return Err(DeepZoomError::InvalidAddress { level, col, row });
        }
        let (cols, rows) = self.level_tiles()[level as usize];
        if col >= cols || row >= rows {
            return Err(DeepZoomError::InvalidAddress { level, col, row });
        }

        let slide_level = self.dz_to_slide_level()[level as usize];
        let lz = self.lz_downsamples()[level as usize];
        let (z_w, z_h) = self.z_dimensions()[level as usize];
        let tile_size = self.tile_size();
        let overlap = self.tile_overlap();

        // Interior edges carry the configured overlap; outer edges none
        let overlap_tl = (
            if col != 0 { overlap } else { 0 },
            if row != 0 { overlap } else { 0 },
        );
        let overlap_br = (
            if col != cols - 1 { overlap } else { 0 },
            if row != rows - 1 { overlap } else { 0 },
        );

        // Final tile size at this level; the last tile may be partial
        let output_tile_size = (
            tile_size.min(z_w - tile_size * col) + overlap_tl.0 + overlap_br.0,
            tile_size.min(z_h - tile_size * row) + overlap_tl.1 + overlap_br.1,
        );

        // Region origin in slide-level coordinates
        let l_location = (
            lz * (tile_size * col - overlap_tl.0) as f64,
            lz * (tile_size * row - overlap_tl.1) as f64,
        );

        // Translate to native level-0 coordinates, truncating, and add the
        // active-area offset
        let (offset_x, offset_y) = self.level0_offset();
        let level0_location = (
            offset_x + (self.l0_downsample(slide_level) * l_location.0) as u32,
            offset_y + (self.l0_downsample(slide_level) * l_location.1) as u32,
        );

        // Clamp the read size to the active area at the source level
        let (level_w, level_h) = self.level_dimensions()[slide_level as usize];
        let level_output_size = (
            f64::min(
                (lz * output_tile_size.0 as f64).ceil(),
                level_w as f64 - l_location.0.ceil(),
            ) as u32,
            f64::min(
                (lz * output_tile_size.1 as f64).ceil(),
                level_h as f64 - l_location.1.ceil(),
            ) as u32,
        );

        Ok(TileInfo {
            level0_location,
            slide_level,
            level_output_size,
            output_tile_size,
        })
    }

    /// Render one tile: read the region, composite the background and
    /// rescale. The result is exactly `output_tile_size` pixels.
    pub fn render_tile(
        &self,
        slide: &dyn Slide,
        level: u32,
        col: u32,
        row: u32,
    ) -> Result<RgbaImage, DeepZoomError> {
        let info = self.tile_info(level, col, row)?;

        let mut tile = slide.read_region(
            info.level0_location.0,
            info.level0_location.1,
            info.slide_level,
            info.level_output_size.0,
            info.level_output_size.1,
        )?;

        composite_background(&mut tile, self.bg_color())?;

        Ok(rescale_if_needed(tile, &info))
    }

    /// Render one tile of a flat source image (an associated image).
    ///
    /// Same resolution algorithm as `render_tile`, but the region is copied
    /// out of `source` instead of read from the slide, clamped per axis to
    /// the source bounds.
    pub fn render_tile_from_image(
        &self,
        source: &RgbaImage,
        level: u32,
        col: u32,
        row: u32,
    ) -> Result<RgbaImage, DeepZoomError> {
        let info = self.tile_info(level, col, row)?;
        let (x0, y0) = info.level0_location;
        let (w, h) = info.level_output_size;

        let mut tile = RgbaImage::from_pixel(w.max(1), h.max(1), self.bg_color());
        let view = imageops::crop_imm(source, x0, y0, w, h).to_image();
        imageops::replace(&mut tile, &view, 0, 0);

        Ok(rescale_if_needed(tile, &info))
    }
}

/// Replace fully transparent pixels with the background colour. Any partial
/// alpha value is rejected: the slide library only emits fully opaque or
/// fully transparent pixels.
fn composite_background(tile: &mut RgbaImage, bg: Rgba<u8>) -> Result<(), DeepZoomError> {
    for (x, y, pixel) in tile.enumerate_pixels_mut() {
        match pixel.0[3] {
            0 => *pixel = bg,
            0xff => {}
            alpha => return Err(DeepZoomError::UnsupportedAlpha { x, y, alpha }),
        }
    }
    Ok(())
}

/// Bilinear resample to the final tile size when the source read does not
/// already match it.
fn rescale_if_needed(tile: RgbaImage, info: &TileInfo) -> RgbaImage {
    let (w, h) = info.output_tile_size;
    if tile.dimensions() != (w, h) {
        imageops::resize(&tile, w, h, FilterType::Triangle)
    } else {
        tile
    }
}
