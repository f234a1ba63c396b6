//! DeepZoom pyramid geometry
//!
//! Derives the full DeepZoom level set for a slide: active-area dimensions
//! per native level, the synthetic power-of-two level stack from 1x1 up to
//! full resolution, the tile grid per level, and the mapping from each
//! DeepZoom level to the native slide level best suited to serve it.

use image::Rgba;
use tracing::warn;

use crate::slide::Slide;

use super::color::parse_hex_color;
use super::types::{DeepZoomError, TileFormat};

const PROP_BOUNDS_X: &str = "openslide.bounds-x";
const PROP_BOUNDS_Y: &str = "openslide.bounds-y";
const PROP_BOUNDS_WIDTH: &str = "openslide.bounds-width";
const PROP_BOUNDS_HEIGHT: &str = "openslide.bounds-height";
const PROP_BACKGROUND_COLOR: &str = "openslide.background-color";

/// Geometry parameters fixed at pyramid construction
#[derive(Debug, Clone)]
pub struct PyramidOptions {
    /// Tile edge length in pixels (e.g. 254)
    pub tile_size: u32,
    /// Pixels shared between neighbouring tiles
    pub tile_overlap: u32,
    /// Honour the slide's declared bounds rectangle
    pub respect_bounds: bool,
    /// Encoding declared in the DZI descriptor
    pub format: TileFormat,
}

impl Default for PyramidOptions {
    fn default() -> Self {
        Self {
            tile_size: 254,
            tile_overlap: 1,
            respect_bounds: true,
            format: TileFormat::Jpeg,
        }
    }
}

/// Immutable DeepZoom geometry for one slide (or associated image)
#[derive(Debug, Clone)]
pub struct DeepZoomPyramid {
    tile_size: u32,
    tile_overlap: u32,
    format: TileFormat,
    /// Offset of the active area inside native level-0 coordinates
    level0_offset: (u32, u32),
    /// Active-area dimensions per native slide level
    level_dimensions: Vec<(u32, u32)>,
    /// Dimensions per DeepZoom level; index 0 is 1x1
    z_dimensions: Vec<(u32, u32)>,
    /// Tile grid (cols, rows) per DeepZoom level
    level_tiles: Vec<(u32, u32)>,
    /// Native slide level serving each DeepZoom level
    dz_to_slide_level: Vec<u32>,
    /// Residual downsample per DeepZoom level after the chosen slide level
    lz_downsamples: Vec<f64>,
    /// Native downsample per slide level (cached at build time)
    l0_downsamples: Vec<f64>,
    /// Fill colour for fully transparent pixels
    bg_color: Rgba<u8>,
    /// Total number of tiles across all DeepZoom levels
    tile_count: u64,
}

impl DeepZoomPyramid {
    /// Build the pyramid geometry for a slide.
    pub fn build(slide: &dyn Slide, opts: &PyramidOptions) -> Result<Self, DeepZoomError> {
        let (level0_offset, level_dimensions) = if opts.respect_bounds {
            active_area(slide)?
        } else {
            let dimensions = (0..slide.level_count()?)
                .map(|level| slide.level_dimensions(level))
                .collect::<Result<Vec<_>, _>>()?;
            ((0, 0), dimensions)
        };

        let l0_downsamples = slide.level_downsamples()?;
        let bg_color = background_color(slide);

        Self::assemble(
            level_dimensions,
            l0_downsamples,
            level0_offset,
            bg_color,
            opts,
            |downsample| slide.best_level_for_downsample(downsample),
        )
    }

    /// Build a pyramid over an associated image.
    ///
    /// Associated images are flat: a single source level at downsample 1,
    /// so every DeepZoom level resamples from the image itself.
    pub fn for_associated_image(
        slide: &dyn Slide,
        name: &str,
        opts: &PyramidOptions,
    ) -> Result<Self, DeepZoomError> {
        let dimensions = slide
            .associated_image_dimensions()?
            .remove(name)
            .ok_or_else(|| DeepZoomError::AssociatedImageNotFound(name.to_string()))?;

        Self::assemble(
            vec![dimensions],
            vec![1.0],
            (0, 0),
            background_color(slide),
            opts,
            |_| Ok(0),
        )
    }

    fn assemble(
        level_dimensions: Vec<(u32, u32)>,
        l0_downsamples: Vec<f64>,
        level0_offset: (u32, u32),
        bg_color: Rgba<u8>,
        opts: &PyramidOptions,
        best_level: impl Fn(f64) -> Result<u32, crate::slide::SlideError>,
    ) -> Result<Self, DeepZoomError> {
        // DeepZoom level stack: halve (ceiling) from level 0 down to 1x1,
        // then flip so index 0 is the smallest level
        let mut z_size = level_dimensions[0];
        let mut z_dimensions = vec![z_size];
        while z_size.0 > 1 || z_size.1 > 1 {
            z_size = (z_size.0.div_ceil(2).max(1), z_size.1.div_ceil(2).max(1));
            z_dimensions.push(z_size);
        }
        z_dimensions.reverse();

        let level_tiles: Vec<(u32, u32)> = z_dimensions
            .iter()
            .map(|&(w, h)| (w.div_ceil(opts.tile_size), h.div_ceil(opts.tile_size)))
            .collect();

        let level_count = z_dimensions.len();

        // Total downsample from full resolution at each DeepZoom level
        let l0_z_downsamples: Vec<f64> = (0..level_count)
            .map(|level| 2f64.powi((level_count - level - 1) as i32))
            .collect();

        let dz_to_slide_level = l0_z_downsamples
            .iter()
            .map(|&downsample| best_level(downsample))
            .collect::<Result<Vec<_>, _>>()?;

        let lz_downsamples: Vec<f64> = (0..level_count)
            .map(|level| {
                l0_z_downsamples[level] / l0_downsamples[dz_to_slide_level[level] as usize]
            })
            .collect();

        let tile_count = level_tiles
            .iter()
            .map(|&(cols, rows)| cols as u64 * rows as u64)
            .sum();

        Ok(Self {
            tile_size: opts.tile_size,
            tile_overlap: opts.tile_overlap,
            format: opts.format,
            level0_offset,
            level_dimensions,
            z_dimensions,
            level_tiles,
            dz_to_slide_level,
            lz_downsamples,
            l0_downsamples,
            bg_color,
            tile_count,
        })
    }

    /// Number of DeepZoom levels.
    pub fn level_count(&self) -> u32 {
        self.z_dimensions.len() as u32
    }

    /// Total number of tiles in the pyramid.
    pub fn tile_count(&self) -> u64 {
        self.tile_count
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn tile_overlap(&self) -> u32 {
        self.tile_overlap
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn bg_color(&self) -> Rgba<u8> {
        self.bg_color
    }

    pub fn level0_offset(&self) -> (u32, u32) {
        self.level0_offset
    }

    /// Active-area dimensions per DeepZoom level.
    pub fn z_dimensions(&self) -> &[(u32, u32)] {
        &self.z_dimensions
    }

    /// Tile grid per DeepZoom level.
    pub fn level_tiles(&self) -> &[(u32, u32)] {
        &self.level_tiles
    }

    /// Active-area dimensions per native slide level.
    pub fn level_dimensions(&self) -> &[(u32, u32)] {
        &self.level_dimensions
    }

    pub fn dz_to_slide_level(&self) -> &[u32] {
        &self.dz_to_slide_level
    }

    pub fn lz_downsamples(&self) -> &[f64] {
        &self.lz_downsamples
    }

    pub(crate) fn l0_downsample(&self, slide_level: u32) -> f64 {
        self.l0_downsamples[slide_level as usize]
    }
}

/// Offset and per-level dimensions of the active area declared by the
/// slide's bounds properties. Each missing or unparseable property falls
/// back on its own: offset 0 on that axis, scale 1 on that dimension.
fn active_area(slide: &dyn Slide) -> Result<((u32, u32), Vec<(u32, u32)>), DeepZoomError> {
    let offset_x = slide
        .property_value(PROP_BOUNDS_X)
        .parse::<u32>()
        .unwrap_or(0);
    let offset_y = slide
        .property_value(PROP_BOUNDS_Y)
        .parse::<u32>()
        .unwrap_or(0);

    let (w0, h0) = slide.largest_level_dimensions()?;
    let scale_x = slide
        .property_value(PROP_BOUNDS_WIDTH)
        .parse::<f64>()
        .map(|w| w / w0 as f64)
        .unwrap_or(1.0);
    let scale_y = slide
        .property_value(PROP_BOUNDS_HEIGHT)
        .parse::<f64>()
        .map(|h| h / h0 as f64)
        .unwrap_or(1.0);

    let dimensions = (0..slide.level_count()?)
        .map(|level| {
            slide.level_dimensions(level).map(|(w, h)| {
                (
                    (w as f64 * scale_x).ceil() as u32,
                    (h as f64 * scale_y).ceil() as u32,
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(((offset_x, offset_y), dimensions))
}

/// Slide-declared background colour, defaulting to opaque white. A parse
/// failure is non-fatal: logged and downgraded to white.
fn background_color(slide: &dyn Slide) -> Rgba<u8> {
    let mut declared = slide.property_value(PROP_BACKGROUND_COLOR);
    if declared.is_empty() {
        declared = "ffffff".to_string();
    }
    parse_hex_color(&declared).unwrap_or_else(|e| {
        warn!("Ignoring unparseable background colour: {}", e);
        Rgba([255, 255, 255, 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockSlide;

    #[test]
    fn test_single_level_slide_geometry() {
        // 1024x1024, one native level: 11 DeepZoom levels, 5x5 grid on top
        let slide = MockSlide::single_level(1024, 1024);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

        assert_eq!(pyramid.level_count(), 11);
        assert_eq!(pyramid.z_dimensions()[0], (1, 1));
        assert_eq!(pyramid.z_dimensions()[10], (1024, 1024));
        assert_eq!(pyramid.level_tiles()[10], (5, 5));
        assert_eq!(pyramid.level_tiles()[0], (1, 1));
    }

    #[test]
    fn test_level_count_formula() {
        // ceil(log2(N)) + 1 levels for a slide whose largest dimension is N
        for (w, h, expected) in [(1, 1, 1), (2, 2, 2), (256, 256, 9), (1000, 500, 11)] {
            let slide = MockSlide::single_level(w, h);
            let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();
            assert_eq!(pyramid.level_count(), expected, "{}x{}", w, h);
        }
    }

    #[test]
    fn test_z_dimensions_monotone() {
        let slide = MockSlide::single_level(4096, 1000);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

        let dims = pyramid.z_dimensions();
        assert_eq!(dims[0], (1, 1));
        for pair in dims.windows(2) {
            assert!(pair[1].0 >= pair[0].0 && pair[1].1 >= pair[0].1);
            assert!(pair[1].0 <= pair[0].0 * 2 && pair[1].1 <= pair[0].1 * 2);
        }
    }

    #[test]
    fn test_tile_count_matches_grids() {
        let slide = MockSlide::single_level(4096, 4096);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

        let total: u64 = pyramid
            .level_tiles()
            .iter()
            .map(|&(c, r)| c as u64 * r as u64)
            .sum();
        assert_eq!(pyramid.tile_count(), total);
    }

    #[test]
    fn test_multi_level_mapping() {
        // Native levels at downsamples 1, 4, 16
        let slide = MockSlide::pyramidal(4096, 4096, &[1.0, 4.0, 16.0]);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

        let levels = pyramid.dz_to_slide_level();
        let last = pyramid.level_count() as usize - 1;
        // Full resolution reads native level 0 with no residual downsample
        assert_eq!(levels[last], 0);
        assert!((pyramid.lz_downsamples()[last] - 1.0).abs() < 1e-9);
        // Half resolution still reads level 0, residual 2x
        assert_eq!(levels[last - 1], 0);
        assert!((pyramid.lz_downsamples()[last - 1] - 2.0).abs() < 1e-9);
        // Quarter resolution lines up with native level 1 exactly
        assert_eq!(levels[last - 2], 1);
        assert!((pyramid.lz_downsamples()[last - 2] - 1.0).abs() < 1e-9);

        // Chosen level never finer than needed; mapping monotone
        for (i, &lz) in pyramid.lz_downsamples().iter().enumerate() {
            assert!(lz >= 1.0 - 1e-9, "lz[{}] = {}", i, lz);
        }
        for pair in levels.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_bounds_limit_active_area() {
        let slide = MockSlide::single_level(1000, 1000).with_properties(&[
            (PROP_BOUNDS_X, "10"),
            (PROP_BOUNDS_Y, "20"),
            (PROP_BOUNDS_WIDTH, "500"),
            (PROP_BOUNDS_HEIGHT, "500"),
        ]);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

        assert_eq!(pyramid.level0_offset(), (10, 20));
        assert_eq!(pyramid.level_dimensions()[0], (500, 500));
        assert_eq!(*pyramid.z_dimensions().last().unwrap(), (500, 500));
    }

    #[test]
    fn test_bounds_ignored_when_not_respected() {
        let slide = MockSlide::single_level(1000, 1000).with_properties(&[
            (PROP_BOUNDS_X, "10"),
            (PROP_BOUNDS_WIDTH, "500"),
        ]);
        let opts = PyramidOptions {
            respect_bounds: false,
            ..PyramidOptions::default()
        };
        let pyramid = DeepZoomPyramid::build(&slide, &opts).unwrap();

        assert_eq!(pyramid.level0_offset(), (0, 0));
        assert_eq!(pyramid.level_dimensions()[0], (1000, 1000));
    }

    #[test]
    fn test_partial_bounds_default_individually() {
        let slide = MockSlide::single_level(1000, 800)
            .with_properties(&[(PROP_BOUNDS_X, "30"), (PROP_BOUNDS_HEIGHT, "400")]);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();

        assert_eq!(pyramid.level0_offset(), (30, 0));
        assert_eq!(pyramid.level_dimensions()[0], (1000, 400));
    }

    #[test]
    fn test_background_color_defaults_to_white() {
        let slide = MockSlide::single_level(64, 64);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();
        assert_eq!(pyramid.bg_color(), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_background_color_from_property() {
        let slide = MockSlide::single_level(64, 64)
            .with_properties(&[(PROP_BACKGROUND_COLOR, "102030")]);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();
        assert_eq!(pyramid.bg_color(), Rgba([0x10, 0x20, 0x30, 255]));
    }

    #[test]
    fn test_unparseable_background_color_falls_back() {
        let slide = MockSlide::single_level(64, 64)
            .with_properties(&[(PROP_BACKGROUND_COLOR, "magenta")]);
        let pyramid = DeepZoomPyramid::build(&slide, &PyramidOptions::default()).unwrap();
        assert_eq!(pyramid.bg_color(), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_associated_image_pyramid() {
        let slide =
            MockSlide::single_level(4096, 4096).with_associated_image("thumbnail", 300, 200);
        let pyramid = DeepZoomPyramid::for_associated_image(
            &slide,
            "thumbnail",
            &PyramidOptions::default(),
        )
        .unwrap();

        assert_eq!(*pyramid.z_dimensions().last().unwrap(), (300, 200));
        assert_eq!(pyramid.dz_to_slide_level().iter().max(), Some(&0));
        // Every level resamples from the flat image itself
        let last = pyramid.level_count() as usize - 1;
        assert!((pyramid.lz_downsamples()[last] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_associated_image() {
        let slide = MockSlide::single_level(64, 64);
        let result =
            DeepZoomPyramid::for_associated_image(&slide, "label", &PyramidOptions::default());
        assert!(matches!(
            result,
            Err(DeepZoomError::AssociatedImageNotFound(_))
        ));
    }
}
