//! Per-block color and skip-refine assignment.
//!
//! A block is resolved against the processing-space tables: its coverage
//! decides whether the lineage freezes, and its color comes either from the
//! dominant extractor (shallow levels, raw raster available) or from the
//! integral average.

use crate::color::Rgb;
use crate::dominant::{DominantColorExtractor, ExtractionError};
use crate::grid::{Block, BlockGeometry};
use crate::image::{Dimensions, RasterImage};
use crate::integral::IntegralTables;
use crate::stats::{self, PixelRect, DEFAULT_MIN_OPACITY_RATIO};
use rayon::prelude::*;

/// Default coverage below which a lineage stops refining.
pub const DEFAULT_MIN_COVERAGE: f64 = 0.01;
/// Deepest level that still uses the dominant extractor by default.
pub const DEFAULT_MAX_ADVANCED_LEVEL: u32 = 3;

/// When to prefer the dominant extractor over the integral average.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdvancedExtraction {
    /// Master switch.
    pub enabled: bool,
    /// Blocks with `level <= max_level` use the extractor.
    pub max_level: u32,
}

impl Default for AdvancedExtraction {
    fn default() -> Self {
        Self {
            enabled: true,
            max_level: DEFAULT_MAX_ADVANCED_LEVEL,
        }
    }
}

/// Owned coloring parameters, shareable across threads and task payloads.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColorSettings {
    /// Coverage below which `skip_refine` is set.
    pub min_coverage: f64,
    /// Opaque fraction below which the integral average is white.
    pub min_opacity_ratio: f64,
    /// Dominant extractor gating.
    pub advanced: AdvancedExtraction,
    /// Dominant extractor parameters.
    pub extractor: DominantColorExtractor,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            min_coverage: DEFAULT_MIN_COVERAGE,
            min_opacity_ratio: DEFAULT_MIN_OPACITY_RATIO,
            advanced: AdvancedExtraction::default(),
            extractor: DominantColorExtractor::default(),
        }
    }
}

/// Outcome of coloring one block in a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockColorResult {
    /// Position of the block in the submitted batch.
    pub index: usize,
    /// Integral average color.
    pub color: Rgb,
    /// Opaque coverage of the mapped rectangle.
    pub coverage: f64,
    /// `coverage < min_coverage`.
    pub skip_refine: bool,
}

/// Resolves block colors against one processed image.
#[derive(Clone, Copy, Debug)]
pub struct BlockColorizer<'a> {
    tables: &'a IntegralTables,
    raster: Option<&'a RasterImage>,
    display: Dimensions,
    settings: ColorSettings,
}

impl<'a> BlockColorizer<'a> {
    /// Colorizer using only the integral tables.
    #[must_use]
    pub fn new(tables: &'a IntegralTables, display: Dimensions, settings: ColorSettings) -> Self {
        Self {
            tables,
            raster: None,
            display,
            settings,
        }
    }

    /// Attach the processing-resolution raster so shallow blocks can use the dominant extractor.
    #[must_use]
    pub fn with_raster(mut self, raster: &'a RasterImage) -> Self {
        self.raster = Some(raster);
        self
    }

    /// Parameters in effect.
    #[must_use]
    pub fn settings(&self) -> &ColorSettings {
        &self.settings
    }

    /// Table-space rectangle covered by a display-space block.
    #[must_use]
    pub fn table_rect(&self, geometry: &BlockGeometry) -> PixelRect {
        stats::table_rect_for(self.tables, geometry, self.display)
    }

    /// Opaque coverage of a display-space block.
    #[must_use]
    pub fn coverage(&self, geometry: &BlockGeometry) -> f64 {
        stats::block_coverage(self.tables, geometry, self.display)
    }

    /// Integral average of a display-space block.
    #[must_use]
    pub fn average(&self, geometry: &BlockGeometry) -> Rgb {
        stats::average_color(
            self.tables,
            self.table_rect(geometry),
            self.settings.min_opacity_ratio,
        )
    }

    /// Color `block` and freeze its lineage when coverage is too low.
    ///
    /// A block that is already frozen stays frozen.
    pub fn assign(&self, block: &mut Block) {
        let geometry = block.geometry();
        if self.coverage(&geometry) < self.settings.min_coverage {
            block.skip_refine = true;
        }
        block.color = Some(self.color_for(&geometry, block.level));
    }

    fn color_for(&self, geometry: &BlockGeometry, level: u32) -> Rgb {
        let advanced = self.settings.advanced;
        let raster = match self.raster {
            Some(raster) if advanced.enabled && level <= advanced.max_level => raster,
            _ => return self.average(geometry),
        };

        match self.settings.extractor.extract(raster, self.table_rect(geometry)) {
            Ok(color) => color,
            Err(err @ ExtractionError::InvalidColor(_)) => {
                tracing::warn!(
                    error = %err,
                    "advanced extraction failed, using integral average"
                );
                self.average(geometry)
            }
            Err(err) => {
                tracing::warn!(error = %err, level, "no usable samples for block");
                err.fallback_color()
            }
        }
    }

    /// Integral-average color, coverage and skip flag for each block, in parallel.
    ///
    /// Results are returned in input order.
    #[must_use]
    pub fn color_batch(&self, blocks: &[BlockGeometry]) -> Vec<BlockColorResult> {
        let _span = tracing::debug_span!("color_batch", blocks = blocks.len()).entered();
        blocks
            .par_iter()
            .enumerate()
            .map(|(index, geometry)| {
                let coverage = self.coverage(geometry);
                BlockColorResult {
                    index,
                    color: self.average(geometry),
                    coverage,
                    skip_refine: coverage < self.settings.min_coverage,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BlockGrid, GridSize};

    /// Left half opaque red, right half fully transparent.
    fn half_red(size: u32) -> RasterImage {
        RasterImage::from_fn(size, size, |x, _| {
            if x < size / 2 {
                [220, 20, 20, 255]
            } else {
                [0, 0, 0, 0]
            }
        })
        .unwrap()
    }

    fn block(level: u32, geometry: BlockGeometry) -> Block {
        Block {
            row: 0,
            col: 0,
            initial_row: 0,
            initial_col: 0,
            level,
            x: geometry.x,
            y: geometry.y,
            width: geometry.width,
            height: geometry.height,
            color: None,
            skip_refine: false,
        }
    }

    #[test]
    fn test_transparent_block_is_frozen_and_white() {
        let raster = half_red(8);
        let tables = IntegralTables::build(&raster);
        let colorizer =
            BlockColorizer::new(&tables, Dimensions::new(8, 8), ColorSettings::default());
        let mut b = block(1, BlockGeometry::new(4.0, 0.0, 4.0, 8.0));
        colorizer.assign(&mut b);
        assert!(b.skip_refine);
        assert_eq!(b.color, Some(Rgb::WHITE));
    }

    #[test]
    fn test_display_space_is_mapped_to_tables() {
        // Tables at 8x8, display at 16x16: the left display half is the red half.
        let raster = half_red(8);
        let tables = IntegralTables::build(&raster);
        let colorizer =
            BlockColorizer::new(&tables, Dimensions::new(16, 16), ColorSettings::default());
        let left = BlockGeometry::new(0.0, 0.0, 8.0, 16.0);
        assert_eq!(colorizer.table_rect(&left), PixelRect::new(0, 0, 3, 7));
        assert_eq!(colorizer.coverage(&left), 1.0);
        assert_eq!(colorizer.average(&left), Rgb::new(220, 20, 20));
    }

    #[test]
    fn test_shallow_blocks_use_dominant_extractor() {
        let raster = half_red(8);
        let tables = IntegralTables::build(&raster);
        let colorizer =
            BlockColorizer::new(&tables, Dimensions::new(8, 8), ColorSettings::default())
                .with_raster(&raster);
        let geometry = BlockGeometry::new(0.0, 0.0, 4.0, 8.0);

        let mut shallow = block(1, geometry);
        colorizer.assign(&mut shallow);
        let boosted = crate::color::boost_saturation(Rgb::new(220, 20, 20), 1.15);
        assert_eq!(shallow.color, Some(boosted));

        let mut deep = block(4, geometry);
        colorizer.assign(&mut deep);
        assert_eq!(deep.color, Some(Rgb::new(220, 20, 20)));
    }

    #[test]
    fn test_disabled_advanced_uses_average() {
        let raster = half_red(8);
        let tables = IntegralTables::build(&raster);
        let settings = ColorSettings {
            advanced: AdvancedExtraction {
                enabled: false,
                max_level: 3,
            },
            ..ColorSettings::default()
        };
        let colorizer =
            BlockColorizer::new(&tables, Dimensions::new(8, 8), settings).with_raster(&raster);
        let mut b = block(1, BlockGeometry::new(0.0, 0.0, 4.0, 8.0));
        colorizer.assign(&mut b);
        assert_eq!(b.color, Some(Rgb::new(220, 20, 20)));
    }

    #[test]
    fn test_extraction_fault_uses_integral_average() {
        let raster = RasterImage::from_fn(9, 9, |_, _| [220, 20, 20, 255]).unwrap();
        let tables = IntegralTables::build(&raster);
        for boost in [f64::NAN, f64::INFINITY] {
            let settings = ColorSettings {
                extractor: DominantColorExtractor::new(1, boost),
                ..ColorSettings::default()
            };
            let colorizer =
                BlockColorizer::new(&tables, Dimensions::new(9, 9), settings).with_raster(&raster);
            let geometry = BlockGeometry::new(0.0, 0.0, 9.0, 9.0);
            let mut b = block(1, geometry);
            colorizer.assign(&mut b);
            assert_eq!(b.color, Some(colorizer.average(&geometry)));
            assert_eq!(b.color, Some(Rgb::new(220, 20, 20)));
            assert!(!b.skip_refine);
        }
    }

    #[test]
    fn test_no_opaque_samples_uses_fallback_gray() {
        let raster = half_red(8);
        let tables = IntegralTables::build(&raster);
        let colorizer =
            BlockColorizer::new(&tables, Dimensions::new(8, 8), ColorSettings::default())
                .with_raster(&raster);
        let mut b = block(2, BlockGeometry::new(4.0, 0.0, 4.0, 8.0));
        colorizer.assign(&mut b);
        assert_eq!(b.color, Some(Rgb::gray(200)));
        assert!(b.skip_refine);
    }

    #[test]
    fn test_color_batch_matches_assign() {
        let raster = half_red(8);
        let tables = IntegralTables::build(&raster);
        let colorizer =
            BlockColorizer::new(&tables, Dimensions::new(8, 8), ColorSettings::default());
        let grid = BlockGrid::init(Dimensions::new(8, 8), GridSize::EASY, Some(&colorizer));
        let geometries: Vec<_> = grid.iter().map(Block::geometry).collect();

        let results = colorizer.color_batch(&geometries);
        assert_eq!(results.len(), 4);
        for (result, block) in results.iter().zip(grid.iter()) {
            assert_eq!(Some(result.color), block.color);
            assert_eq!(result.skip_refine, block.skip_refine);
        }
        assert_eq!(
            results.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }
}
