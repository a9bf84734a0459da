//! Core logic of the progressive mosaic reveal.
//!
//! A hidden image is shown as a grid of solid-color tiles that are split into
//! finer tiles over successive reveal steps. Each tile takes the average (or
//! saturation-weighted dominant) color of the image region it covers.
//!
//! # Architecture Overview
//!
//! 1. **Loading** ([`loader`]):
//!    - Art selection per subject and session, cached.
//!    - Device-tiered shrink to a processing resolution.
//!    - Integral table construction on the [`task::TaskRunner`].
//!
//! 2. **Region statistics** ([`integral`], [`stats`], [`dominant`]):
//!    - Four summed-area tables (R, G, B, opaque count) give O(1) rectangle sums.
//!    - Coverage and average color per rectangle, white below a minimum opacity.
//!    - Saturation-weighted sampling for coarse tiles.
//!
//! 3. **Block grid** ([`grid`], [`colorize`]):
//!    - Arena of blocks with stable ids and a lineage index per top-level region.
//!    - Coverage-based freezing of transparent regions.
//!
//! 4. **Refinement** ([`refine`]):
//!    - Least-refined regions first, random among equals.
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use mosaic_core::{MosaicConfig, MosaicSession};
//! # use mosaic_core::loader::ProcessedImage;
//! # use mosaic_core::image::{Dimensions, RasterImage};
//! # use mosaic_core::integral::IntegralTables;
//! let raster = RasterImage::from_fn(64, 64, |x, y| [x as u8 * 4, y as u8 * 4, 90, 255]).unwrap();
//! let image = Arc::new(ProcessedImage {
//!     asset: "demo_1.png".into(),
//!     processing: raster.dimensions(),
//!     display: Dimensions::new(128, 128),
//!     tables: Arc::new(IntegralTables::build(&raster)),
//!     raster: Arc::new(raster),
//! });
//!
//! let mut session = MosaicSession::with_seed(image, MosaicConfig::default(), 7);
//! assert_eq!(session.blocks().len(), 16);
//! session.reveal();
//! assert_eq!(session.blocks().len(), 22);
//! ```

/// Bounded FIFO caches for processed images and art selections.
pub mod cache;
/// Fill colors and saturation helpers.
pub mod color;
/// Per-block color and skip-refine assignment.
pub mod colorize;
/// Configuration types, presets and device tiers.
pub mod config;
/// Saturation-weighted dominant color extraction.
pub mod dominant;
/// Block arena and lineage index.
pub mod grid;
/// RGBA raster buffers.
pub mod image;
/// Summed-area tables.
pub mod integral;
/// Subject to processed image pipeline.
pub mod loader;
/// Refinement scheduling.
pub mod refine;
/// Coverage and average color over integral tables.
pub mod stats;
/// Off-thread task runner.
pub mod task;
/// Utilities for testing and synthetic data generation.
pub mod test_utils;

pub use crate::color::Rgb;
pub use crate::config::{DeviceProfile, LoadRequest, MosaicConfig, RenderPreset};
pub use crate::grid::{Block, BlockGrid, GridSize, RegionKey};
pub use crate::image::{Dimensions, RasterImage};
pub use crate::integral::IntegralTables;
pub use crate::loader::{ArtSource, LoadError, ProcessedImage, PuzzleImageService, SubjectRecord};
pub use crate::task::{Priority, TaskRunner};

use crate::grid::RegionCounters;
use bumpalo::Bump;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Alpha above which a pixel counts as opaque.
///
/// Shared by the integral builder and the dominant extractor so coverage and
/// sampling agree on which pixels carry color.
pub const OPACITY_THRESHOLD: u8 = 128;

/// One puzzle's reveal state over a processed image.
///
/// The session owns the block grid, the per-region refinement counters, its
/// random source and a scratch arena reused across reveal steps.
pub struct MosaicSession {
    config: MosaicConfig,
    image: Arc<ProcessedImage>,
    grid: BlockGrid,
    counters: RegionCounters,
    rng: StdRng,
    arena: Bump,
}

impl MosaicSession {
    /// Start a session with a randomly seeded refinement order.
    #[must_use]
    pub fn new(image: Arc<ProcessedImage>, config: MosaicConfig) -> Self {
        Self::with_rng(image, config, StdRng::from_entropy())
    }

    /// Start a session whose refinement order is fixed by `seed`.
    #[must_use]
    pub fn with_seed(image: Arc<ProcessedImage>, config: MosaicConfig, seed: u64) -> Self {
        Self::with_rng(image, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(image: Arc<ProcessedImage>, config: MosaicConfig, rng: StdRng) -> Self {
        let grid = Self::initial_grid(&image, &config);
        Self {
            config,
            image,
            grid,
            counters: RegionCounters::new(),
            rng,
            arena: Bump::new(),
        }
    }

    fn initial_grid(image: &ProcessedImage, config: &MosaicConfig) -> BlockGrid {
        let _span = tracing::info_span!("init_blocks", grid = ?config.initial_grid).entered();
        let colorizer = image.colorizer(config.color_settings());
        BlockGrid::init(image.display, config.initial_grid, Some(&colorizer))
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    /// The image being revealed.
    #[must_use]
    pub fn image(&self) -> &Arc<ProcessedImage> {
        &self.image
    }

    /// The live block grid.
    #[must_use]
    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    /// Refinement generations per region.
    #[must_use]
    pub fn counters(&self) -> &RegionCounters {
        &self.counters
    }

    /// Snapshot of the live blocks for drawing.
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.grid.blocks()
    }

    /// Refine the configured number of regions.
    pub fn reveal(&mut self) -> Vec<RegionKey> {
        self.reveal_n(self.config.refinement_count)
    }

    /// Refine `count` regions, least-refined first.
    pub fn reveal_n(&mut self, count: usize) -> Vec<RegionKey> {
        self.arena.reset();
        let colorizer = self.image.colorizer(self.config.color_settings());
        refine::refine_random(
            &mut self.grid,
            &mut self.counters,
            count,
            self.config.refinement_factor,
            Some(&colorizer),
            &mut self.rng,
            &self.arena,
        )
    }

    /// Refine one specific region and count the generation.
    ///
    /// A region outside the grid is ignored.
    pub fn refine_region(&mut self, region: RegionKey) {
        if !self.grid.regions().contains(&region) {
            return;
        }
        let colorizer = self.image.colorizer(self.config.color_settings());
        refine::refine_area(
            &mut self.grid,
            region,
            self.config.refinement_factor,
            Some(&colorizer),
        );
        self.counters.increment(region);
    }

    /// Back to the initial grid with all counters at zero.
    pub fn reset(&mut self) {
        self.grid = Self::initial_grid(&self.image, &self.config);
        self.counters.clear();
        self.arena.reset();
    }
}
