//! Puzzle image loading: subject → art → processed image.
//!
//! [`PuzzleImageService`] picks (and remembers) an art asset for a subject,
//! fetches and decodes it through an [`ArtSource`], shrinks it to the device's
//! processing resolution and builds its integral tables on the task runner.
//! Processed images are cached per asset and layout bounds.

use crate::cache::{ArtSelectionCache, CacheStats, IntegralCache, IntegralKey};
use crate::colorize::{BlockColorizer, ColorSettings};
use crate::config::{LoadRequest, MosaicConfig};
use crate::image::{Dimensions, RasterError, RasterImage};
use crate::integral::IntegralTables;
use crate::task::{
    IntegralImageExecutor, Priority, RunnerStats, Task, TaskError, TaskRunner,
    INTEGRAL_IMAGE_CATEGORY,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use thiserror::Error;

/// Highest skin slot a subject can have.
pub const MAX_SKIN_SLOTS: u8 = 10;
/// Horizontal margin subtracted from the viewport when sizing the container.
pub const CONTAINER_MARGIN: u32 = 30;

/// The puzzle subject as seen by the loader.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubjectRecord {
    /// Name used in asset file names.
    pub id: String,
    /// Star rating; 3 and above unlocks the second base art.
    pub rarity: u8,
    /// Present skin slots, ascending, each in `1..=10`.
    pub skins: Vec<u8>,
}

impl SubjectRecord {
    /// Create a record; out-of-range or repeated skin slots are dropped.
    #[must_use]
    pub fn new(id: impl Into<String>, rarity: u8, skins: impl IntoIterator<Item = u8>) -> Self {
        let mut skins: Vec<u8> = skins
            .into_iter()
            .filter(|slot| (1..=MAX_SKIN_SLOTS).contains(slot))
            .collect();
        skins.sort_unstable();
        skins.dedup();
        Self {
            id: id.into(),
            rarity,
            skins,
        }
    }

    /// Candidate art file names, in a fixed order.
    #[must_use]
    pub fn available_arts(&self) -> Vec<String> {
        let mut arts = Vec::with_capacity(2 + self.skins.len());
        arts.push(format!("{}_1.png", self.id));
        if self.rarity >= 3 {
            arts.push(format!("{}_2.png", self.id));
        }
        arts.extend(self.skins.iter().map(|slot| format!("{}_skin{slot}.png", self.id)));
        arts
    }
}

/// Supplies decoded rasters for asset names.
pub trait ArtSource {
    /// Fetch and decode `asset`.
    ///
    /// # Errors
    /// [`LoadError::Fetch`] or [`LoadError::Raster`] when the asset cannot be produced.
    fn fetch(&self, asset: &str) -> Result<RasterImage, LoadError>;
}

/// Failures while loading a puzzle image.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The subject has no candidate art.
    #[error("subject `{0}` has no art")]
    NoArt(String),
    /// The art source could not produce the asset.
    #[error("failed to fetch `{asset}`: {reason}")]
    Fetch {
        /// Requested asset.
        asset: String,
        /// Source-specific description.
        reason: String,
    },
    /// The decoded buffer was malformed.
    #[error(transparent)]
    Raster(#[from] RasterError),
    /// The integral build did not complete.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// The integral category answered with something other than tables.
    #[error("integral task returned an unexpected output")]
    UnexpectedOutput,
}

/// Display size for an image inside the layout bounds.
///
/// The container is `min(viewport - 30, max_width)` wide. Images larger than
/// the container or taller than `max_height` are scaled down uniformly and
/// floored; smaller images keep their size.
#[must_use]
pub fn scaled_dimensions(
    image: Dimensions,
    max_width: u32,
    max_height: u32,
    viewport_width: u32,
) -> Dimensions {
    let container = viewport_width.saturating_sub(CONTAINER_MARGIN).min(max_width);
    if image.width <= container && image.height <= max_height {
        return image;
    }
    let scale = (f64::from(container) / f64::from(image.width.max(1)))
        .min(f64::from(max_height) / f64::from(image.height.max(1)));
    #[allow(clippy::cast_sign_loss)]
    let floor = |v: u32| ((f64::from(v) * scale).floor() as u32).max(1);
    Dimensions::new(floor(image.width), floor(image.height))
}

/// An image ready for mosaic rendering.
#[derive(Clone, Debug)]
pub struct ProcessedImage {
    /// Asset the image came from.
    pub asset: String,
    /// Size of the tables and raster.
    pub processing: Dimensions,
    /// Size blocks are laid out in.
    pub display: Dimensions,
    /// Integral tables at processing resolution.
    pub tables: Arc<IntegralTables>,
    /// Raster at processing resolution.
    pub raster: Arc<RasterImage>,
}

impl ProcessedImage {
    /// Colorizer over this image, with the raster attached for dominant extraction.
    #[must_use]
    pub fn colorizer(&self, settings: ColorSettings) -> BlockColorizer<'_> {
        BlockColorizer::new(&self.tables, self.display, settings).with_raster(&self.raster)
    }
}

/// Result of [`PuzzleImageService::load`].
#[derive(Clone, Debug)]
pub struct LoadedPuzzle {
    /// Subject the image was loaded for.
    pub subject: String,
    /// The processed image, shared with the cache.
    pub image: Arc<ProcessedImage>,
    /// Served from the integral cache.
    pub from_cache: bool,
}

/// Diagnostics of a [`PuzzleImageService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceStats {
    /// Integral cache counters.
    pub integral_cache: CacheStats,
    /// Art selection cache counters.
    pub art_cache: CacheStats,
    /// Task runner state.
    pub runner: RunnerStats,
}

/// Loads and caches processed puzzle images.
pub struct PuzzleImageService {
    config: MosaicConfig,
    runner: Arc<TaskRunner>,
    integral_cache: IntegralCache,
    art_cache: ArtSelectionCache,
    rng: StdRng,
}

impl PuzzleImageService {
    /// Create a service on `runner`.
    ///
    /// Registers an [`IntegralImageExecutor`] under [`INTEGRAL_IMAGE_CATEGORY`]
    /// unless the category already has an executor.
    #[must_use]
    pub fn new(config: MosaicConfig, runner: Arc<TaskRunner>) -> Self {
        Self::with_rng(config, runner, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a deterministic art selection.
    #[must_use]
    pub fn with_seed(config: MosaicConfig, runner: Arc<TaskRunner>, seed: u64) -> Self {
        Self::with_rng(config, runner, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: MosaicConfig, runner: Arc<TaskRunner>, rng: StdRng) -> Self {
        if !runner.has_category(INTEGRAL_IMAGE_CATEGORY) {
            runner.register(INTEGRAL_IMAGE_CATEGORY, Arc::new(IntegralImageExecutor));
        }
        Self {
            integral_cache: IntegralCache::new(config.integral_cache_size),
            art_cache: ArtSelectionCache::new(config.art_cache_size),
            config,
            runner,
            rng,
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    /// Runner the integral builds are submitted to.
    #[must_use]
    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    /// Load the puzzle image for `subject`.
    ///
    /// Within one `session` the same subject always maps to the same art, and
    /// an art already processed for the same layout bounds is served from cache.
    ///
    /// # Errors
    /// See [`LoadError`].
    pub fn load(
        &mut self,
        subject: &SubjectRecord,
        session: Option<&str>,
        source: &dyn ArtSource,
        request: &LoadRequest,
    ) -> Result<LoadedPuzzle, LoadError> {
        let _span = tracing::info_span!("load_puzzle_image", subject = %subject.id).entered();

        let asset = self
            .art_cache
            .select(subject, session, &mut self.rng)
            .ok_or_else(|| LoadError::NoArt(subject.id.clone()))?;
        let key = IntegralKey::new(asset.clone(), request.max_width, request.max_height);
        if let Some(image) = self.integral_cache.get(&key) {
            tracing::debug!(%asset, "integral cache hit");
            return Ok(LoadedPuzzle {
                subject: subject.id.clone(),
                image: Arc::clone(image),
                from_cache: true,
            });
        }

        let original = source.fetch(&asset)?;
        let display_size = scaled_dimensions(
            original.dimensions(),
            request.max_width,
            request.max_height,
            request.viewport_width,
        );
        let tier = request.device.tier();
        let raster = Arc::new(original.resize_to_max_side(tier.max_processing_side()));
        tracing::debug!(
            %asset,
            ?tier,
            processing = ?raster.dimensions(),
            ?display_size,
            "building integral tables"
        );

        let tables = self
            .runner
            .submit(
                INTEGRAL_IMAGE_CATEGORY,
                Task::BuildIntegral {
                    raster: Arc::clone(&raster),
                },
                Priority::High,
            )?
            .wait()?
            .into_integral()
            .ok_or(LoadError::UnexpectedOutput)?;

        let image = Arc::new(ProcessedImage {
            asset,
            processing: raster.dimensions(),
            display: display_size,
            tables,
            raster,
        });
        if let Some((evicted, _)) = self.integral_cache.insert(key, Arc::clone(&image)) {
            tracing::debug!(asset = %evicted.asset, "evicted processed image");
        }
        Ok(LoadedPuzzle {
            subject: subject.id.clone(),
            image,
            from_cache: false,
        })
    }

    /// Forget the art choices made in `session`.
    pub fn clear_session(&mut self, session: &str) -> usize {
        self.art_cache.clear_session(session)
    }

    /// Drop every cached selection and processed image.
    pub fn clear_all(&mut self) {
        self.art_cache.clear();
        self.integral_cache.clear();
    }

    /// Cache and runner diagnostics.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            integral_cache: self.integral_cache.stats(),
            art_cache: self.art_cache.stats(),
            runner: self.runner.stats(),
        }
    }
}
