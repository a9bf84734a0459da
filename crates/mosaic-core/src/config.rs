//! Configuration types for the mosaic pipeline.
//!
//! - [`MosaicConfig`]: coloring, caching and refinement settings, fixed for the
//!   lifetime of a service or session.
//! - [`RenderPreset`]: named bundles of coloring settings picked from a
//!   [`DeviceProfile`].
//! - [`LoadRequest`]: per-load layout bounds and device hints.

use crate::cache::{DEFAULT_ART_CACHE_SIZE, DEFAULT_INTEGRAL_CACHE_SIZE};
use crate::colorize::{
    AdvancedExtraction, ColorSettings, DEFAULT_MAX_ADVANCED_LEVEL, DEFAULT_MIN_COVERAGE,
};
use crate::dominant::{DominantColorExtractor, DEFAULT_SAMPLING_STRIDE, DEFAULT_SATURATION_BOOST};
use crate::grid::GridSize;
use crate::stats::DEFAULT_MIN_OPACITY_RATIO;

/// Split applied to a block on each refinement.
pub const DEFAULT_REFINEMENT_FACTOR: GridSize = GridSize::new(2, 2);
/// Regions refined per reveal step.
pub const DEFAULT_REFINEMENT_COUNT: usize = 2;

// ============================================================================
// MosaicConfig
// ============================================================================

/// Pipeline-level configuration.
///
/// # Example
/// ```
/// use mosaic_core::config::MosaicConfig;
///
/// let config = MosaicConfig::builder()
///     .sampling_stride(2)
///     .refinement_count(4)
///     .build();
/// assert_eq!(config.sampling_stride, 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MosaicConfig {
    // Dominant color extraction
    /// Sample every n-th pixel on each axis (default: 3).
    pub sampling_stride: u32,
    /// Saturation boost applied to dominant colors (default: 1.15).
    pub saturation_boost: f64,
    /// Use the dominant extractor for shallow blocks (default: true).
    pub enable_advanced_extraction: bool,
    /// Deepest level that uses the dominant extractor (default: 3).
    pub max_level_for_advanced: u32,

    // Region statistics
    /// Opaque fraction below which the average color is white (default: 0.15).
    pub min_opacity_ratio: f64,
    /// Coverage below which a lineage stops refining (default: 0.01).
    pub min_coverage: f64,

    // Caches
    /// Processed images kept per service (default: 15).
    pub integral_cache_size: usize,
    /// Art selections kept per service (default: 20).
    pub art_cache_size: usize,

    // Refinement
    /// Starting grid (default: 4x4).
    pub initial_grid: GridSize,
    /// Split per refinement (default: 2x2).
    pub refinement_factor: GridSize,
    /// Regions refined per reveal step (default: 2).
    pub refinement_count: usize,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            sampling_stride: DEFAULT_SAMPLING_STRIDE,
            saturation_boost: DEFAULT_SATURATION_BOOST,
            enable_advanced_extraction: true,
            max_level_for_advanced: DEFAULT_MAX_ADVANCED_LEVEL,
            min_opacity_ratio: DEFAULT_MIN_OPACITY_RATIO,
            min_coverage: DEFAULT_MIN_COVERAGE,
            integral_cache_size: DEFAULT_INTEGRAL_CACHE_SIZE,
            art_cache_size: DEFAULT_ART_CACHE_SIZE,
            initial_grid: GridSize::DEFAULT,
            refinement_factor: DEFAULT_REFINEMENT_FACTOR,
            refinement_count: DEFAULT_REFINEMENT_COUNT,
        }
    }
}

impl MosaicConfig {
    /// Create a new builder for `MosaicConfig`.
    #[must_use]
    pub fn builder() -> MosaicConfigBuilder {
        MosaicConfigBuilder::default()
    }

    /// Coloring parameters derived from this configuration.
    #[must_use]
    pub fn color_settings(&self) -> ColorSettings {
        ColorSettings {
            min_coverage: self.min_coverage,
            min_opacity_ratio: self.min_opacity_ratio,
            advanced: AdvancedExtraction {
                enabled: self.enable_advanced_extraction,
                max_level: self.max_level_for_advanced,
            },
            extractor: DominantColorExtractor::new(self.sampling_stride, self.saturation_boost),
        }
    }

    /// This configuration with `preset`'s coloring settings applied.
    #[must_use]
    pub fn with_preset(self, preset: RenderPreset) -> Self {
        match preset {
            RenderPreset::HighQuality => Self {
                sampling_stride: 2,
                saturation_boost: 1.2,
                ..self
            },
            RenderPreset::Balanced => Self {
                sampling_stride: DEFAULT_SAMPLING_STRIDE,
                saturation_boost: DEFAULT_SATURATION_BOOST,
                enable_advanced_extraction: true,
                ..self
            },
            RenderPreset::PerformanceMode => Self {
                sampling_stride: 4,
                saturation_boost: 1.0,
                enable_advanced_extraction: false,
                ..self
            },
        }
    }
}

/// Builder for [`MosaicConfig`].
#[derive(Default)]
pub struct MosaicConfigBuilder {
    sampling_stride: Option<u32>,
    saturation_boost: Option<f64>,
    enable_advanced_extraction: Option<bool>,
    max_level_for_advanced: Option<u32>,
    min_opacity_ratio: Option<f64>,
    min_coverage: Option<f64>,
    integral_cache_size: Option<usize>,
    art_cache_size: Option<usize>,
    initial_grid: Option<GridSize>,
    refinement_factor: Option<GridSize>,
    refinement_count: Option<usize>,
    preset: Option<RenderPreset>,
}

impl MosaicConfigBuilder {
    /// Start from a preset; explicit setters still win.
    #[must_use]
    pub fn preset(mut self, preset: RenderPreset) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Set the dominant extractor's sampling stride.
    #[must_use]
    pub fn sampling_stride(mut self, stride: u32) -> Self {
        self.sampling_stride = Some(stride);
        self
    }

    /// Set the dominant extractor's saturation boost.
    #[must_use]
    pub fn saturation_boost(mut self, boost: f64) -> Self {
        self.saturation_boost = Some(boost);
        self
    }

    /// Enable or disable the dominant extractor.
    #[must_use]
    pub fn enable_advanced_extraction(mut self, enable: bool) -> Self {
        self.enable_advanced_extraction = Some(enable);
        self
    }

    /// Set the deepest level that uses the dominant extractor.
    #[must_use]
    pub fn max_level_for_advanced(mut self, level: u32) -> Self {
        self.max_level_for_advanced = Some(level);
        self
    }

    /// Set the opaque fraction below which averages are white.
    #[must_use]
    pub fn min_opacity_ratio(mut self, ratio: f64) -> Self {
        self.min_opacity_ratio = Some(ratio);
        self
    }

    /// Set the coverage below which lineages freeze.
    #[must_use]
    pub fn min_coverage(mut self, coverage: f64) -> Self {
        self.min_coverage = Some(coverage);
        self
    }

    /// Set the integral cache capacity.
    #[must_use]
    pub fn integral_cache_size(mut self, size: usize) -> Self {
        self.integral_cache_size = Some(size);
        self
    }

    /// Set the art selection cache capacity.
    #[must_use]
    pub fn art_cache_size(mut self, size: usize) -> Self {
        self.art_cache_size = Some(size);
        self
    }

    /// Set the starting grid.
    #[must_use]
    pub fn initial_grid(mut self, grid: GridSize) -> Self {
        self.initial_grid = Some(grid);
        self
    }

    /// Set the per-refinement split.
    #[must_use]
    pub fn refinement_factor(mut self, factor: GridSize) -> Self {
        self.refinement_factor = Some(factor);
        self
    }

    /// Set how many regions each reveal step refines.
    #[must_use]
    pub fn refinement_count(mut self, count: usize) -> Self {
        self.refinement_count = Some(count);
        self
    }

    /// Build the configuration, using defaults (or the preset) for unset fields.
    #[must_use]
    pub fn build(self) -> MosaicConfig {
        let d = match self.preset {
            Some(preset) => MosaicConfig::default().with_preset(preset),
            None => MosaicConfig::default(),
        };
        MosaicConfig {
            sampling_stride: self.sampling_stride.unwrap_or(d.sampling_stride),
            saturation_boost: self.saturation_boost.unwrap_or(d.saturation_boost),
            enable_advanced_extraction: self
                .enable_advanced_extraction
                .unwrap_or(d.enable_advanced_extraction),
            max_level_for_advanced: self
                .max_level_for_advanced
                .unwrap_or(d.max_level_for_advanced),
            min_opacity_ratio: self.min_opacity_ratio.unwrap_or(d.min_opacity_ratio),
            min_coverage: self.min_coverage.unwrap_or(d.min_coverage),
            integral_cache_size: self.integral_cache_size.unwrap_or(d.integral_cache_size),
            art_cache_size: self.art_cache_size.unwrap_or(d.art_cache_size),
            initial_grid: self.initial_grid.unwrap_or(d.initial_grid),
            refinement_factor: self.refinement_factor.unwrap_or(d.refinement_factor),
            refinement_count: self.refinement_count.unwrap_or(d.refinement_count),
        }
    }
}

// ============================================================================
// Presets and device hints
// ============================================================================

/// Named coloring presets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderPreset {
    /// Denser sampling and a stronger boost.
    HighQuality,
    /// The defaults.
    #[default]
    Balanced,
    /// Integral averages only, sparse sampling, no boost.
    PerformanceMode,
}

impl RenderPreset {
    /// Pick a preset from a weighted device score.
    ///
    /// `score = memory * 0.4 + cores * 0.4 + pixel_ratio * 0.2`; at least 6 is
    /// high quality, at most 3 is performance mode.
    #[must_use]
    pub fn optimal(device: &DeviceProfile) -> Self {
        let score = device.score();
        if score >= 6.0 {
            RenderPreset::HighQuality
        } else if score <= 3.0 {
            RenderPreset::PerformanceMode
        } else {
            RenderPreset::Balanced
        }
    }
}

/// Coarse capability class, used to cap the processing resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PerformanceTier {
    /// Under 4 GB or under 4 cores.
    Low,
    /// At least 4 GB and 4 cores.
    Medium,
    /// At least 8 GB and 8 cores.
    High,
}

impl PerformanceTier {
    /// Longest side of the processing raster.
    #[must_use]
    pub fn max_processing_side(self) -> u32 {
        match self {
            PerformanceTier::Low => 400,
            PerformanceTier::Medium => 800,
            PerformanceTier::High => 1200,
        }
    }
}

/// Approximate device capabilities supplied by the host.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceProfile {
    /// Memory in gigabytes.
    pub memory_gb: f64,
    /// Logical cores.
    pub cores: u32,
    /// Display pixel ratio.
    pub pixel_ratio: f64,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            memory_gb: 4.0,
            cores: 2,
            pixel_ratio: 1.0,
        }
    }
}

impl DeviceProfile {
    /// Profile of the current host; memory and pixel ratio keep their defaults.
    #[must_use]
    pub fn from_host() -> Self {
        let cores = std::thread::available_parallelism()
            .map_or(2, |n| u32::try_from(n.get()).unwrap_or(u32::MAX));
        Self {
            cores,
            ..Self::default()
        }
    }

    /// Weighted capability score used by [`RenderPreset::optimal`].
    #[must_use]
    pub fn score(&self) -> f64 {
        self.memory_gb * 0.4 + f64::from(self.cores) * 0.4 + self.pixel_ratio * 0.2
    }

    /// Capability tier.
    #[must_use]
    pub fn tier(&self) -> PerformanceTier {
        if self.memory_gb >= 8.0 && self.cores >= 8 {
            PerformanceTier::High
        } else if self.memory_gb >= 4.0 && self.cores >= 4 {
            PerformanceTier::Medium
        } else {
            PerformanceTier::Low
        }
    }
}

/// Layout bounds and device hints for one image load.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoadRequest {
    /// Maximum display width (default: 600).
    pub max_width: u32,
    /// Maximum display height (default: 600).
    pub max_height: u32,
    /// Viewport width used to size the container (default: 800).
    pub viewport_width: u32,
    /// Host capabilities.
    pub device: DeviceProfile,
}

impl Default for LoadRequest {
    fn default() -> Self {
        Self {
            max_width: 600,
            max_height: 600,
            viewport_width: 800,
            device: DeviceProfile::default(),
        }
    }
}
