//! Saturation-weighted color extraction for coarse blocks.
//!
//! Unlike the integral average, this works on raw pixel samples: every sampled
//! opaque pixel is weighted by `1 + 2 * saturation`, so vivid pixels outweigh
//! flat backgrounds, and the result receives a mild saturation boost. It costs
//! O(area / stride²) per block, so it is only used for shallow refinement levels
//! where tiles are large and their color carries the most information.

use crate::color::{boost_saturation, saturation, Rgb};
use crate::image::RasterImage;
use crate::stats::PixelRect;
use crate::OPACITY_THRESHOLD;
use thiserror::Error;

/// Default sampling stride on both axes.
pub const DEFAULT_SAMPLING_STRIDE: u32 = 3;
/// Default post-hoc saturation boost.
pub const DEFAULT_SATURATION_BOOST: f64 = 1.15;

/// Why an extraction did not produce a color.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExtractionError {
    /// The rectangle is inverted or extends past the raster.
    #[error("region {rect:?} is outside the {width}x{height} raster")]
    InvalidRegion {
        /// Requested rectangle.
        rect: PixelRect,
        /// Raster width.
        width: u32,
        /// Raster height.
        height: u32,
    },
    /// None of the sampled pixels was opaque.
    #[error("no opaque samples in region")]
    NoOpaqueSamples,
    /// The extractor cannot map samples to a valid 8-bit color, e.g. a
    /// non-finite or non-positive saturation boost.
    #[error("extraction produced an invalid color value: {0}")]
    InvalidColor(String),
}

impl ExtractionError {
    /// Fixed gray used in place of an extracted color.
    ///
    /// Each failure class maps to a distinct gray so they can be told apart on screen.
    #[must_use]
    pub fn fallback_color(&self) -> Rgb {
        match self {
            ExtractionError::InvalidRegion { .. } => Rgb::gray(128),
            ExtractionError::NoOpaqueSamples => Rgb::gray(200),
            ExtractionError::InvalidColor(_) => Rgb::gray(150),
        }
    }

    /// True for faults, as opposed to "not enough data" conditions.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, ExtractionError::InvalidColor(_))
    }
}

/// Sampling-based dominant color estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DominantColorExtractor {
    /// Sample every `sampling_stride`-th pixel on each axis (minimum 1).
    pub sampling_stride: u32,
    /// Factor applied around the mid-range of the averaged color.
    pub saturation_boost: f64,
}

impl Default for DominantColorExtractor {
    fn default() -> Self {
        Self {
            sampling_stride: DEFAULT_SAMPLING_STRIDE,
            saturation_boost: DEFAULT_SATURATION_BOOST,
        }
    }
}

impl DominantColorExtractor {
    /// Create an extractor with explicit parameters.
    #[must_use]
    pub fn new(sampling_stride: u32, saturation_boost: f64) -> Self {
        Self {
            sampling_stride,
            saturation_boost,
        }
    }

    /// Estimate the dominant color of the inclusive rectangle `rect` of `raster`.
    ///
    /// # Errors
    /// See [`ExtractionError`]; callers usually fall back to
    /// [`ExtractionError::fallback_color`] or to the integral average.
    pub fn extract(&self, raster: &RasterImage, rect: PixelRect) -> Result<Rgb, ExtractionError> {
        let (w, h) = (i64::from(raster.width()), i64::from(raster.height()));
        if rect.x1 < 0
            || rect.y1 < 0
            || rect.x2 >= w
            || rect.y2 >= h
            || rect.x1 > rect.x2
            || rect.y1 > rect.y2
        {
            return Err(ExtractionError::InvalidRegion {
                rect,
                width: raster.width(),
                height: raster.height(),
            });
        }
        if !self.saturation_boost.is_finite() || self.saturation_boost <= 0.0 {
            return Err(ExtractionError::InvalidColor(format!(
                "saturation boost {}",
                self.saturation_boost
            )));
        }

        let stride = self.sampling_stride.max(1) as usize;
        let (mut total_r, mut total_g, mut total_b) = (0.0f64, 0.0f64, 0.0f64);
        let mut weight_sum = 0.0f64;
        let mut samples = 0usize;

        #[allow(clippy::cast_sign_loss)]
        let (x1, y1, x2, y2) = (rect.x1 as u32, rect.y1 as u32, rect.x2 as u32, rect.y2 as u32);
        for y in (y1..=y2).step_by(stride) {
            let row = raster.row(y);
            for x in (x1..=x2).step_by(stride) {
                let i = x as usize * 4;
                let (r, g, b, a) = (row[i], row[i + 1], row[i + 2], row[i + 3]);
                if a <= OPACITY_THRESHOLD {
                    continue;
                }
                let weight = 1.0 + saturation(r, g, b) * 2.0;
                total_r += f64::from(r) * weight;
                total_g += f64::from(g) * weight;
                total_b += f64::from(b) * weight;
                weight_sum += weight;
                samples += 1;
            }
        }

        if samples == 0 || weight_sum == 0.0 {
            return Err(ExtractionError::NoOpaqueSamples);
        }

        // Weighted means of u8 channels stay within 0..=255.
        #[allow(clippy::cast_sign_loss)]
        let [r, g, b] = [total_r, total_g, total_b].map(|t| (t / weight_sum).round() as u8);
        let base = Rgb::new(r, g, b);
        Ok(boost_saturation(base, self.saturation_boost))
    }

    /// Like [`extract`](Self::extract) but always yields a color, logging the fallback.
    #[must_use]
    pub fn extract_or_fallback(&self, raster: &RasterImage, rect: PixelRect) -> Rgb {
        match self.extract(raster, rect) {
            Ok(color) => color,
            Err(err) => {
                tracing::warn!(error = %err, "dominant color extraction fell back to gray");
                err.fallback_color()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_uniform_gray_region() {
        let raster = RasterImage::from_fn(9, 9, |_, _| [90, 90, 90, 255]).unwrap();
        let color = DominantColorExtractor::default()
            .extract(&raster, PixelRect::new(0, 0, 8, 8))
            .unwrap();
        assert_eq!(color, Rgb::gray(90));
    }

    #[test]
    fn test_saturated_pixels_dominate() {
        // Checkerboard of vivid red and mid gray, sampled at every pixel.
        let raster = RasterImage::from_fn(8, 8, |x, y| {
            if (x + y) % 2 == 0 {
                [255, 0, 0, 255]
            } else {
                [128, 128, 128, 255]
            }
        })
        .unwrap();
        let extractor = DominantColorExtractor::new(1, 1.0);
        let color = extractor.extract(&raster, PixelRect::new(0, 0, 7, 7)).unwrap();
        // Red weight 3, gray weight 1: r = (255*3 + 128)/4 = 223.25
        assert_eq!(color, Rgb::new(223, 32, 32));
    }

    #[test]
    fn test_semi_transparent_pixels_ignored() {
        let raster = RasterImage::from_fn(3, 3, |_, _| [10, 200, 10, 128]).unwrap();
        let result =
            DominantColorExtractor::new(1, 1.15).extract(&raster, PixelRect::new(0, 0, 2, 2));
        assert_eq!(result, Err(ExtractionError::NoOpaqueSamples));
        assert_eq!(result.unwrap_err().fallback_color(), Rgb::gray(200));
    }

    #[test]
    fn test_out_of_bounds_region_rejected() {
        let raster = RasterImage::from_fn(4, 4, |_, _| [1, 2, 3, 255]).unwrap();
        let extractor = DominantColorExtractor::default();
        let err = extractor
            .extract(&raster, PixelRect::new(0, 0, 4, 3))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidRegion { .. }));
        assert!(!err.is_fault());
        assert_eq!(
            extractor.extract_or_fallback(&raster, PixelRect::new(2, 2, 1, 1)),
            Rgb::gray(128)
        );
    }

    #[test]
    fn test_unusable_boost_is_a_fault() {
        let raster = RasterImage::from_fn(9, 9, |_, _| [220, 20, 20, 255]).unwrap();
        let rect = PixelRect::new(0, 0, 8, 8);
        for boost in [f64::NAN, f64::INFINITY, 0.0, -1.0] {
            let err = DominantColorExtractor::new(1, boost)
                .extract(&raster, rect)
                .unwrap_err();
            assert!(matches!(err, ExtractionError::InvalidColor(_)), "{boost}");
            assert!(err.is_fault());
            assert_eq!(err.fallback_color(), Rgb::gray(150));
        }
        assert!(!ExtractionError::NoOpaqueSamples.is_fault());
    }

    #[test]
    fn test_stride_samples_grid_origin() {
        // Only (0,0), (3,0), (0,3), (3,3) are sampled with stride 3 on a 4x4 raster.
        let raster = RasterImage::from_fn(4, 4, |x, y| {
            if x % 3 == 0 && y % 3 == 0 {
                [40, 40, 40, 255]
            } else {
                [0, 0, 0, 0]
            }
        })
        .unwrap();
        let color = DominantColorExtractor::default()
            .extract(&raster, PixelRect::new(0, 0, 3, 3))
            .unwrap();
        assert_eq!(color, Rgb::gray(40));
    }

    proptest! {
        #[test]
        fn prop_extraction_never_faults_on_valid_rasters(
            pixels in prop::collection::vec(any::<[u8; 4]>(), 100),
            stride in 1..5u32,
            boost in 0.5..2.0f64,
        ) {
            let raster =
                RasterImage::from_fn(10, 10, |x, y| pixels[(y * 10 + x) as usize]).unwrap();
            let result = DominantColorExtractor::new(stride, boost)
                .extract(&raster, PixelRect::new(0, 0, 9, 9));
            if let Err(err) = result {
                prop_assert_eq!(err, ExtractionError::NoOpaqueSamples);
            }
        }
    }
}
