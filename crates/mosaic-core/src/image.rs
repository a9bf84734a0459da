//! Owned RGBA raster buffers and processing-resolution resampling.

use ::image::imageops::FilterType;
use ::image::{ImageBuffer, Rgba};
use thiserror::Error;

/// Number of interleaved channels per pixel (R, G, B, A).
pub const CHANNELS: usize = 4;

/// Width/height pair used for both processing and display sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dimensions {
    /// Horizontal extent.
    pub width: u32,
    /// Vertical extent.
    pub height: u32,
}

impl Dimensions {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Length of the longest side.
    #[must_use]
    pub fn longest_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Validation failures when wrapping a caller-supplied buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RasterError {
    /// Either dimension is zero.
    #[error("raster must contain at least one pixel (got {width}x{height})")]
    Empty {
        /// Supplied width.
        width: u32,
        /// Supplied height.
        height: u32,
    },
    /// Buffer length does not match `width * height * 4`.
    #[error("buffer of {actual} bytes does not fit a {width}x{height} RGBA image ({expected})")]
    BufferSize {
        /// Supplied width.
        width: u32,
        /// Supplied height.
        height: u32,
        /// Required byte length.
        expected: usize,
        /// Supplied byte length.
        actual: usize,
    },
}

/// An immutable, row-major RGBA8 raster.
///
/// The buffer is validated once at construction; every accessor afterwards can
/// rely on `data.len() == width * height * 4`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RasterImage {
    /// Wrap a decoded RGBA buffer after validating its size.
    ///
    /// # Errors
    /// Returns [`RasterError`] when the raster is empty or the buffer length is wrong.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::Empty { width, height });
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(RasterError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Build a raster by evaluating `f(x, y)` for every pixel.
    ///
    /// # Errors
    /// Returns [`RasterError::Empty`] when either dimension is zero.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> [u8; 4],
    ) -> Result<Self, RasterError> {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self::new(width, height, data)
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of the raster.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Raw interleaved RGBA bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Interleaved RGBA bytes of row `y`.
    #[inline]
    #[must_use]
    pub fn row(&self, y: u32) -> &[u8] {
        assert!(y < self.height, "Row index {y} out of bounds");
        let stride = self.width as usize * CHANNELS;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// The `[r, g, b, a]` value at `(x, y)`.
    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        assert!(x < self.width, "Column index {x} out of bounds");
        let row = self.row(y);
        let i = x as usize * CHANNELS;
        [row[i], row[i + 1], row[i + 2], row[i + 3]]
    }

    /// Downscale so the longest side is at most `max_side`, keeping the aspect ratio.
    ///
    /// Rasters already within the limit are returned unchanged (cloned).
    #[must_use]
    pub fn resize_to_max_side(&self, max_side: u32) -> RasterImage {
        let longest = self.width.max(self.height);
        if max_side == 0 || longest <= max_side {
            return self.clone();
        }
        let scale = f64::from(max_side) / f64::from(longest);
        #[allow(clippy::cast_sign_loss)]
        let (next_w, next_h) = (
            ((f64::from(self.width) * scale).floor() as u32).max(1),
            ((f64::from(self.height) * scale).floor() as u32).max(1),
        );
        self.resize(next_w, next_h)
    }

    /// Resample to exactly `width x height` with a triangle (bilinear) filter.
    #[must_use]
    pub fn resize(&self, width: u32, height: u32) -> RasterImage {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.width && height == self.height {
            return self.clone();
        }
        let Some(buffer) =
            ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(self.width, self.height, self.data.as_slice())
        else {
            return self.clone();
        };
        let resized = ::image::imageops::resize(&buffer, width, height, FilterType::Triangle);
        RasterImage {
            width,
            height,
            data: resized.into_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raster_accessors() {
        let data = vec![
            1, 2, 3, 255, 4, 5, 6, 255, // row 0
            7, 8, 9, 0, 10, 11, 12, 128, // row 1
        ];
        let raster = RasterImage::new(2, 2, data).unwrap();
        assert_eq!(raster.row(1), &[7, 8, 9, 0, 10, 11, 12, 128]);
        assert_eq!(raster.pixel(1, 1), [10, 11, 12, 128]);
        assert_eq!(raster.pixel(0, 0), [1, 2, 3, 255]);
    }

    #[test]
    fn test_invalid_buffer_size() {
        let result = RasterImage::new(2, 2, vec![0; 15]);
        assert_eq!(
            result,
            Err(RasterError::BufferSize {
                width: 2,
                height: 2,
                expected: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn test_empty_raster_rejected() {
        assert!(matches!(
            RasterImage::new(0, 4, Vec::new()),
            Err(RasterError::Empty { .. })
        ));
    }

    #[test]
    fn test_resize_keeps_aspect_and_limit() {
        let raster = RasterImage::from_fn(1000, 500, |_, _| [90, 60, 30, 255]).unwrap();
        let small = raster.resize_to_max_side(400);
        assert_eq!(small.dimensions(), Dimensions::new(400, 200));
        // Uniform input stays (nearly) uniform after filtering.
        let [r, g, b, a] = small.pixel(123, 77);
        for (got, want) in [(r, 90u8), (g, 60), (b, 30), (a, 255)] {
            assert!(got.abs_diff(want) <= 1, "channel {got} drifted from {want}");
        }
    }

    #[test]
    fn test_resize_within_limit_is_identity() {
        let raster = RasterImage::from_fn(30, 20, |x, y| [x as u8, y as u8, 0, 255]).unwrap();
        assert_eq!(raster.resize_to_max_side(800), raster);
    }
}
