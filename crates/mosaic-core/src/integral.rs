//! Summed-area tables over RGBA rasters.
//!
//! [`IntegralTables::build`] turns a raster into four inclusive prefix-sum tables
//! (red, green, blue and opaque-pixel count). Any axis-aligned rectangle sum is
//! then four lookups away, which is what makes per-block coloring cheap no
//! matter how large the block is.

use crate::image::{Dimensions, RasterImage, CHANNELS};
use crate::OPACITY_THRESHOLD;
use multiversion::multiversion;
use rayon::prelude::*;

/// Channel sums over a rectangle, plus the rectangle's pixel area.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionSum {
    /// Sum of red over opaque pixels.
    pub r: u64,
    /// Sum of green over opaque pixels.
    pub g: u64,
    /// Sum of blue over opaque pixels.
    pub b: u64,
    /// Number of opaque pixels.
    pub opaque: u64,
    /// Number of pixels in the (clamped) rectangle.
    pub area: u64,
}

/// Inclusive 2-D prefix sums of an RGBA raster.
///
/// Entry `(x, y)` of each table holds the sum over `[0, x] x [0, y]`. Tables are
/// immutable once built and typically shared behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegralTables {
    width: u32,
    height: u32,
    sum_r: Vec<u64>,
    sum_g: Vec<u64>,
    sum_b: Vec<u64>,
    opaque: Vec<u64>,
}

impl IntegralTables {
    /// Build the four prefix-sum tables for `raster`.
    ///
    /// A pixel contributes its color and an opaque count of one only when its
    /// alpha exceeds [`OPACITY_THRESHOLD`].
    #[must_use]
    pub fn build(raster: &RasterImage) -> Self {
        let _span = tracing::info_span!(
            "integral_build",
            width = raster.width(),
            height = raster.height()
        )
        .entered();

        let w = raster.width() as usize;
        let h = raster.height() as usize;
        let len = w * h;
        let mut sum_r = vec![0u64; len];
        let mut sum_g = vec![0u64; len];
        let mut sum_b = vec![0u64; len];
        let mut opaque = vec![0u64; len];

        // Pass 1: independent row-running sums (parallel over rows).
        sum_r
            .par_chunks_mut(w)
            .zip(sum_g.par_chunks_mut(w))
            .zip(sum_b.par_chunks_mut(w))
            .zip(opaque.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (((r, g), b), a))| {
                accumulate_row(raster.row(y as u32), r, g, b, a);
            });

        // Pass 2: fold each row into the one below it.
        for table in [&mut sum_r, &mut sum_g, &mut sum_b, &mut opaque] {
            for y in 1..h {
                let (above, rest) = table.split_at_mut(y * w);
                add_row_above(&above[(y - 1) * w..], &mut rest[..w]);
            }
        }

        Self {
            width: raster.width(),
            height: raster.height(),
            sum_r,
            sum_g,
            sum_b,
            opaque,
        }
    }

    /// Table width (processing resolution).
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Table height (processing resolution).
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of the tables.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Inclusive prefix sums at `(x, y)`; zero outside the tables.
    #[must_use]
    pub fn prefix(&self, x: i64, y: i64) -> RegionSum {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return RegionSum::default();
        }
        #[allow(clippy::cast_sign_loss)]
        let idx = y as usize * self.width as usize + x as usize;
        RegionSum {
            r: self.sum_r[idx],
            g: self.sum_g[idx],
            b: self.sum_b[idx],
            opaque: self.opaque[idx],
            area: 0,
        }
    }

    /// Sums over the inclusive rectangle `(x1, y1)-(x2, y2)`.
    ///
    /// Reversed corners are swapped and the rectangle is clamped to the tables.
    /// A rectangle lying entirely outside the tables sums to zero with zero area.
    #[must_use]
    pub fn region_sum(&self, x1: i64, y1: i64, x2: i64, y2: i64) -> RegionSum {
        let (x1, x2) = if x1 > x2 { (x2, x1) } else { (x1, x2) };
        let (y1, y2) = if y1 > y2 { (y2, y1) } else { (y1, y2) };
        let x1 = x1.max(0);
        let y1 = y1.max(0);
        let x2 = x2.min(i64::from(self.width) - 1);
        let y2 = y2.min(i64::from(self.height) - 1);
        if x1 > x2 || y1 > y2 {
            return RegionSum::default();
        }

        let total = self.prefix(x2, y2);
        let left = self.prefix(x1 - 1, y2);
        let up = self.prefix(x2, y1 - 1);
        let corner = self.prefix(x1 - 1, y1 - 1);
        let combine = |t: u64, l: u64, u: u64, c: u64| t + c - l - u;
        #[allow(clippy::cast_sign_loss)]
        let area = ((x2 - x1 + 1) * (y2 - y1 + 1)) as u64;

        RegionSum {
            r: combine(total.r, left.r, up.r, corner.r),
            g: combine(total.g, left.g, up.g, corner.g),
            b: combine(total.b, left.b, up.b, corner.b),
            opaque: combine(total.opaque, left.opaque, up.opaque, corner.opaque),
            area,
        }
    }
}

/// Row-local running sums for one raster row.
fn accumulate_row(rgba: &[u8], r: &mut [u64], g: &mut [u64], b: &mut [u64], a: &mut [u64]) {
    let (mut rs, mut gs, mut bs, mut n) = (0u64, 0u64, 0u64, 0u64);
    for (x, px) in rgba.chunks_exact(CHANNELS).enumerate() {
        if px[3] > OPACITY_THRESHOLD {
            rs += u64::from(px[0]);
            gs += u64::from(px[1]);
            bs += u64::from(px[2]);
            n += 1;
        }
        r[x] = rs;
        g[x] = gs;
        b[x] = bs;
        a[x] = n;
    }
}

/// SIMD-dispatched element-wise `row += above`.
#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn add_row_above(above: &[u64], row: &mut [u64]) {
    for (dst, &src) in row.iter_mut().zip(above) {
        *dst += src;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn brute_force(raster: &RasterImage, x1: u32, y1: u32, x2: u32, y2: u32) -> RegionSum {
        let mut sum = RegionSum::default();
        for y in y1..=y2 {
            for x in x1..=x2 {
                let [r, g, b, a] = raster.pixel(x, y);
                if a > OPACITY_THRESHOLD {
                    sum.r += u64::from(r);
                    sum.g += u64::from(g);
                    sum.b += u64::from(b);
                    sum.opaque += 1;
                }
                sum.area += 1;
            }
        }
        sum
    }

    #[test]
    fn test_uniform_prefix_values() {
        let raster = RasterImage::from_fn(4, 3, |_, _| [1, 2, 3, 255]).unwrap();
        let tables = IntegralTables::build(&raster);
        let corner = tables.prefix(3, 2);
        assert_eq!(corner.r, 12);
        assert_eq!(corner.g, 24);
        assert_eq!(corner.b, 36);
        assert_eq!(corner.opaque, 12);
        assert_eq!(tables.prefix(1, 1).opaque, 4);
    }

    #[test]
    fn test_transparent_pixels_do_not_accumulate() {
        let raster = RasterImage::from_fn(3, 3, |x, _| {
            if x == 1 {
                [200, 0, 0, 0]
            } else {
                [10, 10, 10, 255]
            }
        })
        .unwrap();
        let tables = IntegralTables::build(&raster);
        let sum = tables.region_sum(0, 0, 2, 2);
        assert_eq!(sum.opaque, 6);
        assert_eq!(sum.r, 60);
        assert_eq!(sum.area, 9);
    }

    #[test]
    fn test_region_sum_reorders_and_clamps() {
        let raster = RasterImage::from_fn(5, 5, |x, y| [(x + y) as u8, 0, 0, 255]).unwrap();
        let tables = IntegralTables::build(&raster);
        let forward = tables.region_sum(1, 1, 3, 3);
        let reversed = tables.region_sum(3, 3, 1, 1);
        assert_eq!(forward, reversed);

        let clamped = tables.region_sum(-10, -10, 100, 100);
        assert_eq!(clamped, brute_force(&raster, 0, 0, 4, 4));
    }

    #[test]
    fn test_region_outside_is_empty() {
        let raster = RasterImage::from_fn(2, 2, |_, _| [9, 9, 9, 255]).unwrap();
        let tables = IntegralTables::build(&raster);
        assert_eq!(tables.region_sum(5, 5, 8, 8), RegionSum::default());
        assert_eq!(tables.region_sum(-4, 0, -1, 1), RegionSum::default());
    }

    proptest! {
        #[test]
        fn prop_region_sum_matches_brute_force(
            width in 1..24u32,
            height in 1..24u32,
            seed in prop::collection::vec(any::<[u8; 4]>(), 24 * 24),
            corners in (0..24u32, 0..24u32, 0..24u32, 0..24u32),
        ) {
            let raster = RasterImage::from_fn(width, height, |x, y| {
                seed[(y * 24 + x) as usize]
            }).unwrap();
            let tables = IntegralTables::build(&raster);

            let (ax, ay, bx, by) = corners;
            let (x1, x2) = ((ax % width).min(bx % width), (ax % width).max(bx % width));
            let (y1, y2) = ((ay % height).min(by % height), (ay % height).max(by % height));

            let fast =
                tables.region_sum(i64::from(x1), i64::from(y1), i64::from(x2), i64::from(y2));
            prop_assert_eq!(fast, brute_force(&raster, x1, y1, x2, y2));
        }

        #[test]
        fn prop_tables_are_monotonic(
            width in 1..16u32,
            height in 1..16u32,
            seed in prop::collection::vec(any::<[u8; 4]>(), 16 * 16),
        ) {
            let raster =
                RasterImage::from_fn(width, height, |x, y| seed[(y * 16 + x) as usize]).unwrap();
            let tables = IntegralTables::build(&raster);
            for y in 0..i64::from(height) {
                for x in 0..i64::from(width) {
                    let here = tables.prefix(x, y);
                    let left = tables.prefix(x - 1, y);
                    let up = tables.prefix(x, y - 1);
                    prop_assert!(here.opaque >= left.opaque && here.opaque >= up.opaque);
                    prop_assert!(here.r >= left.r && here.r >= up.r);
                }
            }
        }
    }
}
