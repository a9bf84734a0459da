//! Region statistics over integral tables: coverage and average color.
//!
//! Blocks live in display space while tables live in processing space. The
//! helpers here map one onto the other with the same floor-based convention
//! everywhere, so coverage and color always describe the same pixels.

use crate::color::Rgb;
use crate::grid::BlockGeometry;
use crate::image::Dimensions;
use crate::integral::IntegralTables;

/// Default minimum opaque fraction below which the average color is replaced by white.
pub const DEFAULT_MIN_OPACITY_RATIO: f64 = 0.15;

/// Inclusive pixel rectangle in table space.
///
/// Signed so that inverted or out-of-range rectangles can be represented and
/// then clamped rather than rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    /// Left column.
    pub x1: i64,
    /// Top row.
    pub y1: i64,
    /// Right column (inclusive).
    pub x2: i64,
    /// Bottom row (inclusive).
    pub y2: i64,
}

impl PixelRect {
    /// Create a rectangle from two inclusive corners.
    #[must_use]
    pub const fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// True when the corners are inverted or the rectangle lies before the origin.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.x1 > self.x2 || self.y1 > self.y2 || self.x2 < 0 || self.y2 < 0
    }
}

/// Fraction of the rectangle's pixels counted as opaque, in `[0, 1]`.
///
/// Inverted rectangles are reordered and clamped; a rectangle with no pixels
/// inside the tables has zero coverage.
#[must_use]
pub fn coverage(tables: &IntegralTables, rect: PixelRect) -> f64 {
    let sum = tables.region_sum(rect.x1, rect.y1, rect.x2, rect.y2);
    if sum.area == 0 {
        return 0.0;
    }
    sum.opaque as f64 / sum.area as f64
}

/// Average color of the opaque pixels inside `rect`.
///
/// Returns [`Rgb::WHITE`] when fewer than `min_opacity_ratio` of the pixels are
/// opaque, so nearly transparent regions do not render as noise.
#[must_use]
pub fn average_color(tables: &IntegralTables, rect: PixelRect, min_opacity_ratio: f64) -> Rgb {
    let sum = tables.region_sum(rect.x1, rect.y1, rect.x2, rect.y2);
    if sum.opaque == 0 || sum.area == 0 {
        return Rgb::WHITE;
    }
    if (sum.opaque as f64 / sum.area as f64) < min_opacity_ratio {
        return Rgb::WHITE;
    }
    let n = sum.opaque as f64;
    #[allow(clippy::cast_sign_loss)]
    let channel = |total: u64| (total as f64 / n).round().min(255.0) as u8;
    Rgb::new(channel(sum.r), channel(sum.g), channel(sum.b))
}

/// Map a display-space block onto the table rectangle it covers.
///
/// `x1 = floor(x * ratio)` and `x2 = floor((x + w) * ratio) - 1`, likewise for y.
#[must_use]
pub fn table_rect_for(
    tables: &IntegralTables,
    geometry: &BlockGeometry,
    display: Dimensions,
) -> PixelRect {
    let ratio_x = f64::from(tables.width()) / f64::from(display.width.max(1));
    let ratio_y = f64::from(tables.height()) / f64::from(display.height.max(1));
    #[allow(clippy::cast_possible_truncation)]
    let floor = |v: f64| v.floor() as i64;
    PixelRect {
        x1: floor(geometry.x * ratio_x),
        y1: floor(geometry.y * ratio_y),
        x2: floor((geometry.x + geometry.width) * ratio_x) - 1,
        y2: floor((geometry.y + geometry.height) * ratio_y) - 1,
    }
}

/// Coverage of a display-space block; zero when the mapped rectangle is degenerate.
#[must_use]
pub fn block_coverage(
    tables: &IntegralTables,
    geometry: &BlockGeometry,
    display: Dimensions,
) -> f64 {
    let rect = table_rect_for(tables, geometry, display);
    if rect.is_degenerate() {
        return 0.0;
    }
    coverage(tables, rect)
}
