#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

mod scene;
mod source;

pub use scene::RasterBuilder;
pub use source::MemoryArtSource;

use crate::image::{Dimensions, RasterImage};
use crate::integral::IntegralTables;
use crate::loader::ProcessedImage;
use std::sync::Arc;

fn build(width: u32, height: u32, f: impl FnMut(u32, u32) -> [u8; 4]) -> RasterImage {
    RasterImage::from_fn(width.max(1), height.max(1), f)
        .unwrap_or_else(|e| panic!("synthetic raster {width}x{height}: {e}"))
}

/// A raster filled with one RGBA value.
pub fn uniform(width: u32, height: u32, rgba: [u8; 4]) -> RasterImage {
    build(width, height, |_, _| rgba)
}

/// Opaque raster with red increasing left to right and green top to bottom.
pub fn gradient(width: u32, height: u32) -> RasterImage {
    let sx = 255.0 / f64::from(width.saturating_sub(1).max(1));
    let sy = 255.0 / f64::from(height.saturating_sub(1).max(1));
    build(width, height, |x, y| {
        [
            (f64::from(x) * sx).round() as u8,
            (f64::from(y) * sy).round() as u8,
            96,
            255,
        ]
    })
}

/// Alternating `cell`-sized squares of `a` and `b`, starting with `a` at the origin.
pub fn checkerboard(width: u32, height: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> RasterImage {
    let cell = cell.max(1);
    build(width, height, |x, y| if (x / cell + y / cell) % 2 == 0 { a } else { b })
}

/// Opaque `rgb` inside a fully transparent border `border` pixels wide.
pub fn transparent_border(width: u32, height: u32, border: u32, rgb: [u8; 3]) -> RasterImage {
    build(width, height, |x, y| {
        let inside = x >= border
            && y >= border
            && x < width.saturating_sub(border)
            && y < height.saturating_sub(border);
        if inside {
            [rgb[0], rgb[1], rgb[2], 255]
        } else {
            [0, 0, 0, 0]
        }
    })
}

/// Wrap a raster as a processed image shown at `display` size.
pub fn processed(raster: RasterImage, display: Dimensions) -> Arc<ProcessedImage> {
    Arc::new(ProcessedImage {
        asset: "synthetic_1.png".into(),
        processing: raster.dimensions(),
        display,
        tables: Arc::new(IntegralTables::build(&raster)),
        raster: Arc::new(raster),
    })
}

/// RGB sums and opaque count over the inclusive rectangle `(x1, y1)-(x2, y2)` by scanning pixels.
pub fn brute_force_sum(raster: &RasterImage, x1: u32, y1: u32, x2: u32, y2: u32) -> [u64; 4] {
    let mut sums = [0u64; 4];
    for y in y1..=y2.min(raster.height() - 1) {
        for x in x1..=x2.min(raster.width() - 1) {
            let [r, g, b, a] = raster.pixel(x, y);
            if a > crate::OPACITY_THRESHOLD {
                sums[0] += u64::from(r);
                sums[1] += u64::from(g);
                sums[2] += u64::from(b);
                sums[3] += 1;
            }
        }
    }
    sums
}
