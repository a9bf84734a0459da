//! Opaque fill colors and the HSL helpers used by dominant-color extraction.

use std::fmt;

/// An opaque 8-bit RGB fill color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Neutral fallback for regions with too little opaque coverage.
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    /// Create a color from its channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// A gray with all channels equal to `v`.
    #[must_use]
    pub const fn gray(v: u8) -> Self {
        Self::new(v, v, v)
    }

    /// CSS `rgb(r,g,b)` notation for drawing collaborators.
    #[must_use]
    pub fn to_css(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({},{},{})", self.r, self.g, self.b)
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::new(r, g, b)
    }
}

/// HSL saturation of an 8-bit color, in `[0, 1]`.
#[must_use]
pub fn saturation(r: u8, g: u8, b: u8) -> f64 {
    let max = f64::from(r.max(g).max(b)) / 255.0;
    let min = f64::from(r.min(g).min(b)) / 255.0;
    let diff = max - min;
    if diff == 0.0 {
        return 0.0;
    }
    let lightness = (max + min) / 2.0;
    if lightness > 0.5 {
        diff / (2.0 - max - min)
    } else {
        diff / (max + min)
    }
}

/// Push each channel away from the color's mid-range by `factor`.
///
/// Grays (all channels equal) are returned unchanged.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn boost_saturation(color: Rgb, factor: f64) -> Rgb {
    let Rgb { r, g, b } = color;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == min {
        return color;
    }
    let center = (f64::from(max) + f64::from(min)) / 2.0;
    let stretch = |c: u8| -> u8 {
        (center + (f64::from(c) - center) * factor)
            .clamp(0.0, 255.0)
            .round() as u8
    };
    Rgb::new(stretch(r), stretch(g), stretch(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_css_notation() {
        assert_eq!(Rgb::new(10, 20, 30).to_css(), "rgb(10,20,30)");
        assert_eq!(Rgb::WHITE.to_string(), "rgb(255,255,255)");
    }

    #[test]
    fn test_saturation_extremes() {
        assert_eq!(saturation(128, 128, 128), 0.0);
        assert!((saturation(255, 0, 0) - 1.0).abs() < 1e-12);
        // Light pink: lightness > 0.5 branch.
        let s = saturation(255, 200, 200);
        assert!(s > 0.99 && s <= 1.0, "got {s}");
    }

    #[test]
    fn test_boost_stretches_around_center() {
        // center = 150, r: 150 + 50*1.2 = 210, b: 150 - 50*1.2 = 90
        let boosted = boost_saturation(Rgb::new(200, 150, 100), 1.2);
        assert_eq!(boosted, Rgb::new(210, 150, 90));
    }

    #[test]
    fn test_boost_leaves_gray() {
        assert_eq!(boost_saturation(Rgb::gray(77), 3.0), Rgb::gray(77));
    }

    proptest! {
        #[test]
        fn prop_saturation_in_unit_range(r in 0..=255u8, g in 0..=255u8, b in 0..=255u8) {
            let s = saturation(r, g, b);
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn prop_unit_boost_is_identity(r in 0..=255u8, g in 0..=255u8, b in 0..=255u8) {
            let c = Rgb::new(r, g, b);
            prop_assert_eq!(boost_saturation(c, 1.0), c);
        }
    }
}
