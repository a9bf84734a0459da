use crate::image::RasterImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// A filled rectangle placed on a synthetic raster.
#[derive(Debug, Clone, Copy)]
struct Patch {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    rgba: [u8; 4],
}

/// A builder for synthetic art: a background, rectangular patches and noise.
#[derive(Debug, Clone)]
pub struct RasterBuilder {
    width: u32,
    height: u32,
    background: [u8; 4],
    patches: Vec<Patch>,
    noise_sigma: f64,
    seed: u64,
}

impl RasterBuilder {
    /// Start from a fully transparent raster.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: [0, 0, 0, 0],
            patches: Vec::new(),
            noise_sigma: 0.0,
            seed: 0,
        }
    }

    /// Set the background RGBA value.
    #[must_use]
    pub fn with_background(mut self, rgba: [u8; 4]) -> Self {
        self.background = rgba;
        self
    }

    /// Set the standard deviation of per-channel Gaussian color noise.
    ///
    /// Noise never touches alpha, so coverage is unaffected.
    #[must_use]
    pub fn with_noise(mut self, sigma: f64, seed: u64) -> Self {
        self.noise_sigma = sigma;
        self.seed = seed;
        self
    }

    /// Paint a rectangle; later patches cover earlier ones.
    #[must_use]
    pub fn with_patch(mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) -> Self {
        self.patches.push(Patch {
            x,
            y,
            width,
            height,
            rgba,
        });
        self
    }

    /// Scatter `count` random opaque patches of side `side_range`.
    #[must_use]
    pub fn with_random_patches<R: Rng>(
        mut self,
        rng: &mut R,
        count: usize,
        side_range: (u32, u32),
    ) -> Self {
        let min_side = side_range.0.max(1);
        let max_side = side_range.1.max(min_side + 1);
        for _ in 0..count {
            let width = rng.gen_range(min_side..max_side).min(self.width);
            let height = rng.gen_range(min_side..max_side).min(self.height);
            let x = rng.gen_range(0..=self.width - width);
            let y = rng.gen_range(0..=self.height - height);
            let rgba = [rng.gen(), rng.gen(), rng.gen(), 255];
            self.patches.push(Patch {
                x,
                y,
                width,
                height,
                rgba,
            });
        }
        self
    }

    /// Render the raster.
    pub fn build(&self) -> RasterImage {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = Normal::new(0.0, self.noise_sigma)
            .ok()
            .filter(|_| self.noise_sigma > 0.0);
        super::build(self.width, self.height, |x, y| {
            let mut px = self
                .patches
                .iter()
                .rev()
                .find(|p| x >= p.x && y >= p.y && x < p.x + p.width && y < p.y + p.height)
                .map_or(self.background, |p| p.rgba);
            if let Some(noise) = &noise {
                for channel in &mut px[..3] {
                    let v = f64::from(*channel) + noise.sample(&mut rng);
                    *channel = v.round().clamp(0.0, 255.0) as u8;
                }
            }
            px
        })
    }
}
