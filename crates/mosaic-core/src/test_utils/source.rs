use crate::image::RasterImage;
use crate::loader::{ArtSource, LoadError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An [`ArtSource`] backed by an in-memory map that counts its fetches.
#[derive(Debug, Default)]
pub struct MemoryArtSource {
    assets: HashMap<String, RasterImage>,
    fetches: AtomicUsize,
}

impl MemoryArtSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `raster` under `asset`.
    #[must_use]
    pub fn with_asset(mut self, asset: impl Into<String>, raster: RasterImage) -> Self {
        self.assets.insert(asset.into(), raster);
        self
    }

    /// Fetches attempted so far, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl ArtSource for MemoryArtSource {
    fn fetch(&self, asset: &str) -> Result<RasterImage, LoadError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.assets.get(asset).cloned().ok_or_else(|| LoadError::Fetch {
            asset: asset.to_owned(),
            reason: "not found".into(),
        })
    }
}
