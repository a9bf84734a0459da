//! Bounded insertion-order caches.
//!
//! Both caches are plain owned values: whoever owns the loading service owns
//! its caches, so separate sessions never observe each other's entries.

use crate::loader::{ProcessedImage, SubjectRecord};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

/// Default capacity of the integral result cache.
pub const DEFAULT_INTEGRAL_CACHE_SIZE: usize = 15;
/// Default capacity of the art selection cache.
pub const DEFAULT_ART_CACHE_SIZE: usize = 20;

/// Counters describing a cache's behavior so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheStats {
    /// Live entries.
    pub len: usize,
    /// Maximum live entries.
    pub capacity: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

/// Map with a fixed capacity that evicts the oldest inserted key first.
///
/// Re-inserting an existing key replaces its value but keeps its age.
#[derive(Clone, Debug)]
pub struct BoundedFifoCache<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V> BoundedFifoCache<K, V> {
    /// Create an empty cache holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up `key`, counting a hit or a miss.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let found = self.map.get(key);
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Look up `key` without touching the counters.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// True when `key` is cached.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Store `value` under `key`, returning the evicted entry if the cache was full.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.map.get_mut(&key) {
            *slot = value;
            return None;
        }
        let evicted = if self.map.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };
        self.order.push_back(key.clone());
        self.map.insert(key, value);
        evicted
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        while let Some(oldest) = self.order.pop_front() {
            if let Some(value) = self.map.remove(&oldest) {
                self.evictions += 1;
                return Some((oldest, value));
            }
        }
        None
    }

    /// Drop `key`.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.map.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    /// Keep only the entries for which `keep` returns true; returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
        let before = self.map.len();
        self.map.retain(|k, v| keep(k, v));
        let map = &self.map;
        self.order.retain(|k| map.contains_key(k));
        before - self.map.len()
    }

    /// Drop every entry; counters are kept.
    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum live entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.map.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

/// Identifies one processed image: the asset and the layout bounds it was prepared for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IntegralKey {
    /// Asset file name.
    pub asset: String,
    /// Requested maximum display width.
    pub max_width: u32,
    /// Requested maximum display height.
    pub max_height: u32,
}

impl IntegralKey {
    /// Create a key.
    #[must_use]
    pub fn new(asset: impl Into<String>, max_width: u32, max_height: u32) -> Self {
        Self {
            asset: asset.into(),
            max_width,
            max_height,
        }
    }
}

/// Processed images (tables, raster, dimensions) by asset and layout bounds.
pub type IntegralCache = BoundedFifoCache<IntegralKey, Arc<ProcessedImage>>;

/// Key of a remembered art choice.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ArtKey {
    subject: String,
    session: Option<String>,
}

/// Remembers which art was picked for a subject within a session.
#[derive(Clone, Debug)]
pub struct ArtSelectionCache {
    inner: BoundedFifoCache<ArtKey, String>,
}

impl Default for ArtSelectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_ART_CACHE_SIZE)
    }
}

impl ArtSelectionCache {
    /// Create an empty cache holding at most `capacity` selections.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedFifoCache::new(capacity),
        }
    }

    /// Art for `subject` in `session`, choosing uniformly on first use.
    ///
    /// Without a session the choice is remembered per subject. Returns `None`
    /// when the subject has no art at all.
    pub fn select<R: Rng + ?Sized>(
        &mut self,
        subject: &SubjectRecord,
        session: Option<&str>,
        rng: &mut R,
    ) -> Option<String> {
        let key = ArtKey {
            subject: subject.id.clone(),
            session: session.map(str::to_owned),
        };
        if let Some(asset) = self.inner.get(&key) {
            return Some(asset.clone());
        }
        let asset = subject.available_arts().choose(rng).cloned()?;
        if let Some((evicted, _)) = self.inner.insert(key, asset.clone()) {
            tracing::debug!(subject = %evicted.subject, "evicted art selection");
        }
        Some(asset)
    }

    /// Forget every selection made in `session`; returns how many were dropped.
    pub fn clear_session(&mut self, session: &str) -> usize {
        self.inner
            .retain(|key, _| key.session.as_deref() != Some(session))
    }

    /// Forget every selection.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Remembered selections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Counters of the underlying cache.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
