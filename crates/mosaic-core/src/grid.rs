//! Hierarchical block grid.
//!
//! Blocks live in an arena of slots addressed by a stable [`BlockId`]. A
//! secondary index maps each top-level region ([`RegionKey`]) to the ids of its
//! live descendants, so refining one region touches only that region's blocks.

use crate::color::Rgb;
use crate::colorize::BlockColorizer;
use crate::image::Dimensions;
use std::collections::HashMap;

/// Display-space rectangle of a block.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockGeometry {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Horizontal extent.
    pub width: f64,
    /// Vertical extent.
    pub height: f64,
}

impl BlockGeometry {
    /// Create a rectangle from its origin and extent.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Area in display pixels.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Number of rows and columns of a grid or of a refinement split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridSize {
    /// Rows.
    pub rows: u32,
    /// Columns.
    pub cols: u32,
}

impl GridSize {
    /// Standard starting grid.
    pub const DEFAULT: GridSize = GridSize::new(4, 4);
    /// Coarse starting grid for the easy difficulty.
    pub const EASY: GridSize = GridSize::new(2, 2);

    /// Create a grid size.
    #[must_use]
    pub const fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    /// Number of cells, `rows * cols`.
    #[must_use]
    pub fn cells(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub(crate) fn at_least_one(self) -> Self {
        Self::new(self.rows.max(1), self.cols.max(1))
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Identifies a top-level region (the `initial_row`/`initial_col` lineage).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionKey {
    /// Row in the initial grid.
    pub row: u32,
    /// Column in the initial grid.
    pub col: u32,
}

impl RegionKey {
    /// Create a region key.
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Stable handle to a slot of the block arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    /// Slot index inside the arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single solid-color tile.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    /// Row in the current level's logical grid.
    pub row: u32,
    /// Column in the current level's logical grid.
    pub col: u32,
    /// Row of the top-level region this block descends from.
    pub initial_row: u32,
    /// Column of the top-level region this block descends from.
    pub initial_col: u32,
    /// Refinement generation, starting at 1.
    pub level: u32,
    /// Left edge in display space.
    pub x: f64,
    /// Top edge in display space.
    pub y: f64,
    /// Width in display space.
    pub width: f64,
    /// Height in display space.
    pub height: f64,
    /// Resolved fill color; `None` until a colorizer has run.
    pub color: Option<Rgb>,
    /// Frozen lineage: never subdivided again.
    pub skip_refine: bool,
}

impl Block {
    /// Display-space rectangle of the block.
    #[must_use]
    pub fn geometry(&self) -> BlockGeometry {
        BlockGeometry::new(self.x, self.y, self.width, self.height)
    }

    /// Top-level region the block belongs to.
    #[must_use]
    pub fn region(&self) -> RegionKey {
        RegionKey::new(self.initial_row, self.initial_col)
    }
}

/// Arena of live blocks plus the per-region lineage index.
#[derive(Clone, Debug)]
pub struct BlockGrid {
    slots: Vec<Option<Block>>,
    free: Vec<usize>,
    lineage: HashMap<RegionKey, Vec<BlockId>>,
    display: Dimensions,
    grid_size: GridSize,
}

impl BlockGrid {
    /// Partition `display` into `grid_size` level-1 blocks.
    ///
    /// Cell edges come from uniform division (`x = col * W / cols`), so the last
    /// column ends exactly at the display edge. When a colorizer is given every
    /// block is colored and coverage-tested immediately.
    #[must_use]
    pub fn init(
        display: Dimensions,
        grid_size: GridSize,
        colorizer: Option<&BlockColorizer<'_>>,
    ) -> Self {
        let grid_size = grid_size.at_least_one();
        let mut grid = Self {
            slots: Vec::with_capacity(grid_size.cells()),
            free: Vec::new(),
            lineage: HashMap::with_capacity(grid_size.cells()),
            display,
            grid_size,
        };

        let (w, h) = (f64::from(display.width), f64::from(display.height));
        let (rows, cols) = (f64::from(grid_size.rows), f64::from(grid_size.cols));
        for row in 0..grid_size.rows {
            for col in 0..grid_size.cols {
                let mut block = Block {
                    row,
                    col,
                    initial_row: row,
                    initial_col: col,
                    level: 1,
                    x: f64::from(col) * w / cols,
                    y: f64::from(row) * h / rows,
                    width: w / cols,
                    height: h / rows,
                    color: None,
                    skip_refine: false,
                };
                if let Some(colorizer) = colorizer {
                    colorizer.assign(&mut block);
                }
                grid.insert(block);
            }
        }
        grid
    }

    /// Display size the grid partitions.
    #[must_use]
    pub fn display(&self) -> Dimensions {
        self.display
    }

    /// Size of the initial grid.
    #[must_use]
    pub fn grid_size(&self) -> GridSize {
        self.grid_size
    }

    /// Number of live blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True when no block is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live blocks in arena order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.slots.iter().flatten()
    }

    /// Snapshot of all live blocks in arena order.
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.iter().cloned().collect()
    }

    /// Block stored at `id`, if still live.
    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Live blocks descending from `region`.
    #[must_use]
    pub fn lineage(&self, region: RegionKey) -> Vec<&Block> {
        self.lineage
            .get(&region)
            .map(|ids| ids.iter().filter_map(|&id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every top-level region, in row-major order.
    #[must_use]
    pub fn regions(&self) -> Vec<RegionKey> {
        (0..self.grid_size.rows)
            .flat_map(|row| (0..self.grid_size.cols).map(move |col| RegionKey::new(row, col)))
            .collect()
    }

    /// Remove and return every live block of `region`.
    pub fn take_lineage(&mut self, region: RegionKey) -> Vec<Block> {
        let Some(ids) = self.lineage.remove(&region) else {
            return Vec::new();
        };
        let mut taken = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(block) = self.slots.get_mut(id.0).and_then(Option::take) {
                self.free.push(id.0);
                taken.push(block);
            }
        }
        taken
    }

    /// Store `block`, reusing a free slot when one exists.
    pub fn insert(&mut self, block: Block) -> BlockId {
        let region = block.region();
        let id = if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(block);
            BlockId(slot)
        } else {
            self.slots.push(Some(block));
            BlockId(self.slots.len() - 1)
        };
        self.lineage.entry(region).or_default().push(id);
        id
    }
}

/// Refinement generation count per top-level region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionCounters {
    counts: HashMap<RegionKey, u32>,
}

impl RegionCounters {
    /// Empty counters; every region starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generations applied to `region` so far.
    #[must_use]
    pub fn get(&self, region: RegionKey) -> u32 {
        self.counts.get(&region).copied().unwrap_or(0)
    }

    /// Record one more generation for `region`.
    pub fn increment(&mut self, region: RegionKey) {
        *self.counts.entry(region).or_insert(0) += 1;
    }

    /// Forget all counts.
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn block_at(row: u32, col: u32, initial: (u32, u32)) -> Block {
        Block {
            row,
            col,
            initial_row: initial.0,
            initial_col: initial.1,
            level: 1,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            color: None,
            skip_refine: false,
        }
    }

    #[test]
    fn test_init_default_grid() {
        let grid = BlockGrid::init(Dimensions::new(400, 300), GridSize::DEFAULT, None);
        assert_eq!(grid.len(), 16);
        for block in grid.iter() {
            assert_eq!(block.level, 1);
            assert_eq!((block.row, block.col), (block.initial_row, block.initial_col));
            assert!(block.color.is_none());
            assert!((block.width - 100.0).abs() < 1e-12);
            assert!((block.height - 75.0).abs() < 1e-12);
        }
        assert_eq!(grid.regions().len(), 16);
        assert_eq!(grid.regions()[5], RegionKey::new(1, 1));
    }

    #[test]
    fn test_uniform_division_reaches_edge() {
        let grid = BlockGrid::init(Dimensions::new(601, 599), GridSize::new(7, 3), None);
        let last = grid
            .iter()
            .find(|b| b.row == 6 && b.col == 2)
            .cloned()
            .unwrap();
        assert!((last.x + last.width - 601.0).abs() < 1e-9);
        assert!((last.y + last.height - 599.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_and_insert_reuse_slots() {
        let mut grid = BlockGrid::init(Dimensions::new(10, 10), GridSize::EASY, None);
        let region = RegionKey::new(0, 1);
        let taken = grid.take_lineage(region);
        assert_eq!(taken.len(), 1);
        assert_eq!(grid.len(), 3);
        assert!(grid.lineage(region).is_empty());

        let id = grid.insert(block_at(0, 2, (0, 1)));
        assert_eq!(id.index(), 1, "freed slot should be reused");
        grid.insert(block_at(0, 3, (0, 1)));
        assert_eq!(grid.len(), 5);
        assert_eq!(grid.lineage(region).len(), 2);
    }

    #[test]
    fn test_unknown_region_is_empty() {
        let mut grid = BlockGrid::init(Dimensions::new(10, 10), GridSize::EASY, None);
        assert!(grid.take_lineage(RegionKey::new(9, 9)).is_empty());
        assert_eq!(grid.len(), 4);
    }

    #[test]
    fn test_zero_grid_clamps_to_one_cell() {
        let grid = BlockGrid::init(Dimensions::new(10, 10), GridSize::new(0, 0), None);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.grid_size(), GridSize::new(1, 1));
    }

    #[test]
    fn test_counters_default_to_zero() {
        let mut counters = RegionCounters::new();
        let region = RegionKey::new(2, 3);
        assert_eq!(counters.get(region), 0);
        counters.increment(region);
        counters.increment(region);
        assert_eq!(counters.get(region), 2);
        counters.clear();
        assert_eq!(counters.get(region), 0);
    }

    proptest! {
        #[test]
        fn prop_init_tiles_display(
            width in 1..2000u32,
            height in 1..2000u32,
            rows in 1..12u32,
            cols in 1..12u32,
        ) {
            let grid =
                BlockGrid::init(Dimensions::new(width, height), GridSize::new(rows, cols), None);
            prop_assert_eq!(grid.len(), (rows * cols) as usize);
            let total: f64 = grid.iter().map(|b| b.geometry().area()).sum();
            let expected = f64::from(width) * f64::from(height);
            prop_assert!((total - expected).abs() < expected * 1e-9);
            for b in grid.iter() {
                prop_assert!(b.x >= 0.0 && b.y >= 0.0);
                prop_assert!(b.x + b.width <= f64::from(width) + 1e-9);
                prop_assert!(b.y + b.height <= f64::from(height) + 1e-9);
            }
        }
    }
}
