//! Refinement scheduling: which regions deepen next, and how a region splits.
//!
//! Fairness is by generation: every region at the lowest refinement count is
//! advanced before any region at the next count. Ties inside a group that is
//! larger than the remaining budget are broken uniformly at random.

use crate::colorize::BlockColorizer;
use crate::grid::{Block, BlockGrid, GridSize, RegionCounters, RegionKey};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use rand::seq::SliceRandom;
use rand::Rng;

/// Advance every live block of `region` by one generation.
///
/// Frozen blocks are re-inserted with `level + 1` and unchanged geometry.
/// Others split into `factor.rows x factor.cols` children, each colored
/// independently when a colorizer is supplied. Unknown regions are a no-op.
pub fn refine_area(
    grid: &mut BlockGrid,
    region: RegionKey,
    factor: GridSize,
    colorizer: Option<&BlockColorizer<'_>>,
) {
    let factor = factor.at_least_one();
    for parent in grid.take_lineage(region) {
        if parent.skip_refine {
            grid.insert(Block {
                level: parent.level + 1,
                ..parent
            });
            continue;
        }

        let (rows, cols) = (f64::from(factor.rows), f64::from(factor.cols));
        for r in 0..factor.rows {
            for c in 0..factor.cols {
                let mut child = Block {
                    row: parent.row * factor.rows + r,
                    col: parent.col * factor.cols + c,
                    initial_row: parent.initial_row,
                    initial_col: parent.initial_col,
                    level: parent.level + 1,
                    x: parent.x + parent.width * f64::from(c) / cols,
                    y: parent.y + parent.height * f64::from(r) / rows,
                    width: parent.width / cols,
                    height: parent.height / rows,
                    color: None,
                    skip_refine: false,
                };
                if let Some(colorizer) = colorizer {
                    colorizer.assign(&mut child);
                }
                grid.insert(child);
            }
        }
    }
}

/// Refine `count` top-level regions, least-refined first.
///
/// Each selected region's counter grows by exactly one. Returns the regions in
/// the order they were refined. `arena` only holds per-call scratch and may be
/// reset by the caller afterwards.
pub fn refine_random<R: Rng + ?Sized>(
    grid: &mut BlockGrid,
    counters: &mut RegionCounters,
    count: usize,
    factor: GridSize,
    colorizer: Option<&BlockColorizer<'_>>,
    rng: &mut R,
    arena: &Bump,
) -> Vec<RegionKey> {
    let mut candidates = BumpVec::from_iter_in(
        grid.regions()
            .into_iter()
            .map(|region| (counters.get(region), region)),
        arena,
    );
    candidates.sort_unstable();

    let mut selected = Vec::with_capacity(count.min(candidates.len()));
    let mut needed = count;
    let mut idx = 0;
    while needed > 0 && idx < candidates.len() {
        let generation = candidates[idx].0;
        let group_len = candidates[idx..]
            .iter()
            .take_while(|(g, _)| *g == generation)
            .count();
        let group = &mut candidates[idx..idx + group_len];

        if group_len <= needed {
            selected.extend(group.iter().map(|&(_, region)| region));
            needed -= group_len;
        } else {
            let (picked, _) = group.partial_shuffle(rng, needed);
            selected.extend(picked.iter().map(|&(_, region)| region));
            needed = 0;
        }
        idx += group_len;
    }

    for &region in &selected {
        refine_area(grid, region, factor, colorizer);
        counters.increment(region);
    }
    tracing::debug!(
        requested = count,
        refined = selected.len(),
        live = grid.len(),
        "refined regions"
    );
    selected
}
