//! The flat broad-phase boundary.
//!
//! The manager delegates all work on top-level volumes (singles and merged
//! aggregate boxes) to an engine behind [`FlatBroadPhase`]. The engine is a
//! black box: it receives the per-step add/update/remove sets plus shared
//! read-only arrays, and answers with created/deleted top-level index pairs
//! and an out-of-bounds list.
//!
//! [`BruteForceBroadPhase`] is the bundled reference engine. It tests every
//! active pair every step, which is quadratic but obviously correct, making
//! it the baseline the incremental machinery is validated against.

use keel_pairmap::PairMap;

use crate::aabb::Aabb;
use crate::bitmap::BitMap;
use crate::filter::{FilterGroup, FilterLut};
use crate::registry::BoundsIndex;

/// Shared per-step view handed to the engine. The arrays are indexed by
/// bounds index and cover members too; the engine must only look at the
/// indices named in the add/update/remove sets and those it already tracks.
pub struct FlatInput<'a> {
    pub added: &'a [BoundsIndex],
    pub updated: &'a [BoundsIndex],
    pub removed: &'a [BoundsIndex],
    pub bounds: &'a [Aabb],
    pub margins: &'a [f32],
    pub groups: &'a [FilterGroup],
    pub lut: &'a FilterLut,
}

/// What one engine update reports back.
#[derive(Debug, Default)]
pub struct FlatResults {
    /// Top-level pairs overlapping now that were not before, smaller index
    /// first.
    pub created: Vec<(BoundsIndex, BoundsIndex)>,
    /// Top-level pairs no longer overlapping, smaller index first.
    pub deleted: Vec<(BoundsIndex, BoundsIndex)>,
    /// Top-level volumes that left the valid world range this step.
    pub out_of_bounds: Vec<BoundsIndex>,
}

pub trait FlatBroadPhase {
    fn update(&mut self, input: &FlatInput<'_>) -> FlatResults;
}

/// Quadratic reference engine: retests every tracked pair each step and
/// diffs the result against the previous step through a [`PairMap`].
pub struct BruteForceBroadPhase {
    /// Volumes escaping this box are reported out-of-bounds. `None` disables
    /// the check.
    world: Option<Aabb>,
    active: Vec<BoundsIndex>,
    tracker: PairMap,
    /// Volumes already reported out-of-bounds, so each escape is reported
    /// once.
    reported_oob: BitMap,
}

impl BruteForceBroadPhase {
    pub fn new(world: Option<Aabb>) -> BruteForceBroadPhase {
        BruteForceBroadPhase {
            world,
            active: Vec::new(),
            tracker: PairMap::new(),
            reported_oob: BitMap::new(),
        }
    }
}

impl FlatBroadPhase for BruteForceBroadPhase {
    fn update(&mut self, input: &FlatInput<'_>) -> FlatResults {
        for &index in input.removed {
            if let Some(at) = self.active.iter().position(|&a| a == index) {
                self.active.swap_remove(at);
            }
            self.reported_oob.reset(index);
        }
        for &index in input.added {
            debug_assert!(!self.active.contains(&index));
            self.active.push(index);
        }

        let inflated = |index: BoundsIndex| {
            input.bounds[index as usize].inflate(input.margins[index as usize])
        };

        for i in 0..self.active.len() {
            for j in i + 1..self.active.len() {
                let (a, b) = (self.active[i], self.active[j]);
                if input
                    .lut
                    .compatible(input.groups[a as usize], input.groups[b as usize])
                    && inflated(a).intersects(&inflated(b))
                {
                    self.tracker.upsert(a, b);
                }
            }
        }

        let mut results = FlatResults::default();
        self.tracker.sweep_and_compact(
            |a, b| results.created.push((a, b)),
            |a, b| results.deleted.push((a, b)),
        );

        if let Some(world) = self.world {
            for &index in &self.active {
                if !world.contains(&inflated(index)) {
                    if !self.reported_oob.test(index) {
                        self.reported_oob.set(index);
                        results.out_of_bounds.push(index);
                    }
                } else {
                    self.reported_oob.reset(index);
                }
            }
        }
        results
    }
}
