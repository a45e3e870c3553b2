//! Aggregates: groups of member volumes that enter the flat broad-phase as a
//! single merged box.
//!
//! Each aggregate keeps the inflated, encoded boxes of its members in a
//! buffer sorted by min-X so member-level sweeps can run directly against it.
//! The member list itself is kept in that sorted order too, which means on
//! the next step the buffer is usually already sorted and the sort is a
//! single linear scan.

use log::*;
use smallvec::SmallVec;

use crate::aabb::Aabb;
use crate::encode::SortedAabb;
use crate::radix::radix_ranks;
use crate::registry::BoundsIndex;

/// Stable identity of an aggregate. Slots are recycled, so a handle is only
/// meaningful while its aggregate is alive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AggregateHandle(pub(crate) u32);

pub(crate) struct Aggregate {
    /// The bounds index the merged box occupies in the registry.
    pub bp_index: BoundsIndex,
    /// Whether members of this aggregate are swept against each other.
    pub self_collisions: bool,
    /// Merged box is stale; membership or member bounds changed this step.
    pub dirty_bounds: bool,
    /// Set while this aggregate's bounds were recomputed during the current
    /// step, so persistent pairs know to re-sweep. Cleared at step end.
    pub changed_this_step: bool,
    capacity: usize,
    members: SmallVec<[BoundsIndex; 8]>,
    /// Members past `capacity`. Registered but excluded from bounds and
    /// overlap computation until a slot frees up.
    overflow: Vec<BoundsIndex>,
    /// Inflated encoded member boxes. In member order after
    /// [`compute_bounds`](Self::compute_bounds); sorted by min-X with a
    /// trailing sentinel after [`sort_bounds`](Self::sort_bounds).
    sorted: Vec<SortedAabb>,
    dirty_sort: bool,
}

impl Aggregate {
    pub fn new(bp_index: BoundsIndex, self_collisions: bool, capacity: usize) -> Aggregate {
        Aggregate {
            bp_index,
            self_collisions,
            dirty_bounds: false,
            changed_this_step: false,
            capacity,
            members: SmallVec::new(),
            overflow: Vec::new(),
            sorted: Vec::new(),
            dirty_sort: true,
        }
    }

    pub fn members(&self) -> &[BoundsIndex] {
        &self.members
    }

    /// Participating plus overflow members.
    pub fn total_len(&self) -> usize {
        self.members.len() + self.overflow.len()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.overflow.is_empty()
    }

    /// Attach `index`. A member past the capacity stays registered but sits
    /// in an overflow list, excluded from bounds and overlap computation
    /// until another member leaves.
    pub fn add_member(&mut self, index: BoundsIndex) {
        if self.members.len() < self.capacity {
            self.members.push(index);
            self.dirty_bounds = true;
            self.dirty_sort = true;
        } else {
            warn!(
                "aggregate at bounds index {} is at its capacity of {}; member {} will not participate in overlaps",
                self.bp_index, self.capacity, index
            );
            self.overflow.push(index);
        }
    }

    /// Detach `index` from either list. Order is not preserved; the next
    /// sort repairs it. A freed slot is immediately refilled from overflow.
    pub fn remove_member(&mut self, index: BoundsIndex) -> bool {
        if let Some(at) = self.members.iter().position(|&m| m == index) {
            self.members.swap_remove(at);
            if let Some(promoted) = self.overflow.pop() {
                self.members.push(promoted);
            }
            self.dirty_bounds = true;
            self.dirty_sort = true;
            return true;
        }
        if let Some(at) = self.overflow.iter().position(|&m| m == index) {
            self.overflow.swap_remove(at);
            return true;
        }
        false
    }

    /// Recompute the merged box from the current member bounds, inflating
    /// each member by its own margin. Also refills the encoded buffer the
    /// member sweeps run over.
    pub fn compute_bounds(&mut self, bounds: &[Aabb], margins: &[f32]) -> Aabb {
        debug_assert!(!self.members.is_empty());
        let mut merged = Aabb::EMPTY;
        self.sorted.clear();
        self.sorted.reserve(self.members.len() + 1);
        for &m in &self.members {
            let inflated = bounds[m as usize].inflate(margins[m as usize]);
            merged = merged.merge(&inflated);
            self.sorted.push(SortedAabb::from_aabb(&inflated));
        }
        self.dirty_bounds = false;
        self.dirty_sort = true;
        merged
    }

    /// Bring the encoded buffer into min-X order and append the sentinel.
    /// Members are permuted along with their boxes, so a temporally coherent
    /// aggregate hits the already-sorted early-out on the next step.
    pub fn sort_bounds(&mut self) {
        if !self.dirty_sort {
            return;
        }
        self.dirty_sort = false;
        debug_assert_eq!(self.sorted.len(), self.members.len());

        let already_sorted = self
            .sorted
            .windows(2)
            .all(|w| w[0].min_x <= w[1].min_x);
        if !already_sorted {
            let keys: Vec<u32> = self.sorted.iter().map(|b| b.min_x).collect();
            let ranks = radix_ranks(&keys);
            self.sorted = ranks.iter().map(|&r| self.sorted[r as usize]).collect();
            self.members = ranks.iter().map(|&r| self.members[r as usize]).collect();
        }
        self.sorted.push(SortedAabb::sentinel());
    }

    /// The sorted encoded member boxes (with sentinel) and their owners.
    /// Only valid between [`sort_bounds`](Self::sort_bounds) and the next
    /// mutation.
    pub fn sorted(&self) -> (&[SortedAabb], &[BoundsIndex]) {
        debug_assert!(!self.dirty_sort);
        debug_assert_eq!(self.sorted.len(), self.members.len() + 1);
        (&self.sorted, &self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::V3;

    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn boxes_and_margins(specs: &[(f32, f32)]) -> (Vec<Aabb>, Vec<f32>) {
        let bounds = specs
            .iter()
            .map(|&(x, w)| Aabb::new(V3::new(x, 0.0, 0.0), V3::new(x + w, 1.0, 1.0)).unwrap())
            .collect();
        let margins = vec![0.0; specs.len()];
        (bounds, margins)
    }

    #[test]
    fn merged_bounds_cover_inflated_members() {
        let (bounds, _) = boxes_and_margins(&[(0.0, 1.0), (5.0, 2.0)]);
        let margins = vec![0.5, 0.0];
        let mut agg = Aggregate::new(10, false, 128);
        agg.add_member(0);
        agg.add_member(1);
        let merged = agg.compute_bounds(&bounds, &margins);
        assert_relative_eq!(merged.min.x, -0.5);
        assert_relative_eq!(merged.max.x, 7.0);
        assert_relative_eq!(merged.min.y, -0.5);
        assert_relative_eq!(merged.max.y, 1.5);
    }

    #[test]
    fn sort_permutes_members_with_their_boxes() {
        let (bounds, margins) = boxes_and_margins(&[(9.0, 1.0), (1.0, 1.0), (4.0, 1.0)]);
        let mut agg = Aggregate::new(10, false, 128);
        for m in 0..3 {
            agg.add_member(m);
        }
        agg.compute_bounds(&bounds, &margins);
        agg.sort_bounds();
        let (sorted, members) = agg.sorted();
        assert_eq!(members, &[1, 2, 0]);
        assert!(sorted.windows(2).all(|w| w[0].min_x <= w[1].min_x));
        assert_eq!(sorted.len(), 4);

        // A second compute sees the members in sorted order already.
        agg.compute_bounds(&bounds, &margins);
        agg.sort_bounds();
        let (_, members) = agg.sorted();
        assert_eq!(members, &[1, 2, 0]);
    }

    #[test]
    fn remove_member_marks_dirty() {
        let (bounds, margins) = boxes_and_margins(&[(0.0, 1.0), (5.0, 1.0)]);
        let mut agg = Aggregate::new(3, true, 128);
        agg.add_member(0);
        agg.add_member(1);
        agg.compute_bounds(&bounds, &margins);
        agg.sort_bounds();

        assert!(agg.remove_member(0));
        assert!(!agg.remove_member(0));
        assert!(agg.dirty_bounds);
        let merged = agg.compute_bounds(&bounds, &margins);
        agg.sort_bounds();
        assert_eq!(merged.min.x, 5.0);
        assert_eq!(agg.sorted().1, &[1]);
    }

    #[test]
    fn members_past_capacity_wait_in_overflow() {
        let (bounds, margins) = boxes_and_margins(&[(0.0, 1.0), (2.0, 1.0), (4.0, 1.0)]);
        let mut agg = Aggregate::new(7, false, 2);
        agg.add_member(0);
        agg.add_member(1);
        agg.add_member(2);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.total_len(), 3);

        let merged = agg.compute_bounds(&bounds, &margins);
        assert_eq!(merged.max.x, 3.0);

        // Freeing a slot promotes the waiting member.
        assert!(agg.remove_member(0));
        assert_eq!(agg.len(), 2);
        assert!(agg.members().contains(&2));
        let merged = agg.compute_bounds(&bounds, &margins);
        assert_eq!(merged.max.x, 5.0);

        // Overflow members can be detached directly too.
        agg.add_member(0);
        assert_eq!(agg.total_len(), 3);
        assert!(agg.remove_member(0));
        assert!(!agg.remove_member(0));
    }

    proptest! {
        #[test]
        fn sorted_buffer_is_ascending(xs in prop::collection::vec(-100.0..100.0f32, 1..40)) {
            let specs: Vec<(f32, f32)> = xs.iter().map(|&x| (x, 1.0)).collect();
            let (bounds, margins) = boxes_and_margins(&specs);
            let mut agg = Aggregate::new(0, false, 128);
            for m in 0..specs.len() as u32 {
                agg.add_member(m);
            }
            agg.compute_bounds(&bounds, &margins);
            agg.sort_bounds();
            let (sorted, members) = agg.sorted();
            prop_assert!(sorted.windows(2).all(|w| w[0].min_x <= w[1].min_x));
            // Each member still sits next to its own box.
            for (b, &m) in sorted.iter().zip(members.iter()) {
                prop_assert_eq!(b.min_x, crate::encode::encode(bounds[m as usize].min.x));
            }
        }
    }
}
