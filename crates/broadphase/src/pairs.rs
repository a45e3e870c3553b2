//! Persistent pairs: tracked relationships between top-level volumes that
//! contain member-level sub-pairs.
//!
//! Whenever the flat broad-phase reports two top-level volumes overlapping
//! and at least one of them is an aggregate, a persistent pair is created to
//! track which of their members actually overlap. Each pair owns a
//! [`PairMap`] and refreshes it by re-sweeping its sources; the tracker turns
//! the sweep results into created/destroyed sub-pair events. A timestamp
//! guards against refreshing the same pair twice within one step.

use keel_pairmap::PairMap;
use slab::Slab;

use crate::aggregate::{Aggregate, AggregateHandle};
use crate::bitmap::BitMap;
use crate::encode::SortedAabb;
use crate::events::EventBuffer;
use crate::filter::{FilterGroup, FilterLut};
use crate::registry::BoundsIndex;
use crate::sweep::{
    brute_force_bipartite, brute_force_self, prune_bipartite, prune_self, SweepMode,
};

/// Everything a refresh needs to read. All of it is immutable during the
/// parallel refresh stages.
pub(crate) struct RefreshContext<'a> {
    pub aggregates: &'a Slab<Aggregate>,
    pub bounds: &'a [crate::aabb::Aabb],
    pub margins: &'a [f32],
    pub groups: &'a [FilterGroup],
    /// Bounds indices whose box or margin changed this step.
    pub updated: &'a BitMap,
    pub lut: &'a FilterLut,
    pub mode: SweepMode,
    pub timestamp: u32,
}

impl<'a> RefreshContext<'a> {
    fn live_aggregate(&self, handle: AggregateHandle, index: BoundsIndex) -> Option<&'a Aggregate> {
        // A recycled slab slot can hold a different aggregate by now; the
        // stored bounds index tells the two apart.
        self.aggregates
            .get(handle.0 as usize)
            .filter(|a| a.bp_index == index)
    }
}

/// What a persistent pair sweeps.
#[derive(Debug, Copy, Clone)]
pub(crate) enum PairSources {
    /// A single volume against an aggregate's members.
    ActorAggregate {
        actor: BoundsIndex,
        aggregate: AggregateHandle,
        aggregate_index: BoundsIndex,
    },
    /// Two aggregates' member collections against each other.
    AggregateAggregate {
        aggregate0: AggregateHandle,
        index0: BoundsIndex,
        aggregate1: AggregateHandle,
        index1: BoundsIndex,
    },
    /// An aggregate's members against each other.
    SelfCollision {
        aggregate: AggregateHandle,
        index: BoundsIndex,
    },
}

pub(crate) struct PersistentPair {
    sources: PairSources,
    should_be_deleted: bool,
    timestamp: u32,
    tracker: PairMap,
}

impl PersistentPair {
    pub fn new(sources: PairSources) -> PersistentPair {
        PersistentPair {
            sources,
            should_be_deleted: false,
            timestamp: u32::MAX,
            tracker: PairMap::new(),
        }
    }

    /// The owning top-level flat-broad-phase pair broke; the next refresh
    /// tears this pair down.
    pub fn mark_for_deletion(&mut self) {
        self.should_be_deleted = true;
    }

    pub fn active_sub_pairs(&self) -> usize {
        self.tracker.len()
    }

    /// Re-sweep if anything on either side moved, reconciling the tracker
    /// into created/destroyed events. Returns true when the pair is dead and
    /// must be removed from its map; all of its active sub-pairs have then
    /// been emitted as destroyed.
    pub fn refresh(
        &mut self,
        ctx: &RefreshContext<'_>,
        force: bool,
        events: &mut EventBuffer,
    ) -> bool {
        if self.timestamp == ctx.timestamp {
            return self.should_be_deleted;
        }
        self.timestamp = ctx.timestamp;

        if self.should_be_deleted || !self.sources_alive(ctx) {
            self.should_be_deleted = true;
            self.dump_destroyed(events);
            return true;
        }

        if force || self.is_dirty(ctx) {
            self.sweep_members(ctx);
            let created = &mut events.created;
            let destroyed = &mut events.destroyed;
            self.tracker.sweep_and_compact(
                |a, b| created.push((a, b)),
                |a, b| destroyed.push((a, b)),
            );
        }
        false
    }

    /// Emit every active sub-pair as destroyed and forget them all.
    pub fn dump_destroyed(&mut self, events: &mut EventBuffer) {
        for (a, b) in self.tracker.iter() {
            events.push_destroyed((a, b));
        }
        self.tracker.clear();
    }

    /// Both sides still exist, are non-empty, and the relationship is still
    /// allowed by the filtering rules.
    fn sources_alive(&self, ctx: &RefreshContext<'_>) -> bool {
        match self.sources {
            PairSources::ActorAggregate {
                actor,
                aggregate,
                aggregate_index,
            } => {
                let agg = match ctx.live_aggregate(aggregate, aggregate_index) {
                    Some(agg) => agg,
                    None => return false,
                };
                agg.len() > 0
                    && ctx.lut.compatible(
                        ctx.groups[actor as usize],
                        ctx.groups[aggregate_index as usize],
                    )
            }
            PairSources::AggregateAggregate {
                aggregate0,
                index0,
                aggregate1,
                index1,
            } => {
                let a0 = match ctx.live_aggregate(aggregate0, index0) {
                    Some(agg) => agg,
                    None => return false,
                };
                let a1 = match ctx.live_aggregate(aggregate1, index1) {
                    Some(agg) => agg,
                    None => return false,
                };
                a0.len() > 0
                    && a1.len() > 0
                    && ctx
                        .lut
                        .compatible(ctx.groups[index0 as usize], ctx.groups[index1 as usize])
            }
            PairSources::SelfCollision { aggregate, index } => {
                match ctx.live_aggregate(aggregate, index) {
                    Some(agg) => agg.len() > 0 && ctx.groups[index as usize].is_valid(),
                    None => false,
                }
            }
        }
    }

    fn is_dirty(&self, ctx: &RefreshContext<'_>) -> bool {
        match self.sources {
            PairSources::ActorAggregate {
                actor, aggregate, ..
            } => {
                ctx.aggregates[aggregate.0 as usize].changed_this_step || ctx.updated.test(actor)
            }
            PairSources::AggregateAggregate {
                aggregate0,
                aggregate1,
                ..
            } => {
                ctx.aggregates[aggregate0.0 as usize].changed_this_step
                    || ctx.aggregates[aggregate1.0 as usize].changed_this_step
            }
            PairSources::SelfCollision { aggregate, .. } => {
                ctx.aggregates[aggregate.0 as usize].changed_this_step
            }
        }
    }

    fn sweep_members(&mut self, ctx: &RefreshContext<'_>) {
        let tracker = &mut self.tracker;
        let mut sink = |a: u32, b: u32| {
            tracker.upsert(a, b);
        };
        match self.sources {
            PairSources::ActorAggregate {
                actor, aggregate, ..
            } => {
                let agg = &ctx.aggregates[aggregate.0 as usize];
                let inflated =
                    ctx.bounds[actor as usize].inflate(ctx.margins[actor as usize]);
                let actor_bounds = [SortedAabb::from_aabb(&inflated), SortedAabb::sentinel()];
                let actor_owners = [actor];
                let (bounds1, owners1) = agg.sorted();
                match ctx.mode {
                    SweepMode::Prune => prune_bipartite(
                        &actor_bounds,
                        &actor_owners,
                        bounds1,
                        owners1,
                        ctx.groups,
                        ctx.lut,
                        &mut sink,
                    ),
                    SweepMode::BruteForce => brute_force_bipartite(
                        &actor_bounds,
                        &actor_owners,
                        bounds1,
                        owners1,
                        ctx.groups,
                        ctx.lut,
                        &mut sink,
                    ),
                }
            }
            PairSources::AggregateAggregate {
                aggregate0,
                aggregate1,
                ..
            } => {
                let a0 = &ctx.aggregates[aggregate0.0 as usize];
                let a1 = &ctx.aggregates[aggregate1.0 as usize];
                let (bounds0, owners0) = a0.sorted();
                let (bounds1, owners1) = a1.sorted();
                match ctx.mode {
                    SweepMode::Prune => prune_bipartite(
                        bounds0, owners0, bounds1, owners1, ctx.groups, ctx.lut, &mut sink,
                    ),
                    SweepMode::BruteForce => brute_force_bipartite(
                        bounds0, owners0, bounds1, owners1, ctx.groups, ctx.lut, &mut sink,
                    ),
                }
            }
            PairSources::SelfCollision { aggregate, .. } => {
                let agg = &ctx.aggregates[aggregate.0 as usize];
                let (bounds, owners) = agg.sorted();
                match ctx.mode {
                    SweepMode::Prune => {
                        prune_self(bounds, owners, ctx.groups, ctx.lut, &mut sink)
                    }
                    SweepMode::BruteForce => {
                        brute_force_self(bounds, owners, ctx.groups, ctx.lut, &mut sink)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::{Aabb, V3};
    use crate::filter::FilterKind;

    use pretty_assertions::assert_eq;

    struct Fixture {
        aggregates: Slab<Aggregate>,
        bounds: Vec<Aabb>,
        margins: Vec<f32>,
        groups: Vec<FilterGroup>,
        updated: BitMap,
        lut: FilterLut,
    }

    impl Fixture {
        fn new(size: usize) -> Fixture {
            Fixture {
                aggregates: Slab::new(),
                bounds: vec![Aabb::EMPTY; size],
                margins: vec![0.0; size],
                groups: vec![FilterGroup::INVALID; size],
                updated: BitMap::new(),
                lut: FilterLut::default(),
            }
        }

        fn set_box(&mut self, index: u32, min: V3, max: V3, kind: FilterKind) {
            self.bounds[index as usize] = Aabb::new(min, max).unwrap();
            self.groups[index as usize] = FilterGroup::new(index, kind);
        }

        fn ctx(&self, timestamp: u32) -> RefreshContext<'_> {
            RefreshContext {
                aggregates: &self.aggregates,
                bounds: &self.bounds,
                margins: &self.margins,
                groups: &self.groups,
                updated: &self.updated,
                lut: &self.lut,
                mode: SweepMode::Prune,
                timestamp,
            }
        }

        fn recompute(&mut self, key: usize) {
            let agg = &mut self.aggregates[key];
            let merged = agg.compute_bounds(&self.bounds, &self.margins);
            agg.sort_bounds();
            agg.changed_this_step = true;
            self.bounds[agg.bp_index as usize] = merged;
        }
    }

    /// Aggregate with members 0 and 1 (far apart on X), merged box at
    /// index 2, actor at index 3.
    fn actor_aggregate_fixture() -> (Fixture, AggregateHandle, PersistentPair) {
        let mut f = Fixture::new(8);
        f.set_box(0, V3::splat(0.0), V3::splat(1.0), FilterKind::Dynamic);
        f.set_box(1, V3::new(10.0, 0.0, 0.0), V3::new(11.0, 1.0, 1.0), FilterKind::Dynamic);
        f.set_box(3, V3::splat(0.5), V3::new(0.6, 0.6, 0.6), FilterKind::Dynamic);
        f.groups[2] = FilterGroup::new(100, FilterKind::Aggregate);

        let key = f.aggregates.insert(Aggregate::new(2, false, 128));
        let handle = AggregateHandle(key as u32);
        f.aggregates[key].add_member(0);
        f.aggregates[key].add_member(1);
        f.recompute(key);

        let pair = PersistentPair::new(PairSources::ActorAggregate {
            actor: 3,
            aggregate: handle,
            aggregate_index: 2,
        });
        (f, handle, pair)
    }

    #[test]
    fn actor_aggregate_overlap_lifecycle() {
        let (mut f, handle, mut pair) = actor_aggregate_fixture();

        let mut events = EventBuffer::new();
        assert!(!pair.refresh(&f.ctx(0), true, &mut events));
        assert_eq!(events.created, vec![(0, 3)]);
        assert_eq!(events.destroyed, vec![]);

        // Nothing moved: a later step re-sweeps nothing and reports nothing.
        f.aggregates[handle.0 as usize].changed_this_step = false;
        let mut events = EventBuffer::new();
        assert!(!pair.refresh(&f.ctx(1), false, &mut events));
        assert_eq!(events.created, vec![]);
        assert_eq!(events.destroyed, vec![]);
        assert_eq!(pair.active_sub_pairs(), 1);

        // The actor leaves; the sub-pair dies.
        f.bounds[3] = Aabb::new(V3::new(20.0, 0.0, 0.0), V3::new(20.1, 0.1, 0.1)).unwrap();
        f.updated.set(3);
        let mut events = EventBuffer::new();
        assert!(!pair.refresh(&f.ctx(2), false, &mut events));
        assert_eq!(events.created, vec![]);
        assert_eq!(events.destroyed, vec![(0, 3)]);
        assert_eq!(pair.active_sub_pairs(), 0);
    }

    #[test]
    fn refresh_is_guarded_by_timestamp() {
        let (f, _, mut pair) = actor_aggregate_fixture();
        let mut events = EventBuffer::new();
        assert!(!pair.refresh(&f.ctx(0), true, &mut events));
        assert_eq!(events.created.len(), 1);

        // Same timestamp: the second call is a no-op even when forced.
        let mut events = EventBuffer::new();
        assert!(!pair.refresh(&f.ctx(0), true, &mut events));
        assert_eq!(events.created, vec![]);
        assert_eq!(events.destroyed, vec![]);
    }

    #[test]
    fn marked_pair_tears_down_and_dumps_sub_pairs() {
        let (f, _, mut pair) = actor_aggregate_fixture();
        let mut events = EventBuffer::new();
        pair.refresh(&f.ctx(0), true, &mut events);
        assert_eq!(pair.active_sub_pairs(), 1);

        pair.mark_for_deletion();
        let mut events = EventBuffer::new();
        assert!(pair.refresh(&f.ctx(1), false, &mut events));
        assert_eq!(events.destroyed, vec![(0, 3)]);
        assert_eq!(pair.active_sub_pairs(), 0);
    }

    #[test]
    fn emptied_aggregate_deletes_the_pair() {
        let (mut f, handle, mut pair) = actor_aggregate_fixture();
        let mut events = EventBuffer::new();
        pair.refresh(&f.ctx(0), true, &mut events);

        let agg = &mut f.aggregates[handle.0 as usize];
        agg.remove_member(0);
        agg.remove_member(1);
        let mut events = EventBuffer::new();
        assert!(pair.refresh(&f.ctx(1), false, &mut events));
        assert_eq!(events.destroyed, vec![(0, 3)]);
    }

    #[test]
    fn recycled_slab_slot_does_not_resurrect_the_pair() {
        let (mut f, handle, mut pair) = actor_aggregate_fixture();
        let mut events = EventBuffer::new();
        pair.refresh(&f.ctx(0), true, &mut events);

        // The aggregate dies and its slot is reused for an unrelated one
        // with a different bounds index.
        f.aggregates.remove(handle.0 as usize);
        let key = f.aggregates.insert(Aggregate::new(6, false, 128));
        assert_eq!(key, handle.0 as usize);

        let mut events = EventBuffer::new();
        assert!(pair.refresh(&f.ctx(1), false, &mut events));
        assert_eq!(events.destroyed, vec![(0, 3)]);
    }

    #[test]
    fn self_collision_tracks_member_pairs() {
        let mut f = Fixture::new(8);
        f.set_box(0, V3::splat(0.0), V3::splat(1.0), FilterKind::Dynamic);
        f.set_box(1, V3::new(0.5, 0.0, 0.0), V3::new(1.5, 1.0, 1.0), FilterKind::Dynamic);
        f.set_box(2, V3::new(30.0, 0.0, 0.0), V3::new(31.0, 1.0, 1.0), FilterKind::Dynamic);
        f.groups[4] = FilterGroup::new(100, FilterKind::Aggregate);

        let key = f.aggregates.insert(Aggregate::new(4, true, 128));
        for m in 0..3 {
            f.aggregates[key].add_member(m);
        }
        f.recompute(key);

        let mut pair = PersistentPair::new(PairSources::SelfCollision {
            aggregate: AggregateHandle(key as u32),
            index: 4,
        });
        let mut events = EventBuffer::new();
        assert!(!pair.refresh(&f.ctx(0), true, &mut events));
        assert_eq!(events.created, vec![(0, 1)]);

        // Member 2 drifts into member 1.
        f.bounds[2] = Aabb::new(V3::new(1.2, 0.0, 0.0), V3::new(2.2, 1.0, 1.0)).unwrap();
        f.recompute(key);
        let mut events = EventBuffer::new();
        assert!(!pair.refresh(&f.ctx(1), false, &mut events));
        assert_eq!(events.created, vec![(1, 2)]);
        assert_eq!(events.destroyed, vec![]);
        assert_eq!(pair.active_sub_pairs(), 2);
    }
}
