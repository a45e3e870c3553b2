//! Box pruning: candidate pair generation over min-X-sorted box collections.
//!
//! Both collections arrive sorted by ascending encoded min-X with a sentinel
//! box appended, so the cursors below never need a bounds check. Candidates
//! surviving the 1-D sweep go through the group predicate first (cheap
//! rejection) and only then through the Y/Z interval tests.
//!
//! The bipartite variant runs two symmetric passes: a single directional
//! sweep misses pairs whose second-collection box starts before anything in
//! the first collection. Pass one advances its cursor with a strict compare
//! and pass two with a non-strict one, so a pair whose boxes share a min-X is
//! found by pass one only and nothing is ever reported twice.
use crate::encode::SortedAabb;
use crate::filter::{FilterGroup, FilterLut};
use crate::registry::BoundsIndex;

/// Selects the candidate-generation algorithm. `BruteForce` is the reference
/// implementation: quadratic, but trivially correct.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SweepMode {
    #[default]
    Prune,
    BruteForce,
}

#[inline]
fn test_pair(
    o0: BoundsIndex,
    o1: BoundsIndex,
    b0: &SortedAabb,
    b1: &SortedAabb,
    groups: &[FilterGroup],
    lut: &FilterLut,
    emit: &mut impl FnMut(BoundsIndex, BoundsIndex),
) {
    if lut.compatible(groups[o0 as usize], groups[o1 as usize]) && b0.intersects_yz(b1) {
        emit(o0, o1);
    }
}

/// Sweep two distinct collections against each other.
///
/// `bounds0`/`bounds1` carry one sentinel box past the end, so their length
/// is `owners.len() + 1`.
pub(crate) fn prune_bipartite(
    bounds0: &[SortedAabb],
    owners0: &[BoundsIndex],
    bounds1: &[SortedAabb],
    owners1: &[BoundsIndex],
    groups: &[FilterGroup],
    lut: &FilterLut,
    emit: &mut impl FnMut(BoundsIndex, BoundsIndex),
) {
    debug_assert_eq!(bounds0.len(), owners0.len() + 1);
    debug_assert_eq!(bounds1.len(), owners1.len() + 1);
    let n0 = owners0.len();
    let n1 = owners1.len();

    // Pass one: collection 0 sweeps into collection 1.
    let mut i0 = 0;
    let mut running = 0;
    while running < n1 && i0 < n0 {
        let box0 = bounds0[i0];
        let o0 = owners0[i0];
        i0 += 1;

        while bounds1[running].min_x < box0.min_x {
            running += 1;
        }

        let mut i1 = running;
        while bounds1[i1].min_x <= box0.max_x {
            test_pair(o0, owners1[i1], &box0, &bounds1[i1], groups, lut, emit);
            i1 += 1;
        }
    }

    // Pass two: collection 1 sweeps into collection 0. Ties were already
    // taken by pass one, hence the non-strict cursor advance.
    let mut i0 = 0;
    let mut running = 0;
    while running < n0 && i0 < n1 {
        let box1 = bounds1[i0];
        let o1 = owners1[i0];
        i0 += 1;

        while bounds0[running].min_x <= box1.min_x {
            running += 1;
        }

        let mut i1 = running;
        while bounds0[i1].min_x <= box1.max_x {
            test_pair(owners0[i1], o1, &bounds0[i1], &box1, groups, lut, emit);
            i1 += 1;
        }
    }
}

/// Sweep one collection against itself, skipping the trivial self matches.
pub(crate) fn prune_self(
    bounds: &[SortedAabb],
    owners: &[BoundsIndex],
    groups: &[FilterGroup],
    lut: &FilterLut,
    emit: &mut impl FnMut(BoundsIndex, BoundsIndex),
) {
    debug_assert_eq!(bounds.len(), owners.len() + 1);
    let n = owners.len();

    let mut i0 = 0;
    let mut running = 0;
    while running < n && i0 < n {
        let box0 = bounds[i0];
        let o0 = owners[i0];

        while bounds[running].min_x < box0.min_x {
            running += 1;
        }
        // Step past the first box at this min-X; earlier ties were paired
        // when their own sweep reached forward to us.
        running += 1;

        let mut i1 = running;
        while bounds[i1].min_x <= box0.max_x {
            test_pair(o0, owners[i1], &box0, &bounds[i1], groups, lut, emit);
            i1 += 1;
        }
        i0 += 1;
    }
}

/// Quadratic reference pairing of two distinct collections.
pub(crate) fn brute_force_bipartite(
    bounds0: &[SortedAabb],
    owners0: &[BoundsIndex],
    bounds1: &[SortedAabb],
    owners1: &[BoundsIndex],
    groups: &[FilterGroup],
    lut: &FilterLut,
    emit: &mut impl FnMut(BoundsIndex, BoundsIndex),
) {
    for (i, &o0) in owners0.iter().enumerate() {
        for (j, &o1) in owners1.iter().enumerate() {
            if lut.compatible(groups[o0 as usize], groups[o1 as usize])
                && bounds0[i].intersects(&bounds1[j])
            {
                emit(o0, o1);
            }
        }
    }
}

/// Quadratic reference pairing of a collection against itself.
pub(crate) fn brute_force_self(
    bounds: &[SortedAabb],
    owners: &[BoundsIndex],
    groups: &[FilterGroup],
    lut: &FilterLut,
    emit: &mut impl FnMut(BoundsIndex, BoundsIndex),
) {
    for i in 0..owners.len() {
        for j in i + 1..owners.len() {
            if lut.compatible(groups[owners[i] as usize], groups[owners[j] as usize])
                && bounds[i].intersects(&bounds[j])
            {
                emit(owners[i], owners[j]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::{Aabb, V3};
    use crate::filter::FilterKind;
    use crate::radix::radix_ranks;

    use std::collections::BTreeMap;

    use proptest::prelude::*;

    /// A collection of boxes sorted by min-X, with sentinel, owners carrying
    /// the given base offset into the shared group array.
    struct Collection {
        bounds: Vec<SortedAabb>,
        owners: Vec<BoundsIndex>,
    }

    fn build_collection(raw: &[Aabb], owner_base: u32) -> Collection {
        let encoded: Vec<SortedAabb> = raw.iter().map(SortedAabb::from_aabb).collect();
        let keys: Vec<u32> = encoded.iter().map(|b| b.min_x).collect();
        let ranks = radix_ranks(&keys);

        let mut bounds: Vec<SortedAabb> =
            ranks.iter().map(|&r| encoded[r as usize]).collect();
        let owners: Vec<BoundsIndex> = ranks.iter().map(|&r| owner_base + r).collect();
        bounds.push(SortedAabb::sentinel());
        Collection { bounds, owners }
    }

    /// Integer-ish coordinates so min-X ties actually happen.
    fn arb_boxes(count: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Aabb>> {
        prop::collection::vec(
            (-8..8i32, -8..8i32, -8..8i32, 0..6i32, 0..6i32, 0..6i32),
            count,
        )
        .prop_map(|specs| {
            specs
                .into_iter()
                .map(|(x, y, z, w, h, d)| {
                    Aabb::new(
                        V3::new(x as f32, y as f32, z as f32),
                        V3::new((x + w) as f32, (y + h) as f32, (z + d) as f32),
                    )
                    .unwrap()
                })
                .collect()
        })
    }

    fn groups_for(n: usize) -> Vec<FilterGroup> {
        (0..n as u32)
            .map(|i| FilterGroup::new(i, FilterKind::Dynamic))
            .collect()
    }

    fn canonical(a: u32, b: u32) -> (u32, u32) {
        if a > b {
            (b, a)
        } else {
            (a, b)
        }
    }

    /// Emission counts per unordered pair.
    fn count_pairs(mut run: impl FnMut(&mut dyn FnMut(u32, u32))) -> BTreeMap<(u32, u32), usize> {
        let mut counts = BTreeMap::new();
        run(&mut |a, b| {
            *counts.entry(canonical(a, b)).or_insert(0) += 1;
        });
        counts
    }

    proptest! {
        /// Pruning equals brute force on two collections, and with the
        /// quantized coordinates above this also exercises the tie-break:
        /// every pair is emitted exactly once even when min-X values collide.
        #[test]
        fn bipartite_matches_brute_force(
            raw0 in arb_boxes(0..24),
            raw1 in arb_boxes(0..24),
        ) {
            let groups = groups_for(raw0.len() + raw1.len());
            let lut = FilterLut::default();
            let c0 = build_collection(&raw0, 0);
            let c1 = build_collection(&raw1, raw0.len() as u32);

            let pruned = count_pairs(|emit| {
                prune_bipartite(&c0.bounds, &c0.owners, &c1.bounds, &c1.owners, &groups, &lut, &mut |a, b| emit(a, b))
            });
            let brute = count_pairs(|emit| {
                brute_force_bipartite(&c0.bounds, &c0.owners, &c1.bounds, &c1.owners, &groups, &lut, &mut |a, b| emit(a, b))
            });

            for (&pair, &count) in &pruned {
                prop_assert_eq!(count, 1, "pair {:?} reported {} times", pair, count);
            }
            prop_assert_eq!(pruned, brute);
        }

        /// Same property for the self-collision variant.
        #[test]
        fn self_matches_brute_force(raw in arb_boxes(0..32)) {
            let groups = groups_for(raw.len());
            let lut = FilterLut::default();
            let c = build_collection(&raw, 0);

            let pruned = count_pairs(|emit| {
                prune_self(&c.bounds, &c.owners, &groups, &lut, &mut |a, b| emit(a, b))
            });
            let brute = count_pairs(|emit| {
                brute_force_self(&c.bounds, &c.owners, &groups, &lut, &mut |a, b| emit(a, b))
            });

            for (&pair, &count) in &pruned {
                prop_assert_eq!(count, 1, "pair {:?} reported {} times", pair, count);
            }
            prop_assert_eq!(pruned, brute);
        }

        /// The group predicate must reject before geometry: boxes that do
        /// overlap but share a group id never surface.
        #[test]
        fn same_group_pairs_are_rejected(raw in arb_boxes(2..16)) {
            let lut = FilterLut::default();
            let groups: Vec<FilterGroup> = (0..raw.len())
                .map(|_| FilterGroup::new(9, FilterKind::Dynamic))
                .collect();
            let c = build_collection(&raw, 0);
            let pruned = count_pairs(|emit| {
                prune_self(&c.bounds, &c.owners, &groups, &lut, &mut |a, b| emit(a, b))
            });
            prop_assert!(pruned.is_empty());
        }
    }

    #[test]
    fn one_element_collection_against_many() {
        // The actor side of an actor-aggregate pair is a one-box collection.
        let actor = [Aabb::new(V3::splat(0.0), V3::splat(1.0)).unwrap()];
        let members = [
            Aabb::new(V3::new(0.5, 0.5, 0.5), V3::splat(2.0)).unwrap(),
            Aabb::new(V3::new(10.0, 0.0, 0.0), V3::new(11.0, 1.0, 1.0)).unwrap(),
            Aabb::new(V3::new(-3.0, 0.0, 0.0), V3::new(-2.0, 1.0, 1.0)).unwrap(),
        ];
        let groups = groups_for(4);
        let lut = FilterLut::default();
        let c0 = build_collection(&actor, 0);
        let c1 = build_collection(&members, 1);

        let pruned = count_pairs(|emit| {
            prune_bipartite(&c0.bounds, &c0.owners, &c1.bounds, &c1.owners, &groups, &lut, &mut |a, b| emit(a, b))
        });
        assert_eq!(pruned.into_keys().collect::<Vec<_>>(), vec![(0, 1)]);
    }
}
