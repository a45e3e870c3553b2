//! Pair filtering.
//!
//! Every registered volume carries a [`FilterGroup`]: a caller-chosen group
//! id plus the volume's [`FilterKind`] packed into the low bits. Two volumes
//! are eligible to pair when their groups differ (shapes of the same body
//! never pair in the broad phase) and the kind-compatibility table allows
//! their kinds. The table is fixed at construction; static-static pairs are
//! always rejected, kinematic involvement is configurable.

/// Broad classification of a volume for pair filtering.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterKind {
    Static = 0,
    Kinematic = 1,
    Dynamic = 2,
    Aggregate = 3,
}

/// Whether a category of pairs is kept or suppressed outright.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PairFilteringMode {
    Keep,
    Suppress,
}

/// A volume's filtering identity: group id in the high bits, kind in the low
/// two bits. Groups with equal ids never pair with each other.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FilterGroup(u32);

impl FilterGroup {
    /// The group of an unregistered or removed volume. Pairs against it are
    /// always rejected, which is how stale persistent pairs get torn down.
    pub const INVALID: FilterGroup = FilterGroup(u32::MAX);

    pub fn new(group_id: u32, kind: FilterKind) -> FilterGroup {
        debug_assert!(group_id < u32::MAX >> 2);
        FilterGroup(group_id << 2 | kind as u32)
    }

    pub fn is_valid(self) -> bool {
        self != FilterGroup::INVALID
    }

    #[inline]
    fn kind_bits(self) -> usize {
        (self.0 & 3) as usize
    }
}

/// The 4x4 kind-compatibility lookup table.
#[derive(Debug, Clone)]
pub struct FilterLut {
    table: [[bool; 4]; 4],
}

impl FilterLut {
    pub fn new(kine_kine: PairFilteringMode, static_kine: PairFilteringMode) -> FilterLut {
        use FilterKind::*;
        let mut table = [[false; 4]; 4];
        let mut set = |a: FilterKind, b: FilterKind, v: bool| {
            table[a as usize][b as usize] = v;
            table[b as usize][a as usize] = v;
        };
        set(Static, Dynamic, true);
        set(Static, Kinematic, static_kine == PairFilteringMode::Keep);
        set(Dynamic, Dynamic, true);
        set(Dynamic, Kinematic, true);
        set(Kinematic, Kinematic, kine_kine == PairFilteringMode::Keep);
        // Aggregate bounds are unions of members; real filtering happens on
        // the members, so aggregates pass against everything.
        set(Aggregate, Static, true);
        set(Aggregate, Kinematic, true);
        set(Aggregate, Dynamic, true);
        set(Aggregate, Aggregate, true);
        FilterLut { table }
    }

    /// The cheap pre-test applied before any geometry is looked at.
    #[inline]
    pub fn compatible(&self, g0: FilterGroup, g1: FilterGroup) -> bool {
        g0 != g1
            && g0.is_valid()
            && g1.is_valid()
            && self.table[g0.kind_bits()][g1.kind_bits()]
    }
}

impl Default for FilterLut {
    fn default() -> FilterLut {
        FilterLut::new(PairFilteringMode::Keep, PairFilteringMode::Keep)
    }
}
