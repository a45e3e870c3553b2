//! A persistent set of unordered `u32` pairs with created/destroyed delta
//! tracking.
//!
//! The intended protocol is "mark, then sweep": a producer calls
//! [`PairMap::upsert`] for every pair it currently observes, then calls
//! [`PairMap::sweep_and_compact`] exactly once. Pairs seen for the first time
//! are reported as created; pairs that were present last round but received no
//! `upsert` this round are reported as destroyed and removed. Only pairs that
//! actually exist are ever visited, so silence is what signals removal.
//!
//! Internally this is a chained hash table with index links over a dense
//! record array. Removal swaps the last record into the freed slot and relinks
//! its chain, so iteration over active records stays contiguous. The table
//! grows to the next power of two when full and shrinks back toward the ideal
//! size after compaction.

const INVALID: u32 = u32::MAX;
const MIN_HASH_SIZE: u32 = 4;

/// One tracked unordered pair. `id0 < id1` always holds.
#[derive(Debug, Clone, Copy)]
struct Record {
    id0: u32,
    id1: u32,
    is_new: bool,
    is_updated: bool,
}

/// Bob Jenkins' 32-bit integer mix, applied to the packed pair ids.
#[inline]
fn hash_pair(id0: u32, id1: u32) -> u32 {
    let mut k = (id0 & 0xffff) | (id1 << 16);
    k = k.wrapping_add(!(k << 15));
    k ^= k >> 10;
    k = k.wrapping_add(k << 3);
    k ^= k >> 6;
    k = k.wrapping_add(!(k << 11));
    k ^= k >> 16;
    k
}

#[inline]
fn canonical(id0: u32, id1: u32) -> (u32, u32) {
    if id0 > id1 {
        (id1, id0)
    } else {
        (id0, id1)
    }
}

/// Persistent unordered pair set. See the crate docs for the protocol.
#[derive(Default)]
pub struct PairMap {
    /// Bucket heads, `hash -> record index`. Length is a power of two.
    table: Vec<u32>,
    /// Chain links, parallel to `records`.
    next: Vec<u32>,
    records: Vec<Record>,
    mask: u32,
}

impl PairMap {
    pub fn new() -> PairMap {
        PairMap::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all active pairs, in dense storage order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.records.iter().map(|r| (r.id0, r.id1))
    }

    pub fn contains(&self, id0: u32, id1: u32) -> bool {
        let (id0, id1) = canonical(id0, id1);
        self.find(id0, id1, hash_pair(id0, id1)).is_some()
    }

    /// Record that `(id0, id1)` overlaps this round. Creates the pair if it is
    /// not yet tracked, otherwise marks the existing record as re-confirmed.
    /// Returns true when the pair was newly created.
    pub fn upsert(&mut self, id0: u32, id1: u32) -> bool {
        debug_assert_ne!(id0, INVALID);
        debug_assert_ne!(id1, INVALID);
        let (id0, id1) = canonical(id0, id1);
        let full_hash = hash_pair(id0, id1);

        if let Some(index) = self.find(id0, id1, full_hash) {
            self.records[index].is_updated = true;
            return false;
        }

        if self.records.len() as u32 >= self.table.len() as u32 {
            self.grow();
        }

        let bucket = (full_hash & self.mask) as usize;
        let index = self.records.len() as u32;
        self.records.push(Record {
            id0,
            id1,
            is_new: true,
            is_updated: false,
        });
        self.next[index as usize] = self.table[bucket];
        self.table[bucket] = index;
        true
    }

    /// Finish a round: report every pair created this round through
    /// `on_created`, remove (and report through `on_destroyed`) every pair
    /// that received no `upsert` since the previous sweep, and clear the
    /// transient flags of everything that remains.
    pub fn sweep_and_compact(
        &mut self,
        mut on_created: impl FnMut(u32, u32),
        mut on_destroyed: impl FnMut(u32, u32),
    ) {
        let mut i = 0;
        while i < self.records.len() {
            let r = self.records[i];
            if r.is_new {
                on_created(r.id0, r.id1);
                self.records[i].is_new = false;
                self.records[i].is_updated = false;
                i += 1;
            } else if r.is_updated {
                self.records[i].is_updated = false;
                i += 1;
            } else {
                on_destroyed(r.id0, r.id1);
                self.remove_at(i);
                // The former last record now lives at `i`; revisit it.
            }
        }
        self.shrink();
    }

    /// Drop everything, releasing storage.
    pub fn clear(&mut self) {
        self.table = Vec::new();
        self.next = Vec::new();
        self.records = Vec::new();
        self.mask = 0;
    }

    fn find(&self, id0: u32, id1: u32, full_hash: u32) -> Option<usize> {
        if self.table.is_empty() {
            return None;
        }
        let mut offset = self.table[(full_hash & self.mask) as usize];
        while offset != INVALID {
            let r = &self.records[offset as usize];
            if r.id0 == id0 && r.id1 == id1 {
                return Some(offset as usize);
            }
            offset = self.next[offset as usize];
        }
        None
    }

    fn grow(&mut self) {
        let size = ((self.records.len() as u32) + 1)
            .next_power_of_two()
            .max(MIN_HASH_SIZE);
        self.rehash(size);
    }

    fn shrink(&mut self) {
        if self.records.is_empty() {
            self.clear();
            return;
        }
        let ideal = (self.records.len() as u32)
            .next_power_of_two()
            .max(MIN_HASH_SIZE);
        if ideal != self.table.len() as u32 {
            self.rehash(ideal);
        }
    }

    fn rehash(&mut self, size: u32) {
        self.mask = size - 1;
        self.table.clear();
        self.table.resize(size as usize, INVALID);
        self.next.resize(size as usize, INVALID);
        for (i, r) in self.records.iter().enumerate() {
            let bucket = (hash_pair(r.id0, r.id1) & self.mask) as usize;
            self.next[i] = self.table[bucket];
            self.table[bucket] = i as u32;
        }
    }

    /// Unlink record `index` from its chain, then fill the hole by moving the
    /// last record into it and relinking that record's chain.
    fn remove_at(&mut self, index: usize) {
        let r = self.records[index];
        self.unlink(index, hash_pair(r.id0, r.id1));

        let last = self.records.len() - 1;
        if last != index {
            let moved = self.records[last];
            self.unlink(last, hash_pair(moved.id0, moved.id1));
            self.records[index] = moved;
            let bucket = (hash_pair(moved.id0, moved.id1) & self.mask) as usize;
            self.next[index] = self.table[bucket];
            self.table[bucket] = index as u32;
        }
        self.records.pop();
    }

    fn unlink(&mut self, index: usize, full_hash: u32) {
        let bucket = (full_hash & self.mask) as usize;
        let mut offset = self.table[bucket];
        debug_assert_ne!(offset, INVALID);
        let mut previous = INVALID;
        while offset != index as u32 {
            previous = offset;
            offset = self.next[offset as usize];
        }
        if previous != INVALID {
            self.next[previous as usize] = self.next[index];
        } else {
            self.table[bucket] = self.next[index];
        }
    }
}
