//! Overlap event collection.
//!
//! During the parallel refresh stages every task records events into its own
//! [`EventBuffer`]; the buffers are merged single-threaded afterwards, so the
//! event lists are never shared mutable state. Reconciliation then drops the
//! destroyed entries that are mere artifacts of a top-level pair breaking and
//! reforming within the same step.

use std::collections::HashSet;

use crate::registry::BoundsIndex;

/// A canonicalized unordered pair of bounds indices, smaller index first.
pub(crate) type IndexPair = (BoundsIndex, BoundsIndex);

/// Per-task scratch for created/destroyed sub-pair events.
#[derive(Debug, Default)]
pub(crate) struct EventBuffer {
    pub created: Vec<IndexPair>,
    pub destroyed: Vec<IndexPair>,
}

impl EventBuffer {
    pub fn new() -> EventBuffer {
        EventBuffer::default()
    }

    pub fn push_created(&mut self, pair: IndexPair) {
        debug_assert!(pair.0 <= pair.1);
        self.created.push(pair);
    }

    pub fn push_destroyed(&mut self, pair: IndexPair) {
        debug_assert!(pair.0 <= pair.1);
        self.destroyed.push(pair);
    }

    pub fn merge(&mut self, other: EventBuffer) {
        self.created.extend(other.created);
        self.destroyed.extend(other.destroyed);
    }

    /// Drop destroyed entries whose pair was also created this step. Such a
    /// pair went through a tear-down-and-recreate cycle of its owning
    /// top-level pair; the overlap itself never ended.
    pub fn reconcile(&mut self) {
        if self.created.is_empty() || self.destroyed.is_empty() {
            return;
        }
        let created: HashSet<IndexPair> = self.created.iter().copied().collect();
        self.destroyed.retain(|p| !created.contains(p));
    }
}

/// A reported overlap between two volumes, carrying their payloads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overlap<U> {
    pub index0: BoundsIndex,
    pub index1: BoundsIndex,
    pub data0: U,
    pub data1: U,
}

/// Everything one pipeline step reports back to the caller.
#[derive(Debug)]
pub struct StepEvents<U> {
    /// Pairs overlapping now that were not overlapping last step.
    pub created: Vec<Overlap<U>>,
    /// Pairs overlapping last step that are not overlapping now.
    pub destroyed: Vec<Overlap<U>>,
    /// Payloads of single volumes that left the valid world range.
    pub out_of_bounds: Vec<U>,
    /// Payloads of aggregates that left the valid world range.
    pub out_of_bounds_aggregates: Vec<U>,
}

impl<U> Default for StepEvents<U> {
    fn default() -> Self {
        StepEvents {
            created: Vec::new(),
            destroyed: Vec::new(),
            out_of_bounds: Vec::new(),
            out_of_bounds_aggregates: Vec::new(),
        }
    }
}
