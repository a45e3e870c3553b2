//! The shared bounds registry.
//!
//! Bounds live in dense arrays keyed by an externally chosen [`BoundsIndex`].
//! The registry also records each index's ownership classification and the
//! per-step added/updated/removed maps that drive the pipeline. The arrays
//! are written only during the single-threaded mutation phase; the parallel
//! stages read them through shared slices.
use crate::aabb::Aabb;
use crate::aggregate::AggregateHandle;
use crate::bitmap::BitMap;
use crate::errors::{Error, Result};
use crate::filter::FilterGroup;

/// Opaque dense index of a registered volume. Chosen by the caller; indices
/// should be kept reasonably dense since they key dense arrays.
pub type BoundsIndex = u32;

/// Which of the three classifications currently owns a bounds index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum VolumeOwner {
    /// Not registered.
    Vacant,
    /// An independent volume, managed directly by the flat broad-phase.
    Single,
    /// A member of exactly one aggregate; invisible to the flat broad-phase.
    Aggregated(AggregateHandle),
    /// The merged volume standing in for an entire aggregate.
    Aggregate(AggregateHandle),
}

#[derive(Debug)]
struct VolumeData<U> {
    owner: VolumeOwner,
    user_data: Option<U>,
}

impl<U> Default for VolumeData<U> {
    fn default() -> Self {
        VolumeData {
            owner: VolumeOwner::Vacant,
            user_data: None,
        }
    }
}

pub(crate) struct Registry<U> {
    pub bounds: Vec<Aabb>,
    pub margins: Vec<f32>,
    pub groups: Vec<FilterGroup>,
    volumes: Vec<VolumeData<U>>,
    /// Top-level indices entering the flat broad-phase this step.
    pub added: BitMap,
    /// Indices whose bounds or margin changed this step.
    pub updated: BitMap,
    /// Top-level indices leaving the flat broad-phase this step.
    pub removed: BitMap,
}

impl<U: Copy> Registry<U> {
    pub fn new() -> Registry<U> {
        Registry {
            bounds: Vec::new(),
            margins: Vec::new(),
            groups: Vec::new(),
            volumes: Vec::new(),
            added: BitMap::new(),
            updated: BitMap::new(),
            removed: BitMap::new(),
        }
    }

    /// Grow the dense arrays to hold `index`. Capacity advances in powers of
    /// two so repeated single insertions don't reallocate every time.
    pub fn reserve(&mut self, index: BoundsIndex) {
        let needed = index as usize + 1;
        if needed <= self.volumes.len() {
            return;
        }
        let capacity = needed.next_power_of_two();
        self.bounds.resize(capacity, Aabb::EMPTY);
        self.margins.resize(capacity, 0.0);
        self.groups.resize(capacity, FilterGroup::INVALID);
        self.volumes.resize_with(capacity, VolumeData::default);
    }

    pub fn init_entry(
        &mut self,
        index: BoundsIndex,
        bounds: Aabb,
        margin: f32,
        group: FilterGroup,
        user_data: U,
        owner: VolumeOwner,
    ) -> Result<()> {
        self.reserve(index);
        let slot = &mut self.volumes[index as usize];
        if slot.owner != VolumeOwner::Vacant {
            return Err(Error::BoundsIndexInUse(index));
        }
        slot.owner = owner;
        slot.user_data = Some(user_data);
        self.bounds[index as usize] = bounds;
        self.margins[index as usize] = margin;
        self.groups[index as usize] = group;
        Ok(())
    }

    /// Forget everything about `index`; its group becomes invalid so stale
    /// persistent pairs referencing it tear themselves down. The payload is
    /// deliberately left in place: destroyed events emitted later in the
    /// same step still resolve it. It is overwritten when the slot is
    /// reused.
    pub fn reset_entry(&mut self, index: BoundsIndex) {
        self.volumes[index as usize].owner = VolumeOwner::Vacant;
        self.bounds[index as usize] = Aabb::EMPTY;
        self.margins[index as usize] = 0.0;
        self.groups[index as usize] = FilterGroup::INVALID;
    }

    pub fn owner(&self, index: BoundsIndex) -> VolumeOwner {
        self.volumes
            .get(index as usize)
            .map(|v| v.owner)
            .unwrap_or(VolumeOwner::Vacant)
    }

    pub fn set_owner(&mut self, index: BoundsIndex, owner: VolumeOwner) {
        self.volumes[index as usize].owner = owner;
    }

    pub fn user_data(&self, index: BoundsIndex) -> Option<U> {
        self.volumes
            .get(index as usize)
            .and_then(|v| v.user_data)
    }

    pub fn is_registered(&self, index: BoundsIndex) -> bool {
        self.owner(index) != VolumeOwner::Vacant
    }

    pub fn set_bounds(&mut self, index: BoundsIndex, bounds: Aabb) -> Result<()> {
        if !self.is_registered(index) {
            return Err(Error::UnknownBoundsIndex(index));
        }
        self.bounds[index as usize] = bounds;
        self.updated.set(index);
        Ok(())
    }

    pub fn set_margin(&mut self, index: BoundsIndex, margin: f32) -> Result<()> {
        if !self.is_registered(index) {
            return Err(Error::UnknownBoundsIndex(index));
        }
        self.margins[index as usize] = margin.max(0.0);
        self.updated.set(index);
        Ok(())
    }

    /// Schedule a top-level index for flat broad-phase insertion. An index
    /// removed earlier in the same step is simply revived as an update.
    pub fn add_flat_entry(&mut self, index: BoundsIndex) {
        if self.removed.test(index) {
            self.removed.reset(index);
            self.updated.set(index);
        } else {
            self.added.set(index);
        }
    }

    /// Schedule a top-level index for flat broad-phase removal. An index
    /// added earlier in the same step just has the insertion reverted.
    pub fn remove_flat_entry(&mut self, index: BoundsIndex) {
        if self.added.test(index) {
            self.added.reset(index);
        } else {
            self.removed.set(index);
        }
    }
}
