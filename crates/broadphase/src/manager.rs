//! The orchestrator: owns the registry, the aggregates, and every persistent
//! pair, and drives the per-step pipeline.
//!
//! A step runs in fixed stages. Registry mutations happen between steps,
//! single-threaded. `step_update` then recomputes dirty aggregate bounds in
//! parallel, hands the top-level volumes to the flat broad-phase, routes its
//! created/deleted pairs, refreshes every persistent pair in parallel batches
//! and finally reconciles the per-task event buffers into the returned lists.
//!
//! During the parallel refresh the registry arrays and the aggregate slab are
//! read-only. The only shared mutable state is the three pair maps, and only
//! their structural mutation (erasing a dead pair) takes a lock; the sweeps
//! themselves run lock-free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::*;
use rayon::prelude::*;
use slab::Slab;

use crate::aabb::Aabb;
use crate::aggregate::{Aggregate, AggregateHandle};
use crate::errors::{Error, Result};
use crate::events::{EventBuffer, IndexPair, Overlap, StepEvents};
use crate::filter::{FilterGroup, FilterKind, FilterLut, PairFilteringMode};
use crate::flat::{FlatBroadPhase, FlatInput};
use crate::pairs::{PairSources, PersistentPair, RefreshContext};
use crate::registry::{BoundsIndex, Registry, VolumeOwner};
use crate::sweep::SweepMode;

/// Persistent pairs refreshed per parallel task.
const REFRESH_BATCH: usize = 16;

/// A poisoned lock only means another task panicked mid-refresh; the guarded
/// maps are still structurally sound, so recover the guard.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empty `buffer`, keeping its allocation when the last step filled at least
/// half of it and releasing it otherwise.
fn reset_or_clear<T>(buffer: &mut Vec<T>) {
    if buffer.len() * 2 >= buffer.capacity() {
        buffer.clear();
    } else {
        *buffer = Vec::new();
    }
}

/// Per-step index lists handed to the flat broad-phase, reused across steps
/// through [`reset_or_clear`].
#[derive(Default)]
struct StepScratch {
    added: Vec<BoundsIndex>,
    updated: Vec<BoundsIndex>,
    removed: Vec<BoundsIndex>,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum participating members per aggregate; extra members wait in
    /// overflow.
    pub aggregate_capacity: usize,
    pub sweep_mode: SweepMode,
    pub kinematic_kinematic: PairFilteringMode,
    pub static_kinematic: PairFilteringMode,
}

impl Default for ManagerConfig {
    fn default() -> ManagerConfig {
        ManagerConfig {
            aggregate_capacity: 128,
            sweep_mode: SweepMode::Prune,
            kinematic_kinematic: PairFilteringMode::Keep,
            static_kinematic: PairFilteringMode::Keep,
        }
    }
}

type PairCell = Arc<Mutex<PersistentPair>>;

/// Where a snapshot entry lives, so a dead pair can be erased from its map.
#[derive(Debug, Copy, Clone)]
enum PairSlot {
    ActorAggregate(IndexPair),
    AggregateAggregate(IndexPair),
    SelfCollision(u32),
}

pub struct AabbManager<U, B> {
    registry: Registry<U>,
    aggregates: Slab<Aggregate>,
    actor_aggregate: Mutex<HashMap<IndexPair, PairCell>>,
    aggregate_aggregate: Mutex<HashMap<IndexPair, PairCell>>,
    /// Self-collision pairs, keyed by aggregate slab slot.
    self_collision: Mutex<HashMap<u32, PairCell>>,
    flat: B,
    lut: FilterLut,
    config: ManagerConfig,
    timestamp: u32,
    /// Source of unique filter groups for aggregate volumes.
    group_tide: u32,
    /// Destroyed events recorded between steps (aggregate teardown); drained
    /// into the next step's output.
    pending: EventBuffer,
    scratch: StepScratch,
}

impl<U: Copy, B: FlatBroadPhase> AabbManager<U, B> {
    pub fn new(flat: B) -> AabbManager<U, B> {
        AabbManager::with_config(flat, ManagerConfig::default())
    }

    pub fn with_config(flat: B, config: ManagerConfig) -> AabbManager<U, B> {
        AabbManager {
            registry: Registry::new(),
            aggregates: Slab::new(),
            actor_aggregate: Mutex::new(HashMap::new()),
            aggregate_aggregate: Mutex::new(HashMap::new()),
            self_collision: Mutex::new(HashMap::new()),
            flat,
            lut: FilterLut::new(config.kinematic_kinematic, config.static_kinematic),
            config,
            timestamp: 0,
            group_tide: 0,
            pending: EventBuffer::new(),
            scratch: StepScratch::default(),
        }
    }

    /// Register a volume. With an aggregate handle the volume becomes a
    /// member of that aggregate; the aggregate enters the flat broad-phase
    /// once it gains its first member. Without one the volume is a single,
    /// registered with the flat broad-phase directly.
    pub fn add_bounds(
        &mut self,
        index: BoundsIndex,
        bounds: Aabb,
        margin: f32,
        group: FilterGroup,
        user_data: U,
        aggregate: Option<AggregateHandle>,
    ) -> Result<()> {
        match aggregate {
            None => {
                self.registry.init_entry(
                    index,
                    bounds,
                    margin.max(0.0),
                    group,
                    user_data,
                    VolumeOwner::Single,
                )?;
                self.registry.add_flat_entry(index);
            }
            Some(handle) => {
                let key = handle.0 as usize;
                if !self.aggregates.contains(key) {
                    return Err(Error::InvalidAggregateHandle(handle));
                }
                self.registry.init_entry(
                    index,
                    bounds,
                    margin.max(0.0),
                    group,
                    user_data,
                    VolumeOwner::Aggregated(handle),
                )?;
                let agg = &mut self.aggregates[key];
                let was_empty = agg.len() == 0;
                agg.add_member(index);
                let bp_index = agg.bp_index;
                let self_collisions = agg.self_collisions;
                let now_non_empty = agg.len() > 0;
                if was_empty && now_non_empty {
                    self.registry.add_flat_entry(bp_index);
                }
                if self_collisions {
                    self.ensure_self_pair(handle, bp_index);
                }
            }
        }
        Ok(())
    }

    /// Unregister a volume. Removing an aggregate's last member withdraws
    /// the aggregate's own volume from the flat broad-phase, as if deleted.
    pub fn remove_bounds(&mut self, index: BoundsIndex) -> Result<()> {
        match self.registry.owner(index) {
            VolumeOwner::Vacant => Err(Error::UnknownBoundsIndex(index)),
            VolumeOwner::Single => {
                self.registry.remove_flat_entry(index);
                self.registry.reset_entry(index);
                Ok(())
            }
            VolumeOwner::Aggregated(handle) => {
                let agg = &mut self.aggregates[handle.0 as usize];
                agg.remove_member(index);
                let bp_index = agg.bp_index;
                if agg.is_empty() {
                    self.registry.remove_flat_entry(bp_index);
                }
                self.registry.reset_entry(index);
                Ok(())
            }
            VolumeOwner::Aggregate(_) => Err(Error::BoundsIndexIsAggregate(index)),
        }
    }

    pub fn set_bounds(&mut self, index: BoundsIndex, bounds: Aabb) -> Result<()> {
        if let VolumeOwner::Aggregate(_) = self.registry.owner(index) {
            return Err(Error::BoundsIndexIsAggregate(index));
        }
        self.registry.set_bounds(index, bounds)?;
        self.mark_owner_dirty(index);
        Ok(())
    }

    pub fn set_margin(&mut self, index: BoundsIndex, margin: f32) -> Result<()> {
        if let VolumeOwner::Aggregate(_) = self.registry.owner(index) {
            return Err(Error::BoundsIndexIsAggregate(index));
        }
        self.registry.set_margin(index, margin)?;
        self.mark_owner_dirty(index);
        Ok(())
    }

    /// Create an empty aggregate whose merged volume will live at `index`.
    /// It does not enter the flat broad-phase until it has a member.
    pub fn create_aggregate(
        &mut self,
        index: BoundsIndex,
        user_data: U,
        self_collisions: bool,
    ) -> Result<AggregateHandle> {
        let key = self.aggregates.insert(Aggregate::new(
            index,
            self_collisions,
            self.config.aggregate_capacity,
        ));
        let handle = AggregateHandle(key as u32);
        let group = FilterGroup::new(self.group_tide, FilterKind::Aggregate);
        match self.registry.init_entry(
            index,
            Aabb::EMPTY,
            0.0,
            group,
            user_data,
            VolumeOwner::Aggregate(handle),
        ) {
            Ok(()) => {
                self.group_tide += 1;
                Ok(handle)
            }
            Err(e) => {
                self.aggregates.remove(key);
                Err(e)
            }
        }
    }

    /// Destroy an aggregate. It must have no members left; pending sub-pair
    /// teardown events surface in the next step's destroyed list.
    pub fn destroy_aggregate(&mut self, handle: AggregateHandle) -> Result<()> {
        let key = handle.0 as usize;
        let agg = match self.aggregates.get(key) {
            Some(agg) => agg,
            None => return Err(Error::InvalidAggregateHandle(handle)),
        };
        if !agg.is_empty() {
            return Err(Error::AggregateNotEmpty {
                handle,
                members: agg.total_len(),
            });
        }
        let bp_index = agg.bp_index;
        if let Some(cell) = lock(&self.self_collision).remove(&handle.0) {
            lock(&cell).dump_destroyed(&mut self.pending);
        }
        self.registry.reset_entry(bp_index);
        self.aggregates.remove(key);
        Ok(())
    }

    /// Run one pipeline step and return the overlap changes since the
    /// previous step.
    pub fn step_update(&mut self) -> StepEvents<U> {
        self.timestamp = self.timestamp.wrapping_add(1);
        let timestamp = self.timestamp;

        // Recompute dirty aggregates in parallel. Keys are distinct, so the
        // mutable references are disjoint.
        let dirty: Vec<usize> = self
            .aggregates
            .iter()
            .filter(|(_, a)| a.dirty_bounds && !a.is_empty())
            .map(|(k, _)| k)
            .collect();
        {
            let aggregates = &mut self.aggregates;
            let refs: Vec<&mut Aggregate> = dirty
                .iter()
                .map(|&k| unsafe { &mut *(&mut aggregates[k] as *mut Aggregate) })
                .collect();
            let bounds = &self.registry.bounds;
            let margins = &self.registry.margins;
            let merged: Vec<(BoundsIndex, Aabb)> = refs
                .into_par_iter()
                .map(|agg| {
                    let merged = agg.compute_bounds(bounds, margins);
                    agg.sort_bounds();
                    agg.changed_this_step = true;
                    (agg.bp_index, merged)
                })
                .collect();
            for (index, merged) in merged {
                self.registry.bounds[index as usize] = merged;
                self.registry.updated.set(index);
            }
        }

        debug!(
            "step {}: recomputed {} dirty aggregate bounds",
            timestamp,
            dirty.len()
        );

        // Hand the top-level volumes to the flat broad-phase. The updated
        // set must not name members or indices it is only now adding.
        let registry = &self.registry;
        let scratch = &mut self.scratch;
        scratch.added.extend(registry.added.iter());
        scratch.removed.extend(registry.removed.iter());
        scratch.updated.extend(registry.updated.iter().filter(|&i| {
            !registry.added.test(i)
                && matches!(
                    registry.owner(i),
                    VolumeOwner::Single | VolumeOwner::Aggregate(_)
                )
        }));
        let results = self.flat.update(&FlatInput {
            added: &scratch.added,
            updated: &scratch.updated,
            removed: &scratch.removed,
            bounds: &registry.bounds,
            margins: &registry.margins,
            groups: &registry.groups,
            lut: &self.lut,
        });
        debug!(
            "step {}: flat broad-phase reported {} created and {} deleted top-level pairs",
            timestamp,
            results.created.len(),
            results.deleted.len()
        );

        let mut events = std::mem::take(&mut self.pending);

        // Deleted top-level pairs are routed before the refresh stage so the
        // refresh tears the marked pairs down.
        for &(a, b) in &results.deleted {
            let key = canonical(a, b);
            if let Some(cell) = lock(&self.actor_aggregate).get(&key).cloned() {
                lock(&cell).mark_for_deletion();
            } else if let Some(cell) = lock(&self.aggregate_aggregate).get(&key).cloned() {
                lock(&cell).mark_for_deletion();
            } else {
                // A pair of singles is itself the overlap.
                events.push_destroyed(key);
            }
        }

        let ctx = RefreshContext {
            aggregates: &self.aggregates,
            bounds: &self.registry.bounds,
            margins: &self.registry.margins,
            groups: &self.registry.groups,
            updated: &self.registry.updated,
            lut: &self.lut,
            mode: self.config.sweep_mode,
            timestamp,
        };

        // Parallel refresh of every persistent pair, in deterministic batch
        // order. Dead pairs are erased from their map under its lock.
        let snapshot = self.snapshot_pairs();
        let actor_map = &self.actor_aggregate;
        let aggregate_map = &self.aggregate_aggregate;
        let self_map = &self.self_collision;
        let buffers: Vec<EventBuffer> = snapshot
            .par_chunks(REFRESH_BATCH)
            .map(|chunk| {
                let mut buf = EventBuffer::new();
                for (slot, cell) in chunk {
                    if lock(cell).refresh(&ctx, false, &mut buf) {
                        match *slot {
                            PairSlot::ActorAggregate(key) => {
                                lock(actor_map).remove(&key);
                            }
                            PairSlot::AggregateAggregate(key) => {
                                lock(aggregate_map).remove(&key);
                            }
                            PairSlot::SelfCollision(key) => {
                                lock(self_map).remove(&key);
                            }
                        }
                    }
                }
                buf
            })
            .collect();
        for buf in buffers {
            events.merge(buf);
        }
        debug!(
            "step {}: refreshed {} persistent pairs",
            timestamp,
            snapshot.len()
        );

        // Created top-level pairs spawn persistent pairs, swept immediately
        // so their first overlaps surface this step.
        for &(a, b) in &results.created {
            let key = canonical(a, b);
            let sources = match (self.registry.owner(a), self.registry.owner(b)) {
                (VolumeOwner::Single, VolumeOwner::Single) => {
                    events.push_created(key);
                    continue;
                }
                (VolumeOwner::Aggregate(h), VolumeOwner::Single) => PairSources::ActorAggregate {
                    actor: b,
                    aggregate: h,
                    aggregate_index: a,
                },
                (VolumeOwner::Single, VolumeOwner::Aggregate(h)) => PairSources::ActorAggregate {
                    actor: a,
                    aggregate: h,
                    aggregate_index: b,
                },
                (VolumeOwner::Aggregate(h0), VolumeOwner::Aggregate(h1)) => {
                    PairSources::AggregateAggregate {
                        aggregate0: h0,
                        index0: a,
                        aggregate1: h1,
                        index1: b,
                    }
                }
                _ => {
                    warn!(
                        "created top-level pair ({}, {}) involves a non-top-level volume; ignored",
                        a, b
                    );
                    continue;
                }
            };
            let cell: PairCell = Arc::new(Mutex::new(PersistentPair::new(sources)));
            let dead = lock(&cell).refresh(&ctx, true, &mut events);
            if !dead {
                match sources {
                    PairSources::ActorAggregate { .. } => {
                        lock(&self.actor_aggregate).insert(key, cell);
                    }
                    PairSources::AggregateAggregate { .. } => {
                        lock(&self.aggregate_aggregate).insert(key, cell);
                    }
                    // Self pairs are owned per aggregate, never spawned here.
                    PairSources::SelfCollision { .. } => {}
                }
            }
        }

        events.reconcile();

        let mut out = StepEvents {
            created: self.resolve(&events.created),
            destroyed: self.resolve(&events.destroyed),
            out_of_bounds: Vec::new(),
            out_of_bounds_aggregates: Vec::new(),
        };

        for &index in &results.out_of_bounds {
            if self.registry.removed.test(index) {
                continue;
            }
            match self.registry.owner(index) {
                VolumeOwner::Single => {
                    if let Some(data) = self.registry.user_data(index) {
                        out.out_of_bounds.push(data);
                    }
                }
                VolumeOwner::Aggregate(_) => {
                    if let Some(data) = self.registry.user_data(index) {
                        out.out_of_bounds_aggregates.push(data);
                    }
                }
                _ => {}
            }
        }

        for &key in &dirty {
            if let Some(agg) = self.aggregates.get_mut(key) {
                agg.changed_this_step = false;
            }
        }
        self.registry.added.clear();
        self.registry.updated.clear();
        self.registry.removed.clear();
        reset_or_clear(&mut self.scratch.added);
        reset_or_clear(&mut self.scratch.updated);
        reset_or_clear(&mut self.scratch.removed);
        out
    }

    fn mark_owner_dirty(&mut self, index: BoundsIndex) {
        if let VolumeOwner::Aggregated(handle) = self.registry.owner(index) {
            self.aggregates[handle.0 as usize].dirty_bounds = true;
        }
    }

    fn ensure_self_pair(&mut self, handle: AggregateHandle, bp_index: BoundsIndex) {
        lock(&self.self_collision)
            .entry(handle.0)
            .or_insert_with(|| {
                Arc::new(Mutex::new(PersistentPair::new(PairSources::SelfCollision {
                    aggregate: handle,
                    index: bp_index,
                })))
            });
    }

    /// All live persistent pairs in a stable order, so batch boundaries and
    /// event buffer order are reproducible from run to run.
    fn snapshot_pairs(&self) -> Vec<(PairSlot, PairCell)> {
        let mut snapshot = Vec::new();
        {
            let map = lock(&self.actor_aggregate);
            let mut entries: Vec<(IndexPair, PairCell)> =
                map.iter().map(|(&k, v)| (k, Arc::clone(v))).collect();
            entries.sort_unstable_by_key(|&(k, _)| k);
            snapshot.extend(
                entries
                    .into_iter()
                    .map(|(k, v)| (PairSlot::ActorAggregate(k), v)),
            );
        }
        {
            let map = lock(&self.aggregate_aggregate);
            let mut entries: Vec<(IndexPair, PairCell)> =
                map.iter().map(|(&k, v)| (k, Arc::clone(v))).collect();
            entries.sort_unstable_by_key(|&(k, _)| k);
            snapshot.extend(
                entries
                    .into_iter()
                    .map(|(k, v)| (PairSlot::AggregateAggregate(k), v)),
            );
        }
        {
            let map = lock(&self.self_collision);
            let mut entries: Vec<(u32, PairCell)> =
                map.iter().map(|(&k, v)| (k, Arc::clone(v))).collect();
            entries.sort_unstable_by_key(|&(k, _)| k);
            snapshot.extend(
                entries
                    .into_iter()
                    .map(|(k, v)| (PairSlot::SelfCollision(k), v)),
            );
        }
        snapshot
    }

    fn resolve(&self, pairs: &[IndexPair]) -> Vec<Overlap<U>> {
        pairs
            .iter()
            .filter_map(|&(a, b)| {
                match (self.registry.user_data(a), self.registry.user_data(b)) {
                    (Some(data0), Some(data1)) => Some(Overlap {
                        index0: a,
                        index1: b,
                        data0,
                        data1,
                    }),
                    _ => {
                        warn!("overlap event names unknown bounds indices ({}, {})", a, b);
                        None
                    }
                }
            })
            .collect()
    }
}

fn canonical(a: BoundsIndex, b: BoundsIndex) -> IndexPair {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}
