//! An incremental broad-phase overlap maintenance engine.
//!
//! Once per simulation step, [`AabbManager::step_update`] decides which pairs
//! of bounding volumes are close enough to deserve narrow-phase attention and
//! reports only the changes since the previous step: newly overlapping pairs
//! and newly separated ones. Volumes can be registered individually or
//! grouped into [aggregates](AabbManager::create_aggregate), which enter the
//! lower-level flat broad-phase as a single merged box and have their member
//! overlaps maintained incrementally through persistent pairs.
//!
//! The flat broad-phase itself is pluggable through [`FlatBroadPhase`];
//! [`BruteForceBroadPhase`] is the bundled reference engine.
mod aabb;
mod aggregate;
mod bitmap;
mod encode;
mod errors;
mod events;
mod filter;
mod flat;
mod manager;
mod pairs;
mod radix;
mod registry;
mod sweep;

pub use aabb::{Aabb, V3};
pub use aggregate::AggregateHandle;
pub use errors::{AabbError, Error, Result};
pub use events::{Overlap, StepEvents};
pub use filter::{FilterGroup, FilterKind, FilterLut, PairFilteringMode};
pub use flat::{BruteForceBroadPhase, FlatBroadPhase, FlatInput, FlatResults};
pub use manager::{AabbManager, ManagerConfig};
pub use registry::BoundsIndex;
pub use sweep::SweepMode;
