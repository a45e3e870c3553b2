use crate::aggregate::AggregateHandle;
use crate::registry::BoundsIndex;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AabbError {
    #[error("bounding box must satisfy min <= max on every axis")]
    InvalidExtents,

    #[error("bounding box coordinates must be finite")]
    NonFinite,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Aabb error: {}", _0)]
    Aabb(#[from] AabbError),

    #[error("aggregate handle {0:?} does not exist or was already destroyed")]
    InvalidAggregateHandle(AggregateHandle),

    #[error("aggregate {handle:?} still owns {members} member bounds and cannot be destroyed")]
    AggregateNotEmpty {
        handle: AggregateHandle,
        members: usize,
    },

    #[error("bounds index {0} is already registered")]
    BoundsIndexInUse(BoundsIndex),

    #[error("bounds index {0} is not registered")]
    UnknownBoundsIndex(BoundsIndex),

    #[error("bounds index {0} is an aggregate's own volume; destroy the aggregate instead")]
    BoundsIndexIsAggregate(BoundsIndex),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
