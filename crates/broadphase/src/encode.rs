//! A monotonic unsigned encoding of `f32` values.
//!
//! The sweep compares box coordinates constantly, and integer comparison is
//! both cheaper than float comparison and amenable to batching. The encoding
//! below maps every finite float to a `u32` such that
//! `encode(a) < encode(b)` exactly when `a < b`, so sorting and sweeping over
//! encoded coordinates produce results identical to float comparisons.
use crate::aabb::Aabb;

/// Strictly greater than any encoded finite float. Appended to sorted
/// sequences so sweep cursors never run past the end.
pub(crate) const SENTINEL: u32 = u32::MAX;

/// Encode a finite float into the order-preserving unsigned representation.
///
/// Positive values get the sign bit set; negative values are bitwise
/// complemented, which reverses their (descending) unsigned order.
#[inline]
pub(crate) fn encode(value: f32) -> u32 {
    debug_assert!(!value.is_nan());
    // Collapse -0.0 onto +0.0 so the map is monotone, not merely injective.
    let bits = (value + 0.0).to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// An inflated bounding box with encoded coordinates, ready for sweeping.
#[derive(Debug, Copy, Clone)]
pub(crate) struct SortedAabb {
    pub min_x: u32,
    pub min_y: u32,
    pub min_z: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub max_z: u32,
}

impl SortedAabb {
    pub fn from_aabb(b: &Aabb) -> SortedAabb {
        SortedAabb {
            min_x: encode(b.min.x),
            min_y: encode(b.min.y),
            min_z: encode(b.min.z),
            max_x: encode(b.max.x),
            max_y: encode(b.max.y),
            max_z: encode(b.max.z),
        }
    }

    /// The terminal box: its min-X stops any sweep cursor.
    pub const fn sentinel() -> SortedAabb {
        SortedAabb {
            min_x: SENTINEL,
            min_y: SENTINEL,
            min_z: SENTINEL,
            max_x: 0,
            max_y: 0,
            max_z: 0,
        }
    }

    /// Full three-axis interval overlap, used by the brute-force path.
    #[inline]
    pub fn intersects(&self, other: &SortedAabb) -> bool {
        self.min_x <= other.max_x && other.min_x <= self.max_x && self.intersects_yz(other)
    }

    /// Interval overlap on the two axes the sweep itself does not cover.
    #[inline]
    pub fn intersects_yz(&self, other: &SortedAabb) -> bool {
        !(other.max_y < self.min_y
            || self.max_y < other.min_y
            || other.max_z < self.min_z
            || self.max_z < other.min_z)
    }
}
