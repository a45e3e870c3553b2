//! Axis-aligned bounding boxes in three dimensions.
use crate::errors::AabbError;

/// A point or extent in 3-space.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct V3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl V3 {
    pub const fn new(x: f32, y: f32, z: f32) -> V3 {
        V3 { x, y, z }
    }

    pub const fn splat(v: f32) -> V3 {
        V3 { x: v, y: v, z: v }
    }

    pub fn min(self, other: V3) -> V3 {
        V3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: V3) -> V3 {
        V3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Add<V3> for V3 {
    type Output = V3;
    fn add(self, rhs: V3) -> V3 {
        V3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub<V3> for V3 {
    type Output = V3;
    fn sub(self, rhs: V3) -> V3 {
        V3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// An axis-aligned bounding box given by its minimum and maximum corners.
///
/// Boxes built through [`Aabb::new`] always satisfy `min <= max` on every
/// axis with finite coordinates. The one exception is [`Aabb::EMPTY`], the
/// inverted box used as the neutral element for merging; it intersects
/// nothing and is never handed to the sweep.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: V3,
    pub max: V3,
}

impl Aabb {
    /// The inverted, empty box. `merge(EMPTY, b) == b` for any box `b`.
    pub const EMPTY: Aabb = Aabb {
        min: V3::splat(f32::MAX),
        max: V3::splat(f32::MIN),
    };

    pub fn new(min: V3, max: V3) -> Result<Aabb, AabbError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(AabbError::NonFinite);
        }
        if min.x > max.x || min.y > max.y || min.z > max.z {
            return Err(AabbError::InvalidExtents);
        }
        Ok(Aabb { min, max })
    }

    /// The box grown symmetrically by `margin` on every axis.
    pub fn inflate(&self, margin: f32) -> Aabb {
        let offset = V3::splat(margin);
        Aabb {
            min: self.min - offset,
            max: self.max + offset,
        }
    }

    /// The smallest box containing both operands.
    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Interval-overlap test on all three axes. Touching boxes intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        !(other.max.x < self.min.x
            || self.max.x < other.min.x
            || other.max.y < self.min.y
            || self.max.y < other.min.y
            || other.max.z < self.min.z
            || self.max.z < other.min.z)
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
            && other.max.z <= self.max.z
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }
}
