use crate::physics::math::{Scalar, Vector};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3d {
    pub min: Vector,
    pub max: Vector,
}

impl Aabb3d {
    pub fn new(min: Vector, max: Vector) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, padded by a fraction of its extent
    pub fn enclosing(points: impl IntoIterator<Item = Vector>, padding_factor: Scalar) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        let padding = (max - min) * padding_factor;
        Some(Self::new(min - padding, max + padding))
    }

    #[inline]
    pub fn center(&self) -> Vector {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vector {
        self.max - self.min
    }

    /// Squared distance from `point` to the closest point of the box (0 inside)
    #[inline]
    pub fn distance_squared_to(&self, point: Vector) -> Scalar {
        let clamped = point.clamp(self.min, self.max);
        (point - clamped).length_squared()
    }

    /// Child box for the octant index produced by [`Aabb3d::octant_of`]
    pub fn octant(&self, index: usize) -> Aabb3d {
        let center = self.center();
        let pick = |bit: usize, lo: Scalar, mid: Scalar, hi: Scalar| {
            if index & bit == 0 { (lo, mid) } else { (mid, hi) }
        };
        let (x0, x1) = pick(1, self.min.x, center.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, center.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, center.z, self.max.z);
        Aabb3d::new(Vector::new(x0, y0, z0), Vector::new(x1, y1, z1))
    }

    #[inline]
    pub fn octant_of(&self, point: Vector) -> usize {
        let center = self.center();
        ((point.x > center.x) as usize)
            | (((point.y > center.y) as usize) << 1)
            | (((point.z > center.z) as usize) << 2)
    }
}
