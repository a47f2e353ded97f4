use serde::{Deserialize, Serialize};

/// An axis-aligned box over the integer lattice of the global simulation
/// domain. `x`/`y`/`z` are the lower corner and `dx`/`dy`/`dz` the extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometricRegion {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub dx: i64,
    pub dy: i64,
    pub dz: i64,
}

impl GeometricRegion {
    pub fn new(x: i64, y: i64, z: i64, dx: i64, dy: i64, dz: i64) -> Self {
        Self {
            x,
            y,
            z,
            dx,
            dy,
            dz,
        }
    }

    pub fn x_end(&self) -> i64 {
        self.x + self.dx
    }

    pub fn y_end(&self) -> i64 {
        self.y + self.dy
    }

    pub fn z_end(&self) -> i64 {
        self.z + self.dz
    }

    /// True when the two boxes share interior volume.
    pub fn intersects(&self, other: &GeometricRegion) -> bool {
        self.x < other.x_end()
            && other.x < self.x_end()
            && self.y < other.y_end()
            && other.y < self.y_end()
            && self.z < other.z_end()
            && other.z < self.z_end()
    }

    /// True when `other` lies entirely within this box.
    pub fn covers(&self, other: &GeometricRegion) -> bool {
        self.x <= other.x
            && other.x_end() <= self.x_end()
            && self.y <= other.y
            && other.y_end() <= self.y_end()
            && self.z <= other.z
            && other.z_end() <= self.z_end()
    }

    /// True when the boxes touch, sharing at least a face, edge, or corner.
    /// Overlapping boxes are adjacent as well.
    pub fn adjacent_or_intersects(&self, other: &GeometricRegion) -> bool {
        self.x <= other.x_end()
            && other.x <= self.x_end()
            && self.y <= other.y_end()
            && other.y <= self.y_end()
            && self.z <= other.z_end()
            && other.z <= self.z_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects() {
        let a = GeometricRegion::new(0, 0, 0, 10, 10, 10);
        let b = GeometricRegion::new(5, 5, 5, 10, 10, 10);
        let c = GeometricRegion::new(10, 0, 0, 5, 5, 5);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_covers() {
        let a = GeometricRegion::new(0, 0, 0, 10, 10, 10);
        let b = GeometricRegion::new(2, 2, 2, 4, 4, 4);
        assert!(a.covers(&b));
        assert!(!b.covers(&a));
        assert!(a.covers(&a));
    }

    #[test]
    fn test_adjacency_includes_shared_faces() {
        let a = GeometricRegion::new(0, 0, 0, 10, 10, 10);
        let c = GeometricRegion::new(10, 0, 0, 5, 5, 5);
        let d = GeometricRegion::new(11, 0, 0, 5, 5, 5);
        assert!(a.adjacent_or_intersects(&c));
        assert!(!a.adjacent_or_intersects(&d));
    }
}
