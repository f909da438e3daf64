//! Aegis Geometry - Feature Geometries and Bounding Boxes
//!
//! Minimal geometry model for spatially indexed features. The spatial
//! index never stores geometries; it stores the single-precision bounding
//! box of each one, inflated outward by one unit in the last place on
//! every side so that a point lying exactly on a query boundary is not
//! lost to float rounding.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};

// =============================================================================
// Geometry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    /// Only the exterior ring contributes to the bounding box.
    Polygon {
        exterior: Vec<Coord>,
        interiors: Vec<Vec<Coord>>,
    },
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point(Coord::xy(x, y))
    }

    fn coords(&self) -> &[Coord] {
        match self {
            Geometry::Point(c) => std::slice::from_ref(c),
            Geometry::LineString(coords) => coords,
            Geometry::Polygon { exterior, .. } => exterior,
        }
    }

    /// Bounding box in single precision, inflated by one ULP.
    /// `None` for empty geometries.
    pub fn bbox(&self) -> Option<Bbox> {
        let coords = self.coords();
        let first = coords.first()?;
        let mut min = [first.x, first.y];
        let mut max = min;
        let mut z_range = first.z.map(|z| (z, z));

        for c in &coords[1..] {
            min[0] = min[0].min(c.x);
            min[1] = min[1].min(c.y);
            max[0] = max[0].max(c.x);
            max[1] = max[1].max(c.y);
            if let Some(z) = c.z {
                z_range = Some(match z_range {
                    Some((lo, hi)) => (lo.min(z), hi.max(z)),
                    None => (z, z),
                });
            }
        }

        Some(Bbox {
            min_x: next_down(min[0] as f32),
            min_y: next_down(min[1] as f32),
            max_x: next_up(max[0] as f32),
            max_y: next_up(max[1] as f32),
            z: z_range.map(|(lo, hi)| (next_down(lo as f32), next_up(hi as f32))),
        })
    }
}

// =============================================================================
// Bounding Box
// =============================================================================

/// Axis-aligned box with inclusive bounds; `z` is absent for 2D boxes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub z: Option<(f32, f32)>,
}

impl Bbox {
    /// 2D query region. Not inflated.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x as f32,
            min_y: min_y as f32,
            max_x: max_x as f32,
            max_y: max_y as f32,
            z: None,
        }
    }

    /// Inclusive intersection; z is only compared when both boxes have it.
    pub fn intersects(&self, other: &Bbox) -> bool {
        let xy = self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y;
        match (self.z, other.z) {
            (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => xy && a_lo <= b_hi && b_lo <= a_hi,
            _ => xy,
        }
    }

    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
            z: match (self.z, other.z) {
                (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => Some((a_lo.min(b_lo), a_hi.max(b_hi))),
                (a, b) => a.or(b),
            },
        }
    }
}

// =============================================================================
// ULP Helpers
// =============================================================================

/// Smallest f32 greater than `x`.
pub fn next_up(x: f32) -> f32 {
    if x.is_nan() || x == f32::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f32::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f32::from_bits(bits + 1)
    } else {
        f32::from_bits(bits - 1)
    }
}

/// Largest f32 less than `x`.
pub fn next_down(x: f32) -> f32 {
    -next_up(-x)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulp_helpers() {
        assert!(next_up(1.0) > 1.0);
        assert!(next_down(1.0) < 1.0);
        assert!(next_up(-1.0) > -1.0);
        assert!(next_up(0.0) > 0.0);
        assert!(next_down(0.0) < 0.0);
        assert_eq!(next_up(f32::INFINITY), f32::INFINITY);
    }

    #[test]
    fn test_point_on_boundary_is_kept() {
        let bbox = Geometry::point(10.0, 20.0).bbox().expect("point has bbox");
        let region = Bbox::new(10.0, 20.0, 15.0, 25.0);
        assert!(bbox.intersects(&region));
        assert!(bbox.min_x < 10.0 && bbox.max_x > 10.0);
    }

    #[test]
    fn test_polygon_bbox_uses_exterior() {
        let polygon = Geometry::Polygon {
            exterior: vec![Coord::xy(0.0, 0.0), Coord::xy(4.0, 0.0), Coord::xy(4.0, 3.0), Coord::xy(0.0, 0.0)],
            interiors: vec![vec![Coord::xy(100.0, 100.0)]],
        };
        let bbox = polygon.bbox().expect("bbox");
        assert!(bbox.max_x < 4.1 && bbox.max_y < 3.1);
        assert!(!bbox.intersects(&Bbox::new(50.0, 50.0, 200.0, 200.0)));
    }

    #[test]
    fn test_empty_linestring() {
        assert!(Geometry::LineString(vec![]).bbox().is_none());
    }

    #[test]
    fn test_z_only_compared_when_present() {
        let a = Geometry::Point(Coord::xyz(1.0, 1.0, 100.0)).bbox().unwrap();
        let b = Geometry::Point(Coord::xyz(1.0, 1.0, 0.0)).bbox().unwrap();
        assert!(!a.intersects(&b));
        assert!(a.intersects(&Bbox::new(0.0, 0.0, 2.0, 2.0)));
    }
}
