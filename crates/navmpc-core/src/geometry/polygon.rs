//! Convex polygons and half-planes
//!
//! Polygons are always stored counter-clockwise, starting at the
//! lowest (then leftmost) vertex. Edge normals therefore always point
//! outward and the half-plane encoding of a polygon never flips sign
//! between two calls on the same input.

use serde::{Deserialize, Serialize};

use crate::{Pt2, Vec2};

/// Area below which a hull is considered degenerate [m²]
const DEGENERATE_AREA: f64 = 1e-9;

/// Closed half-plane `{ p | n·p <= offset }` bounding a polygon edge
///
/// `depth(p) = offset - n·p` is positive strictly inside the half-plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HalfPlane {
    /// Outward unit normal
    pub normal: Vec2,
    /// Signed offset along the normal
    pub offset: f64,
}

impl HalfPlane {
    /// Half-plane to the left of the directed edge `a -> b`
    ///
    /// Returns `None` for a zero-length edge.
    pub fn from_edge(a: &Pt2, b: &Pt2) -> Option<Self> {
        let d = b - a;
        let len = d.norm();
        if len < 1e-12 {
            return None;
        }
        let normal = Vec2::new(d.y, -d.x) / len;
        Some(Self {
            normal,
            offset: normal.dot(&a.coords),
        })
    }

    /// Signed penetration depth of `p`
    pub fn depth(&self, p: &Pt2) -> f64 {
        self.offset - self.normal.dot(&p.coords)
    }

    /// Move the boundary outward by `margin`
    pub fn inflated(&self, margin: f64) -> Self {
        Self {
            normal: self.normal,
            offset: self.offset + margin,
        }
    }

    /// Flatten as `[nx, ny, offset]`
    pub fn to_array(&self) -> [f64; 3] {
        [self.normal.x, self.normal.y, self.offset]
    }
}

/// Convex polygon in canonical counter-clockwise order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvexPolygon {
    vertices: Vec<Pt2>,
}

impl ConvexPolygon {
    /// Build the convex hull of an arbitrary point set
    ///
    /// Collinear and duplicate points are removed. Returns `None` when
    /// the hull has fewer than three vertices or no area.
    pub fn from_points(points: &[Pt2]) -> Option<Self> {
        let hull = convex_hull(points);
        if hull.len() < 3 || signed_area(&hull) < DEGENERATE_AREA {
            return None;
        }
        Some(Self {
            vertices: canonical_start(hull),
        })
    }

    /// Axis-aligned square circumscribing a circle
    pub fn from_circle(center: Pt2, radius: f64) -> Option<Self> {
        let r = radius.abs();
        Self::from_points(&[
            Pt2::new(center.x - r, center.y - r),
            Pt2::new(center.x + r, center.y - r),
            Pt2::new(center.x + r, center.y + r),
            Pt2::new(center.x - r, center.y + r),
        ])
    }

    /// Vertices, counter-clockwise
    pub fn vertices(&self) -> &[Pt2] {
        &self.vertices
    }

    /// Number of edges
    pub fn num_edges(&self) -> usize {
        self.vertices.len()
    }

    /// Outward half-planes, one per edge, in vertex order
    pub fn half_planes(&self) -> Vec<HalfPlane> {
        let n = self.vertices.len();
        (0..n)
            .filter_map(|i| HalfPlane::from_edge(&self.vertices[i], &self.vertices[(i + 1) % n]))
            .collect()
    }

    /// Axis-aligned bounding box
    pub fn bounding_box(&self) -> Self {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for v in &self.vertices {
            min_x = min_x.min(v.x);
            min_y = min_y.min(v.y);
            max_x = max_x.max(v.x);
            max_y = max_y.max(v.y);
        }
        Self {
            vertices: vec![
                Pt2::new(min_x, min_y),
                Pt2::new(max_x, min_y),
                Pt2::new(max_x, max_y),
                Pt2::new(min_x, max_y),
            ],
        }
    }

    /// Whether `p` lies strictly inside
    pub fn contains(&self, p: &Pt2) -> bool {
        self.half_planes().iter().all(|h| h.depth(p) > 0.0)
    }

    /// Euclidean distance from `p` to the polygon (zero inside)
    pub fn distance(&self, p: &Pt2) -> f64 {
        if self.contains(p) {
            return 0.0;
        }
        let n = self.vertices.len();
        (0..n)
            .map(|i| {
                let (_, d) = closest_point_on_segment(p, &self.vertices[i], &self.vertices[(i + 1) % n]);
                d
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Enclosed area
    pub fn area(&self) -> f64 {
        signed_area(&self.vertices)
    }
}

/// Closest point on segment `[a, b]` to `p`, and its distance
pub fn closest_point_on_segment(p: &Pt2, a: &Pt2, b: &Pt2) -> (Pt2, f64) {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    let closest = if len_sq < 1e-18 {
        *a
    } else {
        let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
        a + ab * t
    };
    (closest, (p - closest).norm())
}

/// Andrew's monotone chain, counter-clockwise, collinear points dropped
fn convex_hull(points: &[Pt2]) -> Vec<Pt2> {
    let mut pts: Vec<Pt2> = points
        .iter()
        .copied()
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .collect();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();

    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: &Pt2, a: &Pt2, b: &Pt2| (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x);

    let mut lower: Vec<Pt2> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Pt2> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Rotate a CCW ring so it starts at the lowest, then leftmost, vertex
fn canonical_start(mut ring: Vec<Pt2>) -> Vec<Pt2> {
    let start = ring
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    ring.rotate_left(start);
    ring
}

/// Shoelace area, positive for counter-clockwise rings
fn signed_area(ring: &[Pt2]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let a = &ring[i];
            let b = &ring[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    0.5 * twice
}
