//! Obstacle Encoder
//!
//! Maps variable-length obstacle lists into the fixed-capacity slot arrays
//! of the parameter vector.
//!
//! # Static slots
//!
//! Each slot holds `edges_per_static` rows of `(nx, ny, d)`. A point `p`
//! lies inside the inflated polygon iff `d - n·p > 0` for every row. Rows
//! follow the counter-clockwise hull order starting at the lowest, then
//! leftmost vertex, so the encoding of a polygon never depends on the
//! order its vertices were reported in. Inactive rows are `(0, 0, -1)`:
//! the depth is `-1` everywhere, so the slot contributes nothing.
//!
//! # Dynamic slots
//!
//! Each slot holds `n_hor` rows of `(x, y, rx, ry, heading, alpha)`, one
//! per predicted step `k = 1..=N`. Without explicit predictions the
//! position follows `position + k·ts·velocity`. Inactive rows are
//! `(1e4, 1e4, 1, 1, 0, 0)`: far away and with zero weight.

use navmpc_core::{ConvexPolygon, Pt2, State, Vec2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{MpcConfig, PARAMS_PER_DYNAMIC, PARAMS_PER_EDGE};

/// Row written into unused static edges
pub const STATIC_SENTINEL: [f64; PARAMS_PER_EDGE] = [0.0, 0.0, -1.0];

/// Row written into unused dynamic steps
pub const DYNAMIC_SENTINEL: [f64; PARAMS_PER_DYNAMIC] = [1e4, 1e4, 1.0, 1.0, 0.0, 0.0];

/// Polygonal obstacle, as reported by perception
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticObstacle {
    /// Vertices in any order
    pub vertices: Vec<Pt2>,
}

impl StaticObstacle {
    pub fn new(vertices: Vec<Pt2>) -> Self {
        Self { vertices }
    }

    /// Square circumscribing a round obstacle
    ///
    /// A zero radius yields a single point, which the encoder drops.
    pub fn from_circle(center: Pt2, radius: f64) -> Self {
        ConvexPolygon::from_circle(center, radius)
            .map(|square| Self::new(square.vertices().to_vec()))
            .unwrap_or_else(|| Self::new(vec![center]))
    }

    /// Axis-aligned rectangle given by two opposite corners
    pub fn rectangle(a: Pt2, b: Pt2) -> Self {
        Self::new(vec![
            Pt2::new(a.x, a.y),
            Pt2::new(b.x, a.y),
            Pt2::new(b.x, b.y),
            Pt2::new(a.x, b.y),
        ])
    }
}

/// Moving obstacle with current kinematics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObstacle {
    /// Current centre [m]
    pub position: Pt2,
    /// Velocity [m/s]
    pub velocity: Vec2,
    /// Radius before inflation [m]; non-positive means the configured default
    pub size: f64,
    /// Explicit per-step predictions for `k = 1..`; empty means
    /// constant-velocity extrapolation
    #[serde(default)]
    pub predictions: Vec<State>,
}

impl DynamicObstacle {
    pub fn new(position: Pt2, velocity: Vec2, size: f64) -> Self {
        Self {
            position,
            velocity,
            size,
            predictions: Vec::new(),
        }
    }

    /// Velocity estimated from two detections `ts` apart
    pub fn from_consecutive_positions(last: Pt2, current: Pt2, ts: f64, size: f64) -> Self {
        let velocity = if ts > 0.0 {
            (current - last) / ts
        } else {
            Vec2::zeros()
        };
        Self::new(current, velocity, size)
    }

    /// Another robot, using the states it predicted in its own last solve
    pub fn from_robot_prediction(current: State, predicted: &[State], size: f64) -> Self {
        Self {
            position: current.position(),
            velocity: Vec2::zeros(),
            size,
            predictions: predicted.to_vec(),
        }
    }

    /// Predicted `(position, heading)` for steps `k = 1..=n`
    pub fn predict(&self, n: usize, ts: f64) -> Vec<(Pt2, f64)> {
        if self.predictions.is_empty() {
            let heading = if self.velocity.norm() > 1e-9 {
                self.velocity.y.atan2(self.velocity.x)
            } else {
                0.0
            };
            return (1..=n)
                .map(|k| (self.position + self.velocity * (k as f64 * ts), heading))
                .collect();
        }

        // Short prediction lists hold their last entry
        (0..n)
            .map(|k| {
                let s = self.predictions[k.min(self.predictions.len() - 1)];
                (s.position(), s.theta)
            })
            .collect()
    }
}

/// Fixed-length obstacle blocks ready for the parameter vector
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedObstacles {
    /// `n_stcobs · edges_per_static · 3` scalars
    pub static_params: Vec<f64>,
    /// `n_dynobs · n_hor · 6` scalars
    pub dynamic_params: Vec<f64>,
    /// Indices (into the input list) of the static obstacles kept, slot order
    pub static_kept: Vec<usize>,
    /// Indices (into the input list) of the dynamic obstacles kept, slot order
    pub dynamic_kept: Vec<usize>,
}

impl EncodedObstacles {
    pub fn active_static(&self) -> usize {
        self.static_kept.len()
    }

    pub fn active_dynamic(&self) -> usize {
        self.dynamic_kept.len()
    }
}

/// Encodes obstacle lists into padded slot arrays
#[derive(Debug, Clone)]
pub struct ObstacleEncoder {
    n_stcobs: usize,
    edges: usize,
    n_dynobs: usize,
    n_hor: usize,
    ts: f64,
    inflation: f64,
    default_size: f64,
}

impl ObstacleEncoder {
    pub fn new(config: &MpcConfig) -> Self {
        Self {
            n_stcobs: config.obstacles.n_stcobs,
            edges: config.obstacles.edges_per_static,
            n_dynobs: config.obstacles.n_dynobs,
            n_hor: config.horizon.n_hor,
            ts: config.horizon.ts,
            inflation: config.inflation(),
            default_size: config.obstacles.dynamic_default_size,
        }
    }

    pub fn static_len(&self) -> usize {
        self.n_stcobs * self.edges * PARAMS_PER_EDGE
    }

    pub fn dynamic_len(&self) -> usize {
        self.n_dynobs * self.n_hor * PARAMS_PER_DYNAMIC
    }

    /// Encode both lists relative to the robot position
    pub fn encode(
        &self,
        robot: &Pt2,
        statics: &[StaticObstacle],
        dynamics: &[DynamicObstacle],
    ) -> EncodedObstacles {
        let (static_params, static_kept) = self.encode_static(robot, statics);
        let (dynamic_params, dynamic_kept) = self.encode_dynamic(robot, dynamics);
        EncodedObstacles {
            static_params,
            dynamic_params,
            static_kept,
            dynamic_kept,
        }
    }

    fn encode_static(&self, robot: &Pt2, obstacles: &[StaticObstacle]) -> (Vec<f64>, Vec<usize>) {
        let mut candidates: Vec<(usize, ConvexPolygon, f64)> = Vec::with_capacity(obstacles.len());
        for (index, obstacle) in obstacles.iter().enumerate() {
            let Some(hull) = ConvexPolygon::from_points(&obstacle.vertices) else {
                warn!(index, vertices = obstacle.vertices.len(), "dropping degenerate static obstacle");
                continue;
            };
            let hull = if hull.num_edges() > self.edges {
                debug!(index, edges = hull.num_edges(), "static obstacle replaced by its bounding box");
                hull.bounding_box()
            } else {
                hull
            };
            let distance = hull.distance(robot);
            candidates.push((index, hull, distance));
        }

        let kept = nearest(candidates, self.n_stcobs, |c| (c.2, c.0));
        if kept.dropped > 0 {
            warn!(
                received = obstacles.len(),
                capacity = self.n_stcobs,
                dropped = kept.dropped,
                "static obstacles truncated to nearest"
            );
        }

        let mut params = Vec::with_capacity(self.static_len());
        for (_, hull, _) in &kept.items {
            let rows: Vec<[f64; PARAMS_PER_EDGE]> = hull
                .half_planes()
                .iter()
                .map(|h| h.inflated(self.inflation).to_array())
                .collect();
            let last = rows.last().copied().unwrap_or(STATIC_SENTINEL);
            for e in 0..self.edges {
                params.extend_from_slice(rows.get(e).unwrap_or(&last));
            }
        }
        for _ in kept.items.len()..self.n_stcobs {
            for _ in 0..self.edges {
                params.extend_from_slice(&STATIC_SENTINEL);
            }
        }

        (params, kept.items.iter().map(|c| c.0).collect())
    }

    fn encode_dynamic(&self, robot: &Pt2, obstacles: &[DynamicObstacle]) -> (Vec<f64>, Vec<usize>) {
        let candidates: Vec<(usize, &DynamicObstacle, f64)> = obstacles
            .iter()
            .enumerate()
            .map(|(i, o)| (i, o, (o.position - robot).norm()))
            .collect();

        let kept = nearest(candidates, self.n_dynobs, |c| (c.2, c.0));
        if kept.dropped > 0 {
            warn!(
                received = obstacles.len(),
                capacity = self.n_dynobs,
                dropped = kept.dropped,
                "dynamic obstacles truncated to nearest"
            );
        }

        let mut params = Vec::with_capacity(self.dynamic_len());
        for (_, obstacle, _) in &kept.items {
            let size = if obstacle.size > 0.0 { obstacle.size } else { self.default_size };
            let radius = size + self.inflation;
            for (p, heading) in obstacle.predict(self.n_hor, self.ts) {
                params.extend_from_slice(&[p.x, p.y, radius, radius, heading, 1.0]);
            }
        }
        for _ in kept.items.len()..self.n_dynobs {
            for _ in 0..self.n_hor {
                params.extend_from_slice(&DYNAMIC_SENTINEL);
            }
        }

        (params, kept.items.iter().map(|c| c.0).collect())
    }
}

struct Selection<T> {
    items: Vec<T>,
    dropped: usize,
}

/// Keep the `capacity` items with the smallest key, in key order
fn nearest<T>(mut items: Vec<T>, capacity: usize, key: impl Fn(&T) -> (f64, usize)) -> Selection<T> {
    items.sort_by(|a, b| {
        let (da, ia) = key(a);
        let (db, ib) = key(b);
        da.total_cmp(&db).then(ia.cmp(&ib))
    });
    let dropped = items.len().saturating_sub(capacity);
    items.truncate(capacity);
    Selection { items, dropped }
}
