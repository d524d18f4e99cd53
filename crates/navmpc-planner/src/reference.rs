//! Local reference sampling
//!
//! A waypoint polyline traversed at a nominal speed. Each cycle the robot
//! is projected onto the path and the next `N` targets are taken one
//! sampling interval apart from there; targets past the final waypoint
//! hold it with zero speed.

use navmpc_core::geometry::closest_point_on_segment;
use navmpc_core::Pt2;
use serde::{Deserialize, Serialize};

use crate::config::MpcConfig;
use crate::problem::{ProblemError, ReferencePoint, ReferenceTrajectory};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePath {
    waypoints: Vec<Pt2>,
    /// Arc length at each waypoint
    stations: Vec<f64>,
    nominal_speed: f64,
    ts: f64,
    n_hor: usize,
}

impl ReferencePath {
    /// Consecutive duplicate waypoints are merged
    pub fn new(waypoints: Vec<Pt2>, nominal_speed: f64, ts: f64, n_hor: usize) -> Result<Self, ProblemError> {
        let mut merged: Vec<Pt2> = Vec::with_capacity(waypoints.len());
        for p in waypoints {
            if merged.last().map_or(true, |q| (p - q).norm() > 1e-9) {
                merged.push(p);
            }
        }
        if merged.is_empty() {
            return Err(ProblemError::MissingReference);
        }

        let mut stations = Vec::with_capacity(merged.len());
        let mut s = 0.0;
        stations.push(s);
        for pair in merged.windows(2) {
            s += (pair[1] - pair[0]).norm();
            stations.push(s);
        }

        Ok(Self {
            waypoints: merged,
            stations,
            nominal_speed,
            ts,
            n_hor,
        })
    }

    /// Path sampled with the configured horizon
    pub fn from_config(waypoints: Vec<Pt2>, nominal_speed: f64, config: &MpcConfig) -> Result<Self, ProblemError> {
        Self::new(waypoints, nominal_speed, config.horizon.ts, config.horizon.n_hor)
    }

    pub fn waypoints(&self) -> &[Pt2] {
        &self.waypoints
    }

    pub fn goal(&self) -> Pt2 {
        self.waypoints[self.waypoints.len() - 1]
    }

    pub fn total_length(&self) -> f64 {
        self.stations[self.stations.len() - 1]
    }

    pub fn nominal_speed(&self) -> f64 {
        self.nominal_speed
    }

    /// Arc length of the closest point on the path
    pub fn project(&self, position: &Pt2) -> f64 {
        let mut best = (f64::INFINITY, 0.0);
        for (i, pair) in self.waypoints.windows(2).enumerate() {
            let (closest, dist) = closest_point_on_segment(position, &pair[0], &pair[1]);
            if dist < best.0 {
                best = (dist, self.stations[i] + (closest - pair[0]).norm());
            }
        }
        best.1
    }

    /// Point and tangent heading at arc length `s`, clamped to the path
    pub fn point_at(&self, s: f64) -> (Pt2, f64) {
        if self.waypoints.len() == 1 {
            return (self.waypoints[0], 0.0);
        }
        let s = s.clamp(0.0, self.total_length());
        let segment = self
            .stations
            .windows(2)
            .position(|w| s <= w[1])
            .unwrap_or(self.stations.len() - 2);
        let (a, b) = (self.waypoints[segment], self.waypoints[segment + 1]);
        let length = self.stations[segment + 1] - self.stations[segment];
        let t = (s - self.stations[segment]) / length;
        let d = b - a;
        (a + d * t, d.y.atan2(d.x))
    }

    /// Next `N` targets ahead of `position`
    pub fn sample(&self, position: &Pt2) -> ReferenceTrajectory {
        let start = self.project(position);
        let total = self.total_length();
        let spacing = self.nominal_speed * self.ts;

        let points = (1..=self.n_hor)
            .map(|k| {
                let s = start + spacing * k as f64;
                let (p, theta) = self.point_at(s);
                let speed = if s < total { self.nominal_speed } else { 0.0 };
                ReferencePoint::new(p.x, p.y, theta, speed)
            })
            .collect();
        ReferenceTrajectory::new(points)
    }

    /// Within `tolerance` of the final waypoint
    pub fn is_finished(&self, position: &Pt2, tolerance: f64) -> bool {
        (position - self.goal()).norm() <= tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn straight() -> ReferencePath {
        ReferencePath::new(vec![Pt2::new(0.0, 0.0), Pt2::new(10.0, 0.0)], 1.0, 0.2, 5).unwrap()
    }

    #[test]
    fn test_sample_spacing_follows_nominal_speed() {
        let path = straight();
        let reference = path.sample(&Pt2::new(2.0, 0.3));
        assert_eq!(reference.len(), 5);
        for (k, point) in reference.points.iter().enumerate() {
            assert_relative_eq!(point.x, 2.0 + 0.2 * (k + 1) as f64, epsilon = 1e-12);
            assert_relative_eq!(point.y, 0.0);
            assert_relative_eq!(point.theta, 0.0);
            assert_relative_eq!(point.speed, 1.0);
        }
    }

    #[test]
    fn test_speed_drops_to_zero_past_goal() {
        let path = straight();
        let reference = path.sample(&Pt2::new(9.7, 0.0));
        let last = reference.points.last().unwrap();
        assert_relative_eq!(last.x, 10.0);
        assert_relative_eq!(last.speed, 0.0);
        assert_relative_eq!(reference.points[0].speed, 1.0);
    }

    #[test]
    fn test_corner_heading() {
        let path = ReferencePath::new(
            vec![Pt2::new(0.0, 0.0), Pt2::new(1.0, 0.0), Pt2::new(1.0, 5.0)],
            1.0,
            0.5,
            4,
        )
        .unwrap();
        let reference = path.sample(&Pt2::new(0.0, 0.0));
        assert_relative_eq!(reference.points[0].theta, 0.0);
        assert_relative_eq!(reference.points[3].theta, FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(reference.points[3].x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(reference.points[3].y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(path.total_length(), 6.0);
    }

    #[test]
    fn test_single_waypoint_and_empty() {
        let path = ReferencePath::new(vec![Pt2::new(3.0, 4.0), Pt2::new(3.0, 4.0)], 1.0, 0.2, 3).unwrap();
        assert_eq!(path.waypoints().len(), 1);
        let reference = path.sample(&Pt2::origin());
        assert!(reference.points.iter().all(|p| p.x == 3.0 && p.y == 4.0 && p.speed == 0.0));

        assert_eq!(
            ReferencePath::new(vec![], 1.0, 0.2, 3),
            Err(ProblemError::MissingReference)
        );
    }

    #[test]
    fn test_is_finished() {
        let path = straight();
        assert!(!path.is_finished(&Pt2::new(9.0, 0.0), 0.2));
        assert!(path.is_finished(&Pt2::new(9.9, 0.1), 0.2));
    }
}
