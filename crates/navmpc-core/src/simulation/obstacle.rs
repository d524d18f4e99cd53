//! Moving obstacles for simulation

use serde::{Deserialize, Serialize};

use crate::{Pt2, Vec2};

/// Disc-shaped obstacle moving at constant velocity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovingObstacle {
    /// Current centre [m]
    pub position: Pt2,
    /// Velocity [m/s]
    pub velocity: Vec2,
    /// Radius [m]
    pub radius: f64,
}

impl MovingObstacle {
    pub fn new(position: Pt2, velocity: Vec2, radius: f64) -> Self {
        Self {
            position,
            velocity,
            radius,
        }
    }

    /// Advance by `dt` seconds
    pub fn advance(&mut self, dt: f64) {
        self.position += self.velocity * dt;
    }

    /// Position after `dt` seconds, without moving
    pub fn position_at(&self, dt: f64) -> Pt2 {
        self.position + self.velocity * dt
    }
}
