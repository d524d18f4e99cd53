//! Unicycle (differential-drive) kinematics
//!
//! Discrete forward-Euler model:
//!
//! ```text
//! x_{k+1} = x_k + ts · v_k · cos θ_k
//! y_{k+1} = y_k + ts · v_k · sin θ_k
//! θ_{k+1} = θ_k + ts · ω_k
//! ```

use nalgebra::{Matrix3, Matrix3x2, Vector3};
use serde::{Deserialize, Serialize};

use crate::Pt2;

/// Robot pose
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    /// Position x [m]
    pub x: f64,
    /// Position y [m]
    pub y: f64,
    /// Heading [rad]
    pub theta: f64,
}

impl State {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn position(&self) -> Pt2 {
        Pt2::new(self.x, self.y)
    }

    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.theta)
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Velocity command
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Control {
    /// Linear velocity [m/s]
    pub v: f64,
    /// Angular velocity [rad/s]
    pub omega: f64,
}

impl Control {
    pub fn new(v: f64, omega: f64) -> Self {
        Self { v, omega }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Read pairs `(v, ω)` from a flat decision vector
    pub fn sequence_from_slice(u: &[f64]) -> Vec<Control> {
        u.chunks_exact(2).map(|c| Control::new(c[0], c[1])).collect()
    }

    /// Flatten a control sequence into `(v, ω)` pairs
    pub fn sequence_to_vec(controls: &[Control]) -> Vec<f64> {
        controls.iter().flat_map(|c| [c.v, c.omega]).collect()
    }
}

/// Discrete unicycle model with fixed sampling time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnicycleModel {
    /// Sampling time [s]
    pub ts: f64,
}

impl UnicycleModel {
    pub fn new(ts: f64) -> Self {
        Self { ts }
    }

    /// One forward-Euler step
    pub fn step(&self, s: &State, u: &Control) -> State {
        State {
            x: s.x + self.ts * u.v * s.theta.cos(),
            y: s.y + self.ts * u.v * s.theta.sin(),
            theta: s.theta + self.ts * u.omega,
        }
    }

    /// ∂f/∂s at `(s, u)`
    pub fn state_jacobian(&self, s: &State, u: &Control) -> Matrix3<f64> {
        let (sin, cos) = s.theta.sin_cos();
        Matrix3::new(
            1.0, 0.0, -self.ts * u.v * sin,
            0.0, 1.0, self.ts * u.v * cos,
            0.0, 0.0, 1.0,
        )
    }

    /// ∂f/∂u at `s`
    pub fn control_jacobian(&self, s: &State) -> Matrix3x2<f64> {
        let (sin, cos) = s.theta.sin_cos();
        Matrix3x2::new(
            self.ts * cos, 0.0,
            self.ts * sin, 0.0,
            0.0, self.ts,
        )
    }

    /// Roll out a control sequence; returns `controls.len() + 1` states
    pub fn rollout(&self, initial: &State, controls: &[Control]) -> Vec<State> {
        let mut states = Vec::with_capacity(controls.len() + 1);
        states.push(*initial);
        let mut s = *initial;
        for u in controls {
            s = self.step(&s, u);
            states.push(s);
        }
        states
    }
}
