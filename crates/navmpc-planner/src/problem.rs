//! Problem Builder
//!
//! Assembles the per-cycle parameter vector and the initial guess.
//!
//! The parameter vector has a constant length and field order:
//!
//! ```text
//! [ x, y, θ, v_prev, ω_prev ]                      current state (5)
//! [ x_ref, y_ref, θ_ref, v_ref ] × N               reference for k = 1..N
//! [ nx, ny, d ] × E × Nstcobs                      static obstacles
//! [ x, y, rx, ry, heading, alpha ] × N × Ndynobs   dynamic obstacles
//! [ w_0 … w_11 ]                                   penalty weights
//! ```
//!
//! The decision vector is `(v_0, ω_0, …, v_{N-1}, ω_{N-1})`.

use navmpc_core::{Control, State};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ColdStart, CostWeights, MpcConfig, PARAMS_PER_DYNAMIC, PARAMS_PER_EDGE};
use crate::obstacles::EncodedObstacles;

/// Problem assembly errors
#[derive(Debug, Error, PartialEq)]
pub enum ProblemError {
    #[error("{block} block has length {got}, layout expects {expected}")]
    LayoutMismatch {
        block: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("reference trajectory is empty")]
    MissingReference,
}

/// Offsets of each block inside the parameter vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    pub n_hor: usize,
    pub n_stcobs: usize,
    pub edges_per_static: usize,
    pub n_dynobs: usize,
}

impl ParameterLayout {
    /// `x, y, θ, v_prev, ω_prev`
    pub const STATE_LEN: usize = 5;
    /// `x, y, θ, speed`
    pub const REFERENCE_STRIDE: usize = 4;
    /// Scalars per control pair
    pub const NU: usize = 2;

    pub fn new(config: &MpcConfig) -> Self {
        Self {
            n_hor: config.horizon.n_hor,
            n_stcobs: config.obstacles.n_stcobs,
            edges_per_static: config.obstacles.edges_per_static,
            n_dynobs: config.obstacles.n_dynobs,
        }
    }

    pub fn state_offset(&self) -> usize {
        0
    }

    pub fn reference_offset(&self) -> usize {
        Self::STATE_LEN
    }

    pub fn static_offset(&self) -> usize {
        self.reference_offset() + self.n_hor * Self::REFERENCE_STRIDE
    }

    pub fn static_len(&self) -> usize {
        self.n_stcobs * self.edges_per_static * PARAMS_PER_EDGE
    }

    pub fn dynamic_offset(&self) -> usize {
        self.static_offset() + self.static_len()
    }

    pub fn dynamic_len(&self) -> usize {
        self.n_dynobs * self.n_hor * PARAMS_PER_DYNAMIC
    }

    pub fn weights_offset(&self) -> usize {
        self.dynamic_offset() + self.dynamic_len()
    }

    /// Total parameter count
    pub fn len(&self) -> usize {
        self.weights_offset() + CostWeights::COUNT
    }

    /// Decision variable count (`2N`)
    pub fn n_decision(&self) -> usize {
        self.n_hor * Self::NU
    }
}

/// Target for one horizon step
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Target linear speed [m/s]
    pub speed: f64,
}

impl ReferencePoint {
    pub fn new(x: f64, y: f64, theta: f64, speed: f64) -> Self {
        Self { x, y, theta, speed }
    }
}

/// Reference targets for the states `k = 1..=N`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferenceTrajectory {
    pub points: Vec<ReferencePoint>,
}

impl ReferenceTrajectory {
    pub fn new(points: Vec<ReferencePoint>) -> Self {
        Self { points }
    }

    /// Constant-speed straight line starting one step ahead of `start`
    pub fn straight_line(start: &State, speed: f64, ts: f64, n: usize) -> Self {
        let (sin, cos) = start.theta.sin_cos();
        let points = (1..=n)
            .map(|k| {
                let s = speed * ts * k as f64;
                ReferencePoint::new(start.x + s * cos, start.y + s * sin, start.theta, speed)
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Exactly `n` points: truncated, or extended with the last point
    pub fn resized(&self, n: usize) -> Result<Vec<ReferencePoint>, ProblemError> {
        let last = *self.points.last().ok_or(ProblemError::MissingReference)?;
        Ok((0..n)
            .map(|k| self.points.get(k).copied().unwrap_or(last))
            .collect())
    }

    /// Drop the first `steps` points, holding the last one at the tail
    pub fn advance(&mut self, steps: usize) {
        let Some(last) = self.points.last().copied() else {
            return;
        };
        let n = self.points.len();
        self.points.drain(..steps.min(n));
        self.points.resize(n, last);
    }
}

/// Parameter vector plus initial guess for one solve
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemInstance {
    pub parameters: Vec<f64>,
    pub initial_guess: Vec<f64>,
}

/// Previous solution, kept between cycles as the next initial guess
#[derive(Debug, Clone, Default)]
pub struct WarmStart {
    previous: Option<Vec<Control>>,
}

impl WarmStart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a committed solution shifted by the committed prefix
    pub fn record(&mut self, controls: &[Control], action_steps: usize) {
        self.previous = if controls.is_empty() {
            None
        } else {
            Some(shift_controls(controls, action_steps))
        };
    }

    /// Forget the previous solution; the next guess is a cold start
    pub fn clear(&mut self) {
        self.previous = None;
    }

    pub fn is_cold(&self) -> bool {
        self.previous.is_none()
    }

    pub fn previous(&self) -> Option<&[Control]> {
        self.previous.as_deref()
    }
}

/// Shift left by `steps` pairs, repeating the last pair at the tail
pub fn shift_controls(controls: &[Control], steps: usize) -> Vec<Control> {
    let Some(&last) = controls.last() else {
        return Vec::new();
    };
    let n = controls.len();
    (0..n)
        .map(|k| controls.get(k + steps).copied().unwrap_or(last))
        .collect()
}

/// Builds problem instances for a fixed layout
#[derive(Debug, Clone)]
pub struct ProblemBuilder {
    layout: ParameterLayout,
    weights: [f64; CostWeights::COUNT],
    cold_start: ColdStart,
    lin_vel_bounds: (f64, f64),
}

impl ProblemBuilder {
    pub fn new(config: &MpcConfig) -> Self {
        Self {
            layout: ParameterLayout::new(config),
            weights: config.weights.to_array(),
            cold_start: config.solver.cold_start,
            lin_vel_bounds: (config.robot.lin_vel_min, config.robot.lin_vel_max),
        }
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Assemble the parameter vector and initial guess
    pub fn build(
        &self,
        state: &State,
        last_control: &Control,
        reference: &ReferenceTrajectory,
        obstacles: &EncodedObstacles,
        warm_start: &WarmStart,
    ) -> Result<ProblemInstance, ProblemError> {
        let layout = &self.layout;
        check_len("static", layout.static_len(), obstacles.static_params.len())?;
        check_len("dynamic", layout.dynamic_len(), obstacles.dynamic_params.len())?;
        let targets = reference.resized(layout.n_hor)?;

        let mut parameters = Vec::with_capacity(layout.len());
        parameters.extend_from_slice(&[state.x, state.y, state.theta, last_control.v, last_control.omega]);
        for r in &targets {
            parameters.extend_from_slice(&[r.x, r.y, r.theta, r.speed]);
        }
        parameters.extend_from_slice(&obstacles.static_params);
        parameters.extend_from_slice(&obstacles.dynamic_params);
        parameters.extend_from_slice(&self.weights);
        debug_assert_eq!(parameters.len(), layout.len());

        let initial_guess = match warm_start.previous() {
            Some(previous) if previous.len() == layout.n_hor => Control::sequence_to_vec(previous),
            _ => self.cold_guess(&targets),
        };

        Ok(ProblemInstance {
            parameters,
            initial_guess,
        })
    }

    fn cold_guess(&self, targets: &[ReferencePoint]) -> Vec<f64> {
        let (lo, hi) = self.lin_vel_bounds;
        targets
            .iter()
            .flat_map(|r| match self.cold_start {
                ColdStart::ReferenceSpeed => [r.speed.clamp(lo, hi), 0.0],
                ColdStart::Zero => [0.0, 0.0],
            })
            .collect()
    }
}

fn check_len(block: &'static str, expected: usize, got: usize) -> Result<(), ProblemError> {
    if expected != got {
        return Err(ProblemError::LayoutMismatch { block, expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obstacles::ObstacleEncoder;
    use navmpc_core::Pt2;
    use approx::assert_relative_eq;

    fn config() -> MpcConfig {
        let mut config = MpcConfig::default();
        config.horizon.n_hor = 4;
        config.obstacles.n_stcobs = 2;
        config.obstacles.n_dynobs = 1;
        config
    }

    #[test]
    fn test_layout_length() {
        let config = MpcConfig::default();
        let layout = ParameterLayout::new(&config);
        let n = 20;
        assert_eq!(layout.len(), 5 + 4 * n + 10 * 4 * 3 + 5 * n * 6 + 12);
        assert_eq!(layout.n_decision(), 2 * n);
    }

    #[test]
    fn test_build_places_blocks_in_order() {
        let config = config();
        let builder = ProblemBuilder::new(&config);
        let encoder = ObstacleEncoder::new(&config);
        let state = State::new(1.0, 2.0, 0.3);
        let reference = ReferenceTrajectory::straight_line(&state, 1.0, config.horizon.ts, 4);
        let obstacles = encoder.encode(&state.position(), &[], &[]);

        let instance = builder
            .build(&state, &Control::new(0.4, -0.1), &reference, &obstacles, &WarmStart::new())
            .unwrap();
        let layout = builder.layout();
        let p = &instance.parameters;

        assert_eq!(p.len(), layout.len());
        assert_eq!(&p[..5], &[1.0, 2.0, 0.3, 0.4, -0.1]);
        assert_relative_eq!(p[layout.reference_offset() + 3], 1.0);
        assert_eq!(&p[layout.static_offset()..layout.dynamic_offset()], &obstacles.static_params[..]);
        assert_eq!(&p[layout.weights_offset()..], &config.weights.to_array()[..]);
    }

    #[test]
    fn test_short_reference_is_extended() {
        let config = config();
        let builder = ProblemBuilder::new(&config);
        let encoder = ObstacleEncoder::new(&config);
        let reference = ReferenceTrajectory::new(vec![ReferencePoint::new(3.0, 0.0, 0.0, 0.5)]);
        let obstacles = encoder.encode(&Pt2::origin(), &[], &[]);
        let instance = builder
            .build(&State::default(), &Control::zero(), &reference, &obstacles, &WarmStart::new())
            .unwrap();
        let off = builder.layout().reference_offset();
        for k in 0..4 {
            assert_relative_eq!(instance.parameters[off + 4 * k], 3.0);
        }
    }

    #[test]
    fn test_empty_reference_is_an_error() {
        let config = config();
        let builder = ProblemBuilder::new(&config);
        let encoder = ObstacleEncoder::new(&config);
        let obstacles = encoder.encode(&Pt2::origin(), &[], &[]);
        let result = builder.build(
            &State::default(),
            &Control::zero(),
            &ReferenceTrajectory::default(),
            &obstacles,
            &WarmStart::new(),
        );
        assert_eq!(result, Err(ProblemError::MissingReference));
    }

    #[test]
    fn test_mismatched_obstacle_block_is_rejected() {
        let config = config();
        let builder = ProblemBuilder::new(&config);
        let mut other = config.clone();
        other.obstacles.n_stcobs = 3;
        let obstacles = ObstacleEncoder::new(&other).encode(&Pt2::origin(), &[], &[]);
        let reference = ReferenceTrajectory::straight_line(&State::default(), 1.0, 0.2, 4);
        let result = builder.build(&State::default(), &Control::zero(), &reference, &obstacles, &WarmStart::new());
        assert!(matches!(result, Err(ProblemError::LayoutMismatch { block: "static", .. })));
    }

    #[test]
    fn test_cold_start_guess() {
        let mut config = config();
        config.robot.lin_vel_max = 0.8;
        let builder = ProblemBuilder::new(&config);
        let encoder = ObstacleEncoder::new(&config);
        let reference = ReferenceTrajectory::straight_line(&State::default(), 1.0, 0.2, 4);
        let obstacles = encoder.encode(&Pt2::origin(), &[], &[]);
        let instance = builder
            .build(&State::default(), &Control::zero(), &reference, &obstacles, &WarmStart::new())
            .unwrap();
        assert_eq!(instance.initial_guess, vec![0.8, 0.0, 0.8, 0.0, 0.8, 0.0, 0.8, 0.0]);

        config.solver.cold_start = ColdStart::Zero;
        let builder = ProblemBuilder::new(&config);
        let instance = builder
            .build(&State::default(), &Control::zero(), &reference, &obstacles, &WarmStart::new())
            .unwrap();
        assert!(instance.initial_guess.iter().all(|u| *u == 0.0));
    }

    #[test]
    fn test_shift_repeats_last_pair() {
        let controls: Vec<Control> = (0..4).map(|k| Control::new(k as f64, -(k as f64))).collect();
        let shifted = shift_controls(&controls, 1);
        assert_eq!(
            shifted,
            vec![
                Control::new(1.0, -1.0),
                Control::new(2.0, -2.0),
                Control::new(3.0, -3.0),
                Control::new(3.0, -3.0),
            ]
        );

        let shifted = shift_controls(&controls, 3);
        assert!(shifted.iter().all(|c| *c == Control::new(3.0, -3.0)));
    }

    #[test]
    fn test_warm_start_used_after_record() {
        let config = config();
        let builder = ProblemBuilder::new(&config);
        let encoder = ObstacleEncoder::new(&config);
        let reference = ReferenceTrajectory::straight_line(&State::default(), 1.0, 0.2, 4);
        let obstacles = encoder.encode(&Pt2::origin(), &[], &[]);

        let mut warm = WarmStart::new();
        let solution: Vec<Control> = (0..4).map(|k| Control::new(0.1 * k as f64, 0.0)).collect();
        warm.record(&solution, 2);
        assert!(!warm.is_cold());

        let instance = builder
            .build(&State::default(), &Control::zero(), &reference, &obstacles, &warm)
            .unwrap();
        let expected: Vec<f64> = [0.2, 0.3, 0.3, 0.3].iter().flat_map(|v| [*v, 0.0]).collect();
        for (a, b) in instance.initial_guess.iter().zip(&expected) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }

        warm.clear();
        assert!(warm.is_cold());
    }

    #[test]
    fn test_reference_advance_holds_tail() {
        let mut reference = ReferenceTrajectory::new(
            (0..4).map(|k| ReferencePoint::new(k as f64, 0.0, 0.0, 1.0)).collect(),
        );
        reference.advance(2);
        let xs: Vec<f64> = reference.points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 3.0, 3.0]);
    }
}
