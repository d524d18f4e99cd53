//! Simulated differential-drive robot

use crate::dynamics::{Control, State};
use crate::math::{rk4_substepped, wrap_to_pi};

use super::{OdometrySensor, SimConfig};

/// Record of one applied command
#[derive(Debug, Clone, Copy)]
pub struct SimStep {
    /// Simulation time at the end of the step [s]
    pub time: f64,
    /// True pose after the step
    pub state: State,
    /// Command that was applied
    pub control: Control,
}

/// Simulation history
#[derive(Debug, Clone, Default)]
pub struct SimHistory {
    pub steps: Vec<SimStep>,
}

impl SimHistory {
    pub fn record(&mut self, step: SimStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Unicycle plant integrated with RK4 between commands
pub struct SimulatedRobot {
    config: SimConfig,
    state: State,
    time: f64,
    odometry: OdometrySensor,
    history: SimHistory,
    halted: bool,
}

impl SimulatedRobot {
    pub fn new(initial: State, config: SimConfig) -> Self {
        let odometry = OdometrySensor::new(
            config.position_noise_std,
            config.heading_noise_std,
            config.seed,
        );
        Self {
            config,
            state: initial,
            time: 0.0,
            odometry,
            history: SimHistory::default(),
            halted: false,
        }
    }

    /// Hold `control` for `duration` seconds
    pub fn apply(&mut self, control: Control, duration: f64) {
        let control = if self.halted { Control::zero() } else { control };
        let (v, omega) = (control.v, control.omega);
        let next = rk4_substepped(
            &self.state.to_vector(),
            self.time,
            duration,
            self.config.integration_step,
            |_t, x| nalgebra::Vector3::new(v * x[2].cos(), v * x[2].sin(), omega),
        );
        self.state = State::from_vector(&next);
        self.state.theta = wrap_to_pi(self.state.theta);
        self.time += duration;
        self.history.record(SimStep {
            time: self.time,
            state: self.state,
            control,
        });
    }

    /// Stop moving for good; later commands are ignored
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// True pose
    pub fn state(&self) -> State {
        self.state
    }

    /// Measured pose
    pub fn odometry(&mut self) -> State {
        self.odometry.measure(&self.state)
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn history(&self) -> &SimHistory {
        &self.history
    }
}
