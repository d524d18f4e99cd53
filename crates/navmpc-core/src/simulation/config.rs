//! Simulation configuration

use serde::{Deserialize, Serialize};

/// Simulated robot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Maximum plant integration step [s]
    pub integration_step: f64,
    /// Odometry position noise standard deviation [m]
    pub position_noise_std: f64,
    /// Odometry heading noise standard deviation [rad]
    pub heading_noise_std: f64,
    /// RNG seed for the noise model
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            integration_step: 0.01,
            // Noise-free by default so scenario runs are reproducible
            position_noise_std: 0.0,
            heading_noise_std: 0.0,
            seed: 12345,
        }
    }
}
