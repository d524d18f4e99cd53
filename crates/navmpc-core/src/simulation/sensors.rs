//! Sensor models for simulation

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dynamics::State;

/// Seeded Gaussian noise source
#[derive(Debug, Clone)]
pub struct GaussianNoise {
    rng: StdRng,
}

impl GaussianNoise {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Standard normal sample (Box-Muller)
    pub fn sample(&mut self) -> f64 {
        let u1: f64 = self.rng.random::<f64>().max(1e-12);
        let u2: f64 = self.rng.random::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Zero-mean sample with the given standard deviation
    pub fn sample_scaled(&mut self, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return 0.0;
        }
        self.sample() * std_dev
    }
}

/// Odometry sensor reporting a noisy pose
#[derive(Debug, Clone)]
pub struct OdometrySensor {
    position_std: f64,
    heading_std: f64,
    noise: GaussianNoise,
}

impl OdometrySensor {
    pub fn new(position_std: f64, heading_std: f64, seed: u64) -> Self {
        Self {
            position_std,
            heading_std,
            noise: GaussianNoise::new(seed),
        }
    }

    /// Noisy measurement of the true pose
    pub fn measure(&mut self, truth: &State) -> State {
        State {
            x: truth.x + self.noise.sample_scaled(self.position_std),
            y: truth.y + self.noise.sample_scaled(self.position_std),
            theta: truth.theta + self.noise.sample_scaled(self.heading_std),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_free_sensor_is_exact() {
        let mut sensor = OdometrySensor::new(0.0, 0.0, 1);
        let truth = State::new(1.0, 2.0, 0.3);
        assert_eq!(sensor.measure(&truth), truth);
    }

    #[test]
    fn test_same_seed_same_samples() {
        let mut a = GaussianNoise::new(7);
        let mut b = GaussianNoise::new(7);
        for _ in 0..10 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_noise_statistics() {
        let mut noise = GaussianNoise::new(42);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| noise.sample_scaled(0.5)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.02);
        assert!((var.sqrt() - 0.5).abs() < 0.02);
    }
}
