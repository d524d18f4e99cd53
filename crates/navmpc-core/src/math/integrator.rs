//! Numerical integration methods
//!
//! The planner's internal model is a forward-Euler unicycle; the simulator
//! integrates the continuous model with RK4 so that plant and model differ
//! the way they do on a real robot.

use nalgebra::SVector;

/// Generic RK4 integrator for any state vector
///
/// Solves dx/dt = f(t, x) using 4th-order Runge-Kutta method.
///
/// # Arguments
/// * `x` - Current state
/// * `t` - Current time
/// * `dt` - Time step
/// * `f` - Derivative function f(t, x) -> dx/dt
pub fn rk4<const N: usize, F>(
    x: &SVector<f64, N>,
    t: f64,
    dt: f64,
    f: F,
) -> SVector<f64, N>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let k1 = f(t, x);
    let k2 = f(t + dt / 2.0, &(x + k1 * dt / 2.0));
    let k3 = f(t + dt / 2.0, &(x + k2 * dt / 2.0));
    let k4 = f(t + dt, &(x + k3 * dt));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// Integrate `f` over `duration` with RK4 sub-steps no longer than `max_step`
pub fn rk4_substepped<const N: usize, F>(
    x: &SVector<f64, N>,
    t: f64,
    duration: f64,
    max_step: f64,
    f: F,
) -> SVector<f64, N>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    if duration <= 0.0 {
        return *x;
    }
    let steps = (duration / max_step).ceil().max(1.0) as usize;
    let dt = duration / steps as f64;

    let mut state = *x;
    for i in 0..steps {
        state = rk4(&state, t + i as f64 * dt, dt, &f);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_rk4_exponential_decay() {
        // dx/dt = -x, x(0) = 1  =>  x(1) = e^-1
        let mut x = SVector::<f64, 1>::new(1.0);
        let dt = 0.01;
        let mut t = 0.0;

        for _ in 0..100 {
            x = rk4(&x, t, dt, |_t, x| -x);
            t += dt;
        }

        assert_relative_eq!(x[0], (-1.0_f64).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_rk4_unit_circle() {
        // Constant-speed turn: x' = cos θ, y' = sin θ, θ' = 1
        // After π seconds from the origin heading +x we reach (0, 2).
        let x0 = SVector::<f64, 3>::new(0.0, 0.0, 0.0);
        let x = rk4_substepped(&x0, 0.0, PI, 0.001, |_t, s| {
            SVector::<f64, 3>::new(s[2].cos(), s[2].sin(), 1.0)
        });

        assert_relative_eq!(x[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(x[1], 2.0, epsilon = 1e-6);
        assert_relative_eq!(x[2], PI, epsilon = 1e-9);
    }

    #[test]
    fn test_rk4_exponential_decay_coarse_step() {
        let mut x = SVector::<f64, 1>::new(1.0);
        let dt = 0.1;
        let mut t = 0.0;
        for _ in 0..10 {
            x = rk4(&x, t, dt, |_t, x| -x);
            t += dt;
        }
        assert!((x[0] - (-1.0_f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_substepped_zero_duration_is_identity() {
        let x0 = SVector::<f64, 2>::new(1.0, -2.0);
        let x = rk4_substepped(&x0, 0.0, 0.0, 0.01, |_t, s| s * 10.0);
        assert_eq!(x, x0);
    }
}
