//! Heading utilities

use std::f64::consts::PI;

/// Wrap an angle to (-π, π]
pub fn wrap_to_pi(angle: f64) -> f64 {
    let wrapped = angle.sin().atan2(angle.cos());
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Smooth heading error `2(1 - cos(a - b))`
///
/// Equals `(a - b)²` to second order, has no discontinuity at ±π and is
/// differentiable everywhere, which is what the optimizer needs.
pub fn heading_error(a: f64, b: f64) -> f64 {
    2.0 * (1.0 - (a - b).cos())
}

/// Derivative of [`heading_error`] with respect to `a`
pub fn heading_error_grad(a: f64, b: f64) -> f64 {
    2.0 * (a - b).sin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wrap_to_pi() {
        assert_relative_eq!(wrap_to_pi(0.0), 0.0);
        assert_relative_eq!(wrap_to_pi(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(-3.0 * PI).abs(), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(2.5 * PI), 0.5 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_error_matches_square_for_small_angles() {
        let e = heading_error(0.01, 0.0);
        assert_relative_eq!(e, 1e-4, epsilon = 1e-9);
        assert_relative_eq!(heading_error(1.0 + 2.0 * PI, 1.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_error_grad_finite_difference() {
        let (a, b, h) = (0.7, -0.4, 1e-6);
        let fd = (heading_error(a + h, b) - heading_error(a - h, b)) / (2.0 * h);
        assert_relative_eq!(heading_error_grad(a, b), fd, epsilon = 1e-6);
    }
}
