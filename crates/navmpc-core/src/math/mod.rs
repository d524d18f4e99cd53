//! Mathematical utilities
//!
//! Heading arithmetic on the circle and the integrators used by the
//! simulator.

pub mod angle;
pub mod integrator;

pub use angle::*;
pub use integrator::*;
