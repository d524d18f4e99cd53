//! Simulation framework
//!
//! Closes the control loop without hardware: a differential-drive robot
//! integrated with RK4, a noisy odometry sensor, and constant-velocity
//! moving obstacles.

pub mod config;
pub mod sensors;
pub mod robot;
pub mod obstacle;

pub use config::*;
pub use sensors::*;
pub use robot::*;
pub use obstacle::*;
