//! Robot dynamics
//!
//! - [`unicycle`]: Planar pose, velocity command and the discrete
//!   unicycle model shared by the cost function and the executor

pub mod unicycle;

pub use unicycle::*;
