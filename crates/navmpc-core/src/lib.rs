//! # navmpc Core
//!
//! Robot-side primitives for the receding-horizon trajectory tracker.
//! Nothing in this crate knows about the optimizer: it provides the
//! motion model the cost function rolls out, the polygon geometry the
//! obstacle encoder relies on, and a small simulator used to close the
//! loop in tests and demos.
//!
//! ## Modules
//!
//! - [`math`]: Angle utilities and numerical integrators
//! - [`geometry`]: Convex polygons, half-planes and distances
//! - [`dynamics`]: Unicycle state, control and discrete model
//! - [`simulation`]: Simulated differential-drive robot and moving obstacles

pub mod math;
pub mod geometry;
pub mod dynamics;
pub mod simulation;

use nalgebra::{Point2, Vector2};

/// Planar point type
pub type Pt2 = Point2<f64>;

/// Planar vector type
pub type Vec2 = Vector2<f64>;

pub use dynamics::{Control, State, UnicycleModel};
pub use geometry::{ConvexPolygon, HalfPlane};
