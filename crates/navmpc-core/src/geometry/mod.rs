//! Planar geometry
//!
//! Convex polygons with a canonical vertex ordering, their half-plane
//! representation, and point/segment distances.

pub mod polygon;

pub use polygon::*;
