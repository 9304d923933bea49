//! Engine data structures.
//!
//! - `model` holds imported meshes, materials and their GPU counterparts
//! - `texture` holds texture cache keys and uploaded texture resources

pub mod model;
pub mod texture;
