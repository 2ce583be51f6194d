//! Particles, changeover kernels, neighbor search and the integration engines.

pub mod aabb3d;
pub mod changeover;
pub mod group_layout;
pub mod group_search;
pub mod integrators;
pub mod kepler;
pub mod math;
pub mod neighbor;
pub mod octree;
pub mod particle;
pub mod soft;
pub mod store;
pub mod tidal_tensor;
