//! Hard part of a hybrid tree/direct N-body integrator.
//!
//! Particles closer than their changeover radii are split off from the long-range tree
//! force into clusters. Bound groups inside a cluster get artificial particles that
//! carry their tidal field and orbital mass to the tree, and every cluster is
//! integrated in parallel by a regularized or a block-Hermite engine.

pub mod cli;
pub mod config;
pub mod error;
pub mod hard;
pub mod physics;
pub mod plugins;
pub mod prelude;
pub mod resources;
pub mod scenario;

// Test utilities are public for integration tests
pub mod test_utils;

pub use config::SimulationConfig;
pub use error::{HardError, HardResult};
pub use hard::{HardManager, SystemHard};
pub use physics::math::{Scalar, Vector};
pub use plugins::HardStepPlugin;
