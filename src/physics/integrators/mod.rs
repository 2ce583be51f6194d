//! Integration engines used by the hard step.
//!
//! Two engines cover every cluster shape: [`RegularizedIntegrator`] (LogH algorithmic
//! regularization with slowdown) for a single bound group, and [`HermiteIntegrator`]
//! (4th-order block time steps) when singles and groups share a cluster. The
//! regularized engine delegates its stepping to a [`SymplecticScheme`] picked from the
//! [`SchemeRegistry`] by name.

use crate::error::HardResult;
use crate::physics::math::Scalar;

pub mod hermite;
pub mod leapfrog;
pub mod pefrl;
pub mod registry;
pub mod regularized;

pub use hermite::{HermiteIntegrator, HermiteManager};
pub use leapfrog::Leapfrog;
pub use pefrl::Pefrl;
pub use registry::SchemeRegistry;
pub use regularized::{RegularizedIntegrator, RegularizedManager};

/// A Hamiltonian split into two exactly solvable flows
pub trait SplitSystem {
    /// Advance the flow that moves positions
    fn drift(&mut self, ds: Scalar);

    /// Advance the flow that moves velocities
    fn kick(&mut self, ds: Scalar);
}

/// Symmetric composition of drift and kick sub-steps
pub trait SymplecticScheme: Send + Sync {
    fn clone_box(&self) -> Box<dyn SymplecticScheme>;

    /// Advance `system` by one step of length `ds` in the integration variable
    fn step(&self, system: &mut dyn SplitSystem, ds: Scalar);

    fn convergence_order(&self) -> usize;

    fn name(&self) -> &'static str;

    fn aliases(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

impl Clone for Box<dyn SymplecticScheme> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn SymplecticScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The closed set of engines a cluster can be driven with
#[derive(Debug, Clone)]
pub enum Engine {
    Regularized(RegularizedIntegrator),
    Combined(HermiteIntegrator),
}

impl Engine {
    pub fn integrate_to(&mut self, time_end: Scalar) -> HardResult<()> {
        match self {
            Engine::Regularized(ar) => ar.integrate_to(time_end),
            Engine::Combined(hermite) => hermite.integrate_to(time_end),
        }
    }

    /// Current energy minus the initial energy corrected for perturbation work
    pub fn energy_error(&self) -> Scalar {
        match self {
            Engine::Regularized(ar) => ar.energy_error(),
            Engine::Combined(hermite) => hermite.energy_error(),
        }
    }

    pub fn energy(&self) -> Scalar {
        match self {
            Engine::Regularized(ar) => ar.energy(),
            Engine::Combined(hermite) => hermite.energy(),
        }
    }

    pub fn step_count(&self) -> usize {
        match self {
            Engine::Regularized(ar) => ar.step_count(),
            Engine::Combined(hermite) => hermite.step_count(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Engine::Regularized(_) => "regularized",
            Engine::Combined(_) => "hermite",
        }
    }
}
