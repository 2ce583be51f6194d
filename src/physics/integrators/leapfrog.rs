//! Second-order drift-kick-drift composition.

use super::{SplitSystem, SymplecticScheme};
use crate::physics::math::Scalar;

/// Drift half a step, kick a full step, drift half a step.
///
/// In the time-transformed LogH variables this is already an exact integrator for the
/// unperturbed Kepler problem up to phase error, which is why it is the default scheme
/// for the regularized engine.
#[derive(Debug, Clone, Default)]
pub struct Leapfrog;

impl SymplecticScheme for Leapfrog {
    fn clone_box(&self) -> Box<dyn SymplecticScheme> {
        Box::new(self.clone())
    }

    fn step(&self, system: &mut dyn SplitSystem, ds: Scalar) {
        system.drift(0.5 * ds);
        system.kick(ds);
        system.drift(0.5 * ds);
    }

    fn convergence_order(&self) -> usize {
        2
    }

    fn name(&self) -> &'static str {
        "leapfrog"
    }

    fn aliases(&self) -> Vec<&'static str> {
        vec!["dkd", "verlet"]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::physics::math::Vector;

    /// Unit harmonic oscillator split into `T(v)` and `V(x)`
    pub(crate) struct Oscillator {
        pub position: Vector,
        pub velocity: Vector,
    }

    impl Oscillator {
        pub fn energy(&self) -> Scalar {
            0.5 * (self.velocity.length_squared() + self.position.length_squared())
        }
    }

    impl SplitSystem for Oscillator {
        fn drift(&mut self, ds: Scalar) {
            self.position += self.velocity * ds;
        }

        fn kick(&mut self, ds: Scalar) {
            self.velocity -= self.position * ds;
        }
    }

    #[test]
    fn test_leapfrog_bounded_energy_error() {
        let mut system = Oscillator {
            position: Vector::X,
            velocity: Vector::ZERO,
        };
        let initial = system.energy();

        for _ in 0..10_000 {
            Leapfrog.step(&mut system, 0.01);
        }

        let error = (system.energy() - initial).abs() / initial;
        assert!(error < 1e-4, "Energy error {error}");
    }

    #[test]
    fn test_leapfrog_is_time_reversible() {
        let mut system = Oscillator {
            position: Vector::new(0.3, -0.2, 1.0),
            velocity: Vector::new(0.1, 0.5, 0.0),
        };
        let start = (system.position, system.velocity);

        for _ in 0..100 {
            Leapfrog.step(&mut system, 0.05);
        }
        for _ in 0..100 {
            Leapfrog.step(&mut system, -0.05);
        }

        assert!((system.position - start.0).length() < 1e-12);
        assert!((system.velocity - start.1).length() < 1e-12);
    }
}
