//! Position-Extended Forest-Ruth-Like (PEFRL) composition
//!
//! A 4th-order symmetric composition of five drifts and four kicks. Used in place of
//! the leapfrog when a regularized group needs fewer, more accurate steps per orbit;
//! in LogH variables it keeps the exact Kepler energy behavior of the leapfrog while
//! reducing the phase error.

use super::{SplitSystem, SymplecticScheme};
use crate::physics::math::Scalar;

/// PEFRL composition
///
/// ```text
/// drift ξ, kick (1-2λ)/2, drift χ, kick λ, drift 1-2(χ+ξ), kick λ, drift χ, kick (1-2λ)/2, drift ξ
/// ```
///
/// Drift and kick coefficients each sum to one, and the palindromic sequence makes the
/// step time-reversible.
///
/// # Reference
///
/// Omelyan, Mryglod, Folk (2002) "Optimized Forest-Ruth- and Suzuki-like algorithms
/// for integration of motion in many-body systems", Computer Physics Communications
/// 146(2), 188-202.
#[derive(Debug, Clone, Default)]
pub struct Pefrl;

impl Pefrl {
    const XI: Scalar = 0.178_617_895_844_809_1;
    const LAMBDA: Scalar = -0.212_341_831_062_605_4;
    const CHI: Scalar = -0.066_264_582_669_818_5;
    const COEFF_A: Scalar = 0.5 * (1.0 - 2.0 * Pefrl::LAMBDA);
    const COEFF_B: Scalar = 1.0 - 2.0 * (Pefrl::CHI + Pefrl::XI);
}

impl SymplecticScheme for Pefrl {
    fn clone_box(&self) -> Box<dyn SymplecticScheme> {
        Box::new(self.clone())
    }

    fn step(&self, system: &mut dyn SplitSystem, ds: Scalar) {
        system.drift(Pefrl::XI * ds);
        system.kick(Pefrl::COEFF_A * ds);
        system.drift(Pefrl::CHI * ds);
        system.kick(Pefrl::LAMBDA * ds);

        // Middle drift
        system.drift(Pefrl::COEFF_B * ds);

        system.kick(Pefrl::LAMBDA * ds);
        system.drift(Pefrl::CHI * ds);
        system.kick(Pefrl::COEFF_A * ds);
        system.drift(Pefrl::XI * ds);
    }

    fn convergence_order(&self) -> usize {
        4
    }

    fn name(&self) -> &'static str {
        "pefrl"
    }

    fn aliases(&self) -> Vec<&'static str> {
        vec!["forest_ruth", "fr4"]
    }
}
