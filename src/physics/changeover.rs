//! Changeover function blending the short-range (hard) and long-range (soft) force.
//!
//! Inside `r_in` the pair force belongs entirely to the hard integrator, beyond `r_out`
//! entirely to the long-range solver. In between the hard share falls off as
//! `W(r) = 1 - S(x)` with `x = (r - r_in) / (r_out - r_in)` and the C³-smooth step
//! `S(x) = x⁴ (35 - 84x + 70x² - 20x³)`.
//!
//! Radius changes are staged through `r_scale_next` so that forces already accumulated
//! with the old radii can be corrected by a difference instead of being recomputed.

use crate::physics::math::Scalar;
use serde::{Deserialize, Serialize};

/// Nodes of the 8-point Gauss–Legendre rule on [-1, 1] (positive half)
const GAUSS_NODES: [Scalar; 4] = [
    0.183_434_642_495_649_8,
    0.525_532_409_916_329_0,
    0.796_666_477_413_626_7,
    0.960_289_856_497_536_3,
];

const GAUSS_WEIGHTS: [Scalar; 4] = [
    0.362_683_783_378_362_0,
    0.313_706_645_877_887_3,
    0.222_381_034_453_374_5,
    0.101_228_536_290_376_3,
];

/// Coefficients of `S'(x) = 140 x³ (1 - x)³` in ascending powers of `x`
const SMOOTH_STEP_DERIVATIVE: [Scalar; 7] = [0.0, 0.0, 0.0, 140.0, -420.0, 420.0, -140.0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChangeOverRadii", into = "ChangeOverRadii")]
pub struct ChangeOver {
    r_in: Scalar,
    r_out: Scalar,
    norm: Scalar,
    /// Pending multiplier for both radii, committed by [`ChangeOver::update_with_r_scale`]
    pub r_scale_next: Scalar,
}

impl Default for ChangeOver {
    fn default() -> Self {
        Self::new(1e-3, 1e-2)
    }
}

impl ChangeOver {
    pub fn new(r_in: Scalar, r_out: Scalar) -> Self {
        let mut changeover = Self {
            r_in,
            r_out,
            norm: 0.0,
            r_scale_next: 1.0,
        };
        changeover.set_radii(r_in, r_out);
        changeover
    }

    #[inline]
    pub fn r_in(&self) -> Scalar {
        self.r_in
    }

    #[inline]
    pub fn r_out(&self) -> Scalar {
        self.r_out
    }

    pub fn set_radii(&mut self, r_in: Scalar, r_out: Scalar) {
        debug_assert!(r_in > 0.0 && r_out > r_in, "invalid changeover radii {r_in}, {r_out}");
        self.r_in = r_in;
        self.r_out = r_out;
        self.norm = 1.0 / (r_out - r_in);
    }

    /// Scale the base radii by the cube root of the mass factor
    pub fn set_radii_scaled(&mut self, mass_factor: Scalar, r_in_base: Scalar, r_out_base: Scalar) {
        let factor = libm::cbrt(mass_factor);
        self.set_radii(r_in_base * factor, r_out_base * factor);
    }

    /// True when a radius change is staged but not yet committed
    #[inline]
    pub fn has_pending_scale(&self) -> bool {
        self.r_scale_next != 1.0
    }

    /// Commit the staged radius multiplier and reset it to one
    pub fn update_with_r_scale(&mut self) {
        if self.has_pending_scale() {
            let scale = self.r_scale_next;
            self.set_radii(self.r_in * scale, self.r_out * scale);
            self.r_scale_next = 1.0;
        }
    }

    /// The state this changeover will have after the staged multiplier is committed
    pub fn with_staged_scale(&self) -> Self {
        let mut next = *self;
        next.update_with_r_scale();
        next
    }

    #[inline]
    fn reduced_distance(&self, r: Scalar) -> Scalar {
        ((r - self.r_in) * self.norm).clamp(0.0, 1.0)
    }

    /// Hard share of the pair force at distance `r` (1 inside `r_in`, 0 beyond `r_out`)
    pub fn acc_weight(&self, r: Scalar) -> Scalar {
        1.0 - smooth_step(self.reduced_distance(r))
    }

    /// Radial derivative of [`ChangeOver::acc_weight`], used for Hermite jerks
    pub fn acc_weight_derivative(&self, r: Scalar) -> Scalar {
        if r <= self.r_in || r >= self.r_out {
            return 0.0;
        }
        let x = self.reduced_distance(r);
        let y = x * (1.0 - x);
        -140.0 * y * y * y * self.norm
    }

    /// Hard share of the pair potential: `-G m Wp(r) / r` is the potential of the hard force.
    pub fn pot_weight(&self, r: Scalar) -> Scalar {
        if r >= self.r_out {
            return 0.0;
        }
        if r <= 0.0 {
            return 1.0;
        }

        let a = self.r_in;
        let b = self.r_out - self.r_in;
        let x0 = self.reduced_distance(r);

        // ∫_r^{r_out} S(s)/s² ds, integrated by parts into a boundary term and ∫ S'(x)/(a+bx)
        let boundary = smooth_step(x0) / (a + b * x0) - 1.0 / self.r_out;
        let tail = smooth_step_derivative_integral(a, b, x0);
        let integral = boundary + tail;

        1.0 - r / self.r_out - r * integral
    }

    /// Pair hard-force weight, decided by the partner with the larger outer radius
    pub fn acc_weight_pair(a: &ChangeOver, b: &ChangeOver, r: Scalar) -> Scalar {
        Self::dominant(a, b).acc_weight(r)
    }

    pub fn acc_weight_derivative_pair(a: &ChangeOver, b: &ChangeOver, r: Scalar) -> Scalar {
        Self::dominant(a, b).acc_weight_derivative(r)
    }

    pub fn pot_weight_pair(a: &ChangeOver, b: &ChangeOver, r: Scalar) -> Scalar {
        Self::dominant(a, b).pot_weight(r)
    }

    #[inline]
    fn dominant<'a>(a: &'a ChangeOver, b: &'a ChangeOver) -> &'a ChangeOver {
        if a.r_out > b.r_out { a } else { b }
    }
}

/// Serialized form; the normalization is derived on load
#[derive(Serialize, Deserialize)]
struct ChangeOverRadii {
    r_in: Scalar,
    r_out: Scalar,
    r_scale_next: Scalar,
}

impl From<ChangeOverRadii> for ChangeOver {
    fn from(radii: ChangeOverRadii) -> Self {
        let mut changeover = ChangeOver::new(radii.r_in, radii.r_out);
        changeover.r_scale_next = radii.r_scale_next;
        changeover
    }
}

impl From<ChangeOver> for ChangeOverRadii {
    fn from(changeover: ChangeOver) -> Self {
        Self {
            r_in: changeover.r_in,
            r_out: changeover.r_out,
            r_scale_next: changeover.r_scale_next,
        }
    }
}

#[inline]
fn smooth_step(x: Scalar) -> Scalar {
    let x2 = x * x;
    x2 * x2 * (((-20.0 * x + 70.0) * x - 84.0) * x + 35.0)
}

/// `∫_{x0}^{1} S'(x) / (a + b x) dx` for `a > 0`, `b > 0`
fn smooth_step_derivative_integral(a: Scalar, b: Scalar, x0: Scalar) -> Scalar {
    if x0 >= 1.0 {
        return 0.0;
    }
    let c = a / b;

    if c >= 1.0 {
        // Pole far from the interval: quadrature converges geometrically
        let half = 0.5 * (1.0 - x0);
        let mid = 0.5 * (1.0 + x0);
        let integrand = |x: Scalar| {
            let y = x * (1.0 - x);
            140.0 * y * y * y / (x + c)
        };
        let sum: Scalar = GAUSS_NODES
            .iter()
            .zip(GAUSS_WEIGHTS.iter())
            .map(|(&t, &w)| w * (integrand(mid - half * t) + integrand(mid + half * t)))
            .sum();
        return sum * half / b;
    }

    // Synthetic division of S'(x) by (x + c): quotient q (degree 5) plus remainder
    let p = SMOOTH_STEP_DERIVATIVE;
    let mut q = [0.0; 6];
    q[5] = p[6];
    for k in (0..5).rev() {
        q[k] = p[k + 1] - c * q[k + 1];
    }
    let remainder = p[0] - c * q[0];

    let mut polynomial = 0.0;
    let mut x_power = x0;
    for (k, coefficient) in q.iter().enumerate() {
        let n = (k + 1) as Scalar;
        polynomial += coefficient * (1.0 - x_power) / n;
        x_power *= x0;
    }
    let logarithm = remainder * libm::log((1.0 + c) / (x0 + c));

    (polynomial + logarithm) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Scalar, b: Scalar, tolerance: Scalar) {
        assert!((a - b).abs() < tolerance, "{a} != {b} (tolerance {tolerance})");
    }

    #[test]
    fn test_acc_weight_limits() {
        let changeover = ChangeOver::new(0.1, 1.0);
        assert_eq!(changeover.acc_weight(0.05), 1.0);
        assert_eq!(changeover.acc_weight(0.1), 1.0);
        assert_eq!(changeover.acc_weight(1.0), 0.0);
        assert_eq!(changeover.acc_weight(3.0), 0.0);
        assert_close(changeover.acc_weight(0.55), 0.5, 1e-14);
    }

    #[test]
    fn test_acc_weight_is_monotone() {
        let changeover = ChangeOver::new(0.2, 1.0);
        let mut previous = 1.0;
        for i in 0..=200 {
            let r = 0.2 + 0.8 * i as Scalar / 200.0;
            let w = changeover.acc_weight(r);
            assert!(w <= previous + 1e-15, "weight increased at r = {r}");
            previous = w;
        }
    }

    #[test]
    fn test_acc_weight_derivative_matches_finite_difference() {
        let changeover = ChangeOver::new(0.3, 1.2);
        let h = 1e-6;
        for r in [0.35, 0.5, 0.75, 1.0, 1.15] {
            let numeric = (changeover.acc_weight(r + h) - changeover.acc_weight(r - h)) / (2.0 * h);
            assert_close(changeover.acc_weight_derivative(r), numeric, 1e-7);
        }
    }

    #[test]
    fn test_pot_weight_limits() {
        for (r_in, r_out) in [(0.1, 1.0), (0.6, 1.0)] {
            let changeover = ChangeOver::new(r_in, r_out);
            assert_eq!(changeover.pot_weight(r_out), 0.0);
            assert_eq!(changeover.pot_weight(2.0 * r_out), 0.0);
            assert_close(changeover.pot_weight(1e-9), 1.0, 1e-6);
        }
    }

    #[test]
    fn test_pot_weight_is_consistent_with_force() {
        // d/dr (Wp / r) = -W / r², for both the analytic and the quadrature branch
        for (r_in, r_out) in [(0.1, 1.0), (0.3, 1.0), (0.7, 1.0)] {
            let changeover = ChangeOver::new(r_in, r_out);
            let h = 1e-6;
            for i in 1..20 {
                let r = 0.05 + (r_out - 0.05) * i as Scalar / 20.0;
                let phi = |r: Scalar| changeover.pot_weight(r) / r;
                let numeric = (phi(r + h) - phi(r - h)) / (2.0 * h);
                let expected = -changeover.acc_weight(r) / (r * r);
                assert_close(numeric, expected, 1e-6 * (1.0 + expected.abs()));
            }
        }
    }

    #[test]
    fn test_pot_weight_inside_inner_radius_is_newtonian_plus_constant() {
        let changeover = ChangeOver::new(0.2, 1.0);
        // Inside r_in the hard potential is -1/r + const, so Wp(r) = 1 - k r
        let w1 = changeover.pot_weight(0.05);
        let w2 = changeover.pot_weight(0.1);
        let slope = (w2 - w1) / 0.05;
        assert_close(changeover.pot_weight(0.15), w2 + slope * 0.05, 1e-12);
    }

    #[test]
    fn test_pair_weight_uses_larger_outer_radius() {
        let small = ChangeOver::new(0.1, 0.5);
        let large = ChangeOver::new(0.2, 1.0);
        let r = 0.6;
        assert_eq!(ChangeOver::acc_weight_pair(&small, &large, r), large.acc_weight(r));
        assert_eq!(ChangeOver::acc_weight_pair(&large, &small, r), large.acc_weight(r));
        assert!(ChangeOver::acc_weight_pair(&small, &large, r) > 0.0);
    }

    #[test]
    fn test_mass_scaled_radii() {
        let mut changeover = ChangeOver::default();
        changeover.set_radii_scaled(8.0, 0.1, 0.5);
        assert_close(changeover.r_in(), 0.2, 1e-14);
        assert_close(changeover.r_out(), 1.0, 1e-14);
    }

    #[test]
    fn test_update_with_r_scale_commits_once() {
        let mut changeover = ChangeOver::new(0.1, 1.0);
        changeover.r_scale_next = 2.0;

        let staged = changeover.with_staged_scale();
        assert_close(staged.r_in(), 0.2, 1e-15);
        assert_eq!(changeover.r_in(), 0.1, "preview must not mutate");

        changeover.update_with_r_scale();
        assert_close(changeover.r_in(), 0.2, 1e-15);
        assert_close(changeover.r_out(), 2.0, 1e-15);
        assert_eq!(changeover.r_scale_next, 1.0);

        changeover.update_with_r_scale();
        assert_close(changeover.r_out(), 2.0, 1e-15);
    }
}
