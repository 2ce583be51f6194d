//! Two-body orbital elements used to place orbital samples and to test binding.

use crate::physics::math::{Scalar, Vector, perpendicular_unit};
use std::f64::consts::TAU;

const KEPLER_TOLERANCE: Scalar = 1e-14;
const KEPLER_MAX_ITERATIONS: usize = 64;

/// Bound relative orbit of the second body around the first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeplerOrbit {
    pub semi: Scalar,
    pub ecc: Scalar,
    pub period: Scalar,
    /// Mean anomaly at the moment the elements were taken
    pub mean_anomaly: Scalar,
    p_hat: Vector,
    q_hat: Vector,
}

/// Specific relative energy `v²/2 - G M / r` of a pair
pub fn relative_energy(total_mass: Scalar, dx: Vector, dv: Vector, g: Scalar) -> Scalar {
    0.5 * dv.length_squared() - g * total_mass / dx.length()
}

impl KeplerOrbit {
    /// Elements from relative position `dx = x2 - x1` and velocity `dv = v2 - v1`.
    /// Returns `None` for unbound or collapsed pairs.
    pub fn from_relative(total_mass: Scalar, dx: Vector, dv: Vector, g: Scalar) -> Option<Self> {
        let mu = g * total_mass;
        let r = dx.length();
        if mu <= 0.0 || r <= 0.0 {
            return None;
        }

        let energy = relative_energy(total_mass, dx, dv, g);
        if energy >= 0.0 {
            return None;
        }

        let semi = -0.5 * mu / energy;
        let h = dx.cross(dv);
        let ecc_vector = dv.cross(h) / mu - dx / r;
        let ecc = ecc_vector.length().min(1.0 - 1e-12);

        let p_hat = if ecc > 1e-10 { ecc_vector / ecc } else { dx / r };
        let q_hat = if h.length_squared() > 0.0 {
            h.normalize().cross(p_hat)
        } else {
            perpendicular_unit(p_hat)
        };

        // Eccentric anomaly from the current separation and radial velocity
        let eccentric = if ecc > 1e-10 {
            let cos_e = ((1.0 - r / semi) / ecc).clamp(-1.0, 1.0);
            let sin_e = dx.dot(dv) / (ecc * libm::sqrt(mu * semi));
            libm::atan2(sin_e, cos_e)
        } else {
            libm::atan2(dx.dot(q_hat), dx.dot(p_hat))
        };
        let mean_anomaly = (eccentric - ecc * libm::sin(eccentric)).rem_euclid(TAU);

        Some(Self {
            semi,
            ecc,
            period: TAU * libm::sqrt(semi * semi * semi / mu),
            mean_anomaly,
            p_hat,
            q_hat,
        })
    }

    #[inline]
    pub fn apocenter(&self) -> Scalar {
        self.semi * (1.0 + self.ecc)
    }

    /// Relative position `x2 - x1` at the given mean anomaly
    pub fn relative_position_at(&self, mean_anomaly: Scalar) -> Vector {
        let eccentric = solve_kepler(mean_anomaly.rem_euclid(TAU), self.ecc);
        let (sin_e, cos_e) = (libm::sin(eccentric), libm::cos(eccentric));
        let b = self.semi * libm::sqrt(1.0 - self.ecc * self.ecc);
        self.p_hat * (self.semi * (cos_e - self.ecc)) + self.q_hat * (b * sin_e)
    }

    /// Relative positions at `n` mean anomalies evenly spaced from the current phase
    pub fn sample_relative_positions(&self, n: usize) -> Vec<Vector> {
        (0..n)
            .map(|k| self.relative_position_at(self.mean_anomaly + TAU * k as Scalar / n as Scalar))
            .collect()
    }
}

fn solve_kepler(mean_anomaly: Scalar, ecc: Scalar) -> Scalar {
    let mut eccentric = if ecc < 0.8 { mean_anomaly } else { std::f64::consts::PI };
    for _ in 0..KEPLER_MAX_ITERATIONS {
        let f = eccentric - ecc * libm::sin(eccentric) - mean_anomaly;
        let step = f / (1.0 - ecc * libm::cos(eccentric));
        eccentric -= step;
        if step.abs() < KEPLER_TOLERANCE {
            break;
        }
    }
    eccentric
}
