//! Direct-summation stand-in for the long-range solver.
//!
//! Every pair interacts through a linear cutoff: Newtonian beyond `r_out`, and the
//! field of a uniform sphere of radius `r_out` inside it. This is exactly the term the
//! force correction removes again at short range, so the corrected total equals the
//! changeover-weighted split that the hard integrator assumes.

use crate::hard::parallel::{par_for_each_mut, par_map};
use crate::physics::math::{Scalar, Vector};
use crate::physics::particle::SoftParticle;
use crate::physics::store::ParticleStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftForceParams {
    pub g: Scalar,
    pub eps_sq: Scalar,
    pub r_out: Scalar,
}

/// Acceleration and potential on `i` from `j` under the linear cutoff
#[inline]
pub fn linear_cutoff_pair(params: &SoftForceParams, dr: Vector, m_j: Scalar) -> (Vector, Scalar) {
    let r_eps = libm::sqrt(dr.length_squared() + params.eps_sq);
    let r_max = r_eps.max(params.r_out);
    let inv_r_max = 1.0 / r_max;
    let gm = params.g * m_j;
    (-dr * (gm * inv_r_max * inv_r_max * inv_r_max), -gm * inv_r_max)
}

/// Fill `acc` and `pot_tot` of every store particle.
///
/// The potential includes each particle's interaction with itself, `-G m / r_out`.
pub fn compute_soft_force(store: &mut ParticleStore, params: &SoftForceParams) {
    let sources: Vec<(Vector, Scalar)> = store
        .iter()
        .map(|p| (p.position, p.mass))
        .filter(|&(_, m)| m > 0.0)
        .collect();

    let fields = par_map(store.as_slice(), |_, p: &SoftParticle| {
        let mut acc = Vector::ZERO;
        let mut pot = 0.0;
        for &(position, mass) in &sources {
            let (a, phi) = linear_cutoff_pair(params, p.position - position, mass);
            acc += a;
            pot += phi;
        }
        (acc, pot)
    });

    for (p, (acc, pot)) in store.iter_mut().zip(fields) {
        p.acc = acc;
        p.pot_tot = pot;
    }
}

/// `v += a dt` for every real particle; artificial particles are rebuilt every step
pub fn kick(store: &mut ParticleStore, dt: Scalar) {
    par_for_each_mut(store.as_mut_slice(), |_, p| {
        if !p.status.is_artificial() {
            let dv = p.acc * dt;
            p.velocity += dv;
        }
    });
}

/// `x += v dt` for the given particles
pub fn drift(particles: &mut [SoftParticle], dt: Scalar) {
    par_for_each_mut(particles, |_, p| {
        let dx = p.velocity * dt;
        p.position += dx;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::particle::Particle;

    fn params() -> SoftForceParams {
        SoftForceParams {
            g: 1.0,
            eps_sq: 0.0,
            r_out: 0.1,
        }
    }

    fn store(particles: &[(Scalar, Vector)]) -> ParticleStore {
        particles
            .iter()
            .enumerate()
            .map(|(i, &(m, x))| SoftParticle::from(Particle::new(i as i64, m, x, Vector::ZERO)))
            .collect()
    }

    #[test]
    fn test_newtonian_beyond_cutoff() {
        let mut store = store(&[(1.0, Vector::ZERO), (2.0, Vector::new(1.0, 0.0, 0.0))]);
        compute_soft_force(&mut store, &params());

        assert!((store[0].acc - Vector::new(2.0, 0.0, 0.0)).length() < 1e-14);
        assert!((store[1].acc - Vector::new(-1.0, 0.0, 0.0)).length() < 1e-14);
        // -2/1 from the partner and -1/0.1 from itself
        assert!((store[0].pot_tot - (-2.0 - 10.0)).abs() < 1e-12);
    }

    #[test]
    fn test_linear_inside_cutoff() {
        let (acc, pot) = linear_cutoff_pair(&params(), Vector::new(0.05, 0.0, 0.0), 1.0);
        assert!((acc.x + 0.05 / 1e-3).abs() < 1e-9);
        assert!((pot + 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_massless_particles_feel_but_do_not_source() {
        let mut store = store(&[(1.0, Vector::ZERO), (0.0, Vector::new(1.0, 0.0, 0.0))]);
        compute_soft_force(&mut store, &params());
        assert!((store[0].acc).length() < 1e-14);
        assert!((store[1].acc - Vector::new(-1.0, 0.0, 0.0)).length() < 1e-14);
    }

    #[test]
    fn test_kick_and_drift() {
        let mut store = store(&[(1.0, Vector::ZERO)]);
        store[0].acc = Vector::new(0.0, 2.0, 0.0);
        kick(&mut store, 0.5);
        drift(store.as_mut_slice(), 2.0);
        assert_eq!(store[0].velocity, Vector::new(0.0, 1.0, 0.0));
        assert_eq!(store[0].position, Vector::new(0.0, 2.0, 0.0));
    }
}
