//! Random star clusters with primordial binaries for the driver binary and benchmarks.

use rand::Rng;

use crate::config::ScenarioConfig;
use crate::hard::HardManager;
use crate::physics::changeover::ChangeOver;
use crate::physics::math::{Scalar, Vector, center_of_mass, perpendicular_unit, random_unit_vector};
use crate::physics::particle::{Particle, SoftParticle};
use crate::physics::store::ParticleStore;
use crate::resources::SharedRng;

/// Uniform sphere of singles plus circular binaries, moved to the center-of-mass frame.
///
/// Ids start at 1 and binary components get consecutive ids.
pub fn generate_cluster(scenario: &ScenarioConfig, manager: &HardManager, rng: &mut SharedRng) -> ParticleStore {
    let mass = scenario.particle_mass;
    let mut particles = Vec::with_capacity(scenario.n_singles + 2 * scenario.n_binaries);
    let mut next_id = 1;

    let random_state = |rng: &mut SharedRng| {
        let r = scenario.cluster_radius * libm::cbrt(rng.random::<Scalar>());
        let speed = scenario.velocity_dispersion * libm::sqrt(rng.random::<Scalar>());
        (random_unit_vector(rng) * r, random_unit_vector(rng) * speed)
    };

    for _ in 0..scenario.n_singles {
        let (position, velocity) = random_state(rng);
        particles.push(Particle::new(next_id, mass, position, velocity));
        next_id += 1;
    }

    for _ in 0..scenario.n_binaries {
        let (position, velocity) = random_state(rng);
        let semi = rng.random_range(scenario.binary_semi_min..=scenario.binary_semi_max);
        let axis = random_unit_vector(rng);
        let speed = libm::sqrt(manager.g * 2.0 * mass / semi);
        let dx = axis * (0.5 * semi);
        let dv = perpendicular_unit(axis) * (0.5 * speed);
        particles.push(Particle::new(next_id, mass, position - dx, velocity - dv));
        particles.push(Particle::new(next_id + 1, mass, position + dx, velocity + dv));
        next_id += 2;
    }

    let (_, cm_position, cm_velocity) =
        center_of_mass(particles.iter().map(|p| (p.mass, p.position, p.velocity)));
    particles
        .into_iter()
        .map(|mut p| {
            p.position -= cm_position;
            p.velocity -= cm_velocity;
            let mut changeover = ChangeOver::default();
            changeover.set_radii_scaled(p.mass * manager.mean_mass_inv, manager.r_in_base, manager.r_out_base);
            p.changeover = changeover;
            p.calc_r_search(scenario.dt_tree, manager.search_factor, manager.r_search_min);
            SoftParticle::new(p)
        })
        .collect()
}

/// Kinetic plus pairwise potential energy of the real particles, without softening
pub fn total_energy(store: &ParticleStore, g: Scalar) -> Scalar {
    let real: Vec<(Scalar, Vector, Vector)> = store
        .iter()
        .filter(|p| !p.status.is_artificial())
        .map(|p| (p.real_mass(), p.position, p.velocity))
        .collect();
    let kinetic: Scalar = real.iter().map(|(m, _, v)| 0.5 * m * v.length_squared()).sum();
    let potential: Scalar = real
        .iter()
        .enumerate()
        .flat_map(|(i, a)| real[i + 1..].iter().map(move |b| (a, b)))
        .map(|((ma, xa, _), (mb, xb, _))| -g * ma * mb / (*xa - *xb).length())
        .sum();
    kinetic + potential
}
