//! Headless test apps and small canonical particle sets

use bevy::prelude::*;

use crate::hard::{HardManager, SystemHard};
use crate::physics::changeover::ChangeOver;
use crate::physics::math::{Scalar, Vector};
use crate::physics::neighbor::DirectNeighborSearch;
use crate::physics::particle::{Particle, SoftParticle};
use crate::physics::store::ParticleStore;

/// Tree step used by the fixtures
pub const TEST_DT: Scalar = 1.0 / 64.0;

/// Creates a minimal test app with the task pools and time, without any window
pub fn create_test_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app
}

/// Single with the default changeover and a search radius that covers it
pub fn soft_particle(id: i64, mass: Scalar, position: Vector, velocity: Vector) -> SoftParticle {
    SoftParticle::new(
        Particle::new(id, mass, position, velocity)
            .with_changeover(ChangeOver::default())
            .with_r_search(0.05),
    )
}

/// Circular binary of two equal masses with separation `a` around `center`, at rest
pub fn circular_binary(first_id: i64, mass: Scalar, a: Scalar, center: Vector, g: Scalar) -> [SoftParticle; 2] {
    let v = 0.5 * libm::sqrt(g * 2.0 * mass / a);
    [
        soft_particle(
            first_id,
            mass,
            center - Vector::new(0.5 * a, 0.0, 0.0),
            Vector::new(0.0, -v, 0.0),
        ),
        soft_particle(
            first_id + 1,
            mass,
            center + Vector::new(0.5 * a, 0.0, 0.0),
            Vector::new(0.0, v, 0.0),
        ),
    ]
}

/// Period of a circular binary built by [`circular_binary`]
pub fn circular_period(mass: Scalar, a: Scalar, g: Scalar) -> Scalar {
    2.0 * std::f64::consts::PI * libm::sqrt(a * a * a / (g * 2.0 * mass))
}

/// Tight binary (ids 1, 2) plus a third particle (id 3) within the search radius of the
/// pair but far outside the binding radius
pub fn binary_with_neighbor() -> ParticleStore {
    let mut particles = circular_binary(1, 1.0, 2e-3, Vector::ZERO, 1.0).to_vec();
    particles.push(soft_particle(
        3,
        1.0,
        Vector::new(0.0, 0.03, 0.0),
        Vector::new(0.0, 0.0, 0.1),
    ));
    particles.into_iter().collect()
}

/// Manager whose tidal radius fits the fixtures
pub fn test_manager() -> HardManager {
    HardManager {
        r_tidal_tensor: 5e-3,
        ..Default::default()
    }
}

/// Partition the store with a brute-force search and build the clusters
pub fn build_system(store: &mut ParticleStore, manager: HardManager) -> SystemHard {
    let mut system = SystemHard::new(manager).expect("valid test manager");
    let search = DirectNeighborSearch::new(store.as_slice());
    system.partition_store(store, &search).expect("partition");
    system.build_clusters(store, TEST_DT).expect("build");
    system
}

/// Total mass of the real particles, members counted with their live mass
pub fn real_mass(store: &ParticleStore) -> Scalar {
    store
        .iter()
        .filter(|p| !p.status.is_artificial())
        .map(|p| p.real_mass())
        .sum()
}
