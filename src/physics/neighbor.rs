//! Neighbor queries consumed by the force correction.

use crate::physics::changeover::ChangeOver;
use crate::physics::math::{Scalar, Vector};
use crate::physics::particle::{Particle, ParticleStatus, SoftParticle};

/// Snapshot of a neighbor as the tree saw it during the force pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborEntry {
    pub address: usize,
    pub id: i64,
    pub mass: Scalar,
    pub position: Vector,
    pub status: ParticleStatus,
    pub changeover: ChangeOver,
    pub r_search: Scalar,
}

impl NeighborEntry {
    pub fn from_particle(address: usize, particle: &Particle) -> Self {
        Self {
            address,
            id: particle.id,
            mass: particle.mass,
            position: particle.position,
            status: particle.status,
            changeover: particle.changeover,
            r_search: particle.r_search,
        }
    }
}

pub trait NeighborSearch: Send + Sync {
    /// Append every entry `j` with `|x - x_j| < max(r_search, r_search_j)` to `out`,
    /// the querying particle itself included.
    fn neighbors(&self, position: Vector, r_search: Scalar, out: &mut Vec<NeighborEntry>);
}

/// Exhaustive search over a snapshot; the reference the octree is tested against
#[derive(Debug, Clone, Default)]
pub struct DirectNeighborSearch {
    entries: Vec<NeighborEntry>,
}

impl DirectNeighborSearch {
    pub fn new(particles: &[SoftParticle]) -> Self {
        Self {
            entries: particles
                .iter()
                .enumerate()
                .map(|(address, p)| NeighborEntry::from_particle(address, p))
                .collect(),
        }
    }
}

impl NeighborSearch for DirectNeighborSearch {
    fn neighbors(&self, position: Vector, r_search: Scalar, out: &mut Vec<NeighborEntry>) {
        out.extend(self.entries.iter().filter(|entry| {
            let radius = r_search.max(entry.r_search);
            (entry.position - position).length_squared() < radius * radius
        }));
    }
}
