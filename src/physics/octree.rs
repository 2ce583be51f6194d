//! Spatial octree answering symmetric search-radius neighbor queries.

use crate::physics::aabb3d::Aabb3d;
use crate::physics::math::{Scalar, Vector};
use crate::physics::neighbor::{NeighborEntry, NeighborSearch};
use crate::physics::particle::SoftParticle;

const PADDING_FACTOR: Scalar = 0.1;
const DEFAULT_LEAF_THRESHOLD: usize = 8;
const MAX_DEPTH: usize = 32;

#[derive(Debug)]
pub struct Octree {
    pub root: Option<OctreeNode>,
    pub leaf_threshold: usize, // Maximum entries per leaf node
}

#[derive(Debug)]
pub enum OctreeNode {
    Internal {
        bounds: Aabb3d,
        /// Largest search radius below this node, for symmetric pruning
        max_r_search: Scalar,
        children: Box<[Option<OctreeNode>; 8]>,
    },
    External {
        bounds: Aabb3d,
        max_r_search: Scalar,
        entries: Vec<NeighborEntry>,
    },
}

impl OctreeNode {
    pub fn bounds(&self) -> Aabb3d {
        match self {
            OctreeNode::Internal { bounds, .. } | OctreeNode::External { bounds, .. } => *bounds,
        }
    }

    fn max_r_search(&self) -> Scalar {
        match self {
            OctreeNode::Internal { max_r_search, .. } | OctreeNode::External { max_r_search, .. } => {
                *max_r_search
            }
        }
    }
}

impl Default for Octree {
    fn default() -> Self {
        Self::new()
    }
}

impl Octree {
    pub fn new() -> Self {
        Self {
            root: None,
            leaf_threshold: DEFAULT_LEAF_THRESHOLD,
        }
    }

    pub fn with_leaf_threshold(mut self, leaf_threshold: usize) -> Self {
        self.leaf_threshold = leaf_threshold.max(1);
        self
    }

    /// Build over every particle of the store, artificial particles included
    pub fn from_particles(particles: &[SoftParticle]) -> Self {
        let mut octree = Self::new();
        octree.build(
            particles
                .iter()
                .enumerate()
                .map(|(address, p)| NeighborEntry::from_particle(address, p)),
        );
        octree
    }

    pub fn build(&mut self, entries: impl IntoIterator<Item = NeighborEntry>) {
        let entries: Vec<NeighborEntry> = entries.into_iter().collect();
        self.root = Aabb3d::enclosing(entries.iter().map(|e| e.position), PADDING_FACTOR)
            .map(|bounds| Self::build_node(bounds, entries, self.leaf_threshold, 0));
    }

    fn build_node(
        bounds: Aabb3d,
        entries: Vec<NeighborEntry>,
        leaf_threshold: usize,
        depth: usize,
    ) -> OctreeNode {
        let max_r_search = entries.iter().map(|e| e.r_search).fold(0.0, Scalar::max);

        // Coincident positions cannot be separated; stop splitting at a fixed depth
        if entries.len() <= leaf_threshold || depth >= MAX_DEPTH {
            return OctreeNode::External {
                bounds,
                max_r_search,
                entries,
            };
        }

        let mut octant_entries: [Vec<NeighborEntry>; 8] = Default::default();
        for entry in entries {
            octant_entries[bounds.octant_of(entry.position)].push(entry);
        }

        let mut children: [Option<OctreeNode>; 8] = Default::default();
        for (i, entries_in_octant) in octant_entries.into_iter().enumerate() {
            if !entries_in_octant.is_empty() {
                children[i] = Some(Self::build_node(
                    bounds.octant(i),
                    entries_in_octant,
                    leaf_threshold,
                    depth + 1,
                ));
            }
        }

        OctreeNode::Internal {
            bounds,
            max_r_search,
            children: Box::new(children),
        }
    }

    fn collect(node: &OctreeNode, position: Vector, r_search: Scalar, out: &mut Vec<NeighborEntry>) {
        let reach = r_search.max(node.max_r_search());
        if node.bounds().distance_squared_to(position) >= reach * reach {
            return;
        }

        match node {
            OctreeNode::Internal { children, .. } => {
                for child in children.iter().flatten() {
                    Self::collect(child, position, r_search, out);
                }
            }
            OctreeNode::External { entries, .. } => {
                out.extend(entries.iter().filter(|entry| {
                    let radius = r_search.max(entry.r_search);
                    (entry.position - position).length_squared() < radius * radius
                }));
            }
        }
    }

    pub fn len(&self) -> usize {
        fn count(node: Option<&OctreeNode>) -> usize {
            match node {
                Some(OctreeNode::External { entries, .. }) => entries.len(),
                Some(OctreeNode::Internal { children, .. }) => {
                    children.iter().map(|child| count(child.as_ref())).sum()
                }
                None => 0,
            }
        }
        count(self.root.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

impl NeighborSearch for Octree {
    fn neighbors(&self, position: Vector, r_search: Scalar, out: &mut Vec<NeighborEntry>) {
        if let Some(root) = &self.root {
            Self::collect(root, position, r_search, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::neighbor::DirectNeighborSearch;
    use crate::physics::particle::Particle;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_particles(count: usize, seed: u64) -> Vec<SoftParticle> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..count)
            .map(|i| {
                let position = Vector::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                );
                SoftParticle::new(
                    Particle::new(i as i64, 1.0, position, Vector::ZERO)
                        .with_r_search(rng.random_range(0.05..0.3)),
                )
            })
            .collect()
    }

    fn sorted_addresses(entries: &[NeighborEntry]) -> Vec<usize> {
        let mut addresses: Vec<usize> = entries.iter().map(|e| e.address).collect();
        addresses.sort_unstable();
        addresses
    }

    #[test]
    fn test_octree_matches_direct_search() {
        let particles = random_particles(500, 11);
        let octree = Octree::from_particles(&particles);
        let direct = DirectNeighborSearch::new(&particles);

        for particle in particles.iter().step_by(7) {
            let mut from_tree = Vec::new();
            let mut from_direct = Vec::new();
            octree.neighbors(particle.position, particle.r_search, &mut from_tree);
            direct.neighbors(particle.position, particle.r_search, &mut from_direct);
            assert_eq!(sorted_addresses(&from_tree), sorted_addresses(&from_direct));
        }
    }

    #[test]
    fn test_query_is_symmetric_in_search_radius() {
        // The far particle has the large radius, so the near one still finds it
        let particles = vec![
            SoftParticle::new(Particle::new(0, 1.0, Vector::ZERO, Vector::ZERO).with_r_search(0.1)),
            SoftParticle::new(Particle::new(1, 1.0, Vector::X, Vector::ZERO).with_r_search(2.0)),
        ];
        let octree = Octree::from_particles(&particles);
        let mut out = Vec::new();
        octree.neighbors(particles[0].position, particles[0].r_search, &mut out);
        assert_eq!(sorted_addresses(&out), vec![0, 1]);
    }

    #[test]
    fn test_no_entry_duplication_with_coincident_points() {
        let particles: Vec<SoftParticle> = (0..40)
            .map(|i| SoftParticle::new(Particle::new(i, 1.0, Vector::ZERO, Vector::ZERO).with_r_search(0.1)))
            .collect();
        let octree = Octree::from_particles(&particles).with_leaf_threshold(2);
        assert_eq!(octree.len(), 40);
    }

    #[test]
    fn test_empty_tree_has_no_neighbors() {
        let octree = Octree::from_particles(&[]);
        let mut out = Vec::new();
        octree.neighbors(Vector::ZERO, 1.0, &mut out);
        assert!(out.is_empty());
        assert!(octree.is_empty());
    }
}
