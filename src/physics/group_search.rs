//! Detection of bound multiples inside a cluster.

use crate::physics::kepler::relative_energy;
use crate::physics::math::{Scalar, Vector};
use crate::physics::particle::HardParticle;

/// One bound group as indices into the cluster, first component first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedGroup {
    pub members: Vec<usize>,
    pub n_members_1st: usize,
}

impl DetectedGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub groups: Vec<DetectedGroup>,
    pub singles: Vec<usize>,
}

impl Grouping {
    pub fn n_grouped(&self) -> usize {
        self.groups.iter().map(DetectedGroup::len).sum()
    }

    /// Cluster indices in build order: groups in turn, then singles
    pub fn ordering(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups
            .iter()
            .flat_map(|g| g.members.iter().copied())
            .chain(self.singles.iter().copied())
    }
}

pub trait GroupDetector: Send + Sync {
    /// Partition `particles` into bound groups and singles using binding distance `r_bin`
    fn detect(&self, particles: &[HardParticle], r_bin: Scalar, g: Scalar) -> Grouping;
}

/// Hierarchical merge of the closest bound pair closer than `r_bin`.
///
/// Pairs of nodes (particles or already merged groups) are merged while any pair is
/// gravitationally bound and their centers are within `r_bin`, so triples and
/// quadruples emerge as a binary of sub-groups. Output order is deterministic: groups
/// sorted by their smallest member index, singles ascending.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingGroupDetector;

#[derive(Debug, Clone)]
struct Node {
    members: Vec<usize>,
    n_members_1st: usize,
    mass: Scalar,
    position: Vector,
    velocity: Vector,
}

impl Node {
    fn merge(first: Node, second: Node) -> Node {
        let mass = first.mass + second.mass;
        let (position, velocity) = if mass > 0.0 {
            (
                (first.position * first.mass + second.position * second.mass) / mass,
                (first.velocity * first.mass + second.velocity * second.mass) / mass,
            )
        } else {
            (first.position, first.velocity)
        };
        let n_members_1st = first.members.len();
        let mut members = first.members;
        members.extend(second.members);
        Node {
            members,
            n_members_1st,
            mass,
            position,
            velocity,
        }
    }
}

impl GroupDetector for BindingGroupDetector {
    fn detect(&self, particles: &[HardParticle], r_bin: Scalar, g: Scalar) -> Grouping {
        let mut nodes: Vec<Node> = particles
            .iter()
            .enumerate()
            .map(|(i, p)| Node {
                members: vec![i],
                n_members_1st: 0,
                mass: p.real_mass(),
                position: p.position,
                velocity: p.velocity,
            })
            .collect();

        let r_bin_sq = r_bin * r_bin;
        loop {
            let mut best: Option<(usize, usize, Scalar)> = None;
            for i in 0..nodes.len() {
                for j in i + 1..nodes.len() {
                    let dx = nodes[j].position - nodes[i].position;
                    let r2 = dx.length_squared();
                    if r2 >= r_bin_sq || best.is_some_and(|(_, _, d)| d <= r2) {
                        continue;
                    }
                    let dv = nodes[j].velocity - nodes[i].velocity;
                    if relative_energy(nodes[i].mass + nodes[j].mass, dx, dv, g) < 0.0 {
                        best = Some((i, j, r2));
                    }
                }
            }

            let Some((i, j, _)) = best else { break };
            let second = nodes.remove(j);
            let first = std::mem::replace(
                &mut nodes[i],
                Node {
                    members: Vec::new(),
                    n_members_1st: 0,
                    mass: 0.0,
                    position: Vector::ZERO,
                    velocity: Vector::ZERO,
                },
            );
            nodes[i] = Node::merge(first, second);
        }

        let mut grouping = Grouping::default();
        for node in nodes {
            if node.members.len() > 1 {
                grouping.groups.push(DetectedGroup {
                    members: node.members,
                    n_members_1st: node.n_members_1st,
                });
            } else {
                grouping.singles.extend(node.members);
            }
        }
        grouping
            .groups
            .sort_by_key(|group| group.members.iter().copied().min().unwrap_or(usize::MAX));
        grouping.singles.sort_unstable();
        grouping
    }
}
