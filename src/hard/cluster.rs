//! Cluster ranges over the hard buffer and the group tables built on top of them.

use std::ops::Range;

use crate::hard::parallel::par_map;
use crate::physics::group_layout::GroupLayout;
use crate::physics::neighbor::NeighborSearch;
use crate::physics::particle::SoftParticle;

/// One group of a cluster: its members sit at the front of the cluster in group order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRecord {
    /// Store address of the group's first artificial particle
    pub block_start: usize,
    pub n_members: usize,
    pub n_members_1st: usize,
}

/// Partition of the hard buffer into clusters, plus the groups found in each
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTable {
    n_ptcl: Vec<usize>,
    /// Prefix sums of `n_ptcl`, one longer than it
    offsets: Vec<usize>,
    n_group: Vec<usize>,
    group_offsets: Vec<usize>,
    groups: Vec<GroupRecord>,
}

impl Default for ClusterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterTable {
    pub fn new() -> Self {
        Self {
            n_ptcl: Vec::new(),
            offsets: vec![0],
            n_group: Vec::new(),
            group_offsets: vec![0],
            groups: Vec::new(),
        }
    }

    pub fn from_sizes(sizes: impl IntoIterator<Item = usize>) -> Self {
        let mut table = Self::new();
        for size in sizes {
            table.push_cluster(size);
        }
        table
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Append a cluster of `size` particles; it owns no groups yet
    pub fn push_cluster(&mut self, size: usize) {
        let end = self.total_ptcl() + size;
        self.n_ptcl.push(size);
        self.offsets.push(end);
        self.n_group.push(0);
        self.group_offsets.push(self.groups.len());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.n_ptcl.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_ptcl.is_empty()
    }

    #[inline]
    pub fn total_ptcl(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    #[inline]
    pub fn range(&self, i_cluster: usize) -> Range<usize> {
        self.offsets[i_cluster]..self.offsets[i_cluster + 1]
    }

    pub fn ranges(&self) -> Vec<Range<usize>> {
        (0..self.len()).map(|i| self.range(i)).collect()
    }

    pub fn sizes(&self) -> &[usize] {
        &self.n_ptcl
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Replace every cluster's groups; `per_cluster` has one entry per cluster
    pub fn set_groups(&mut self, per_cluster: Vec<Vec<GroupRecord>>) {
        debug_assert_eq!(per_cluster.len(), self.len());
        self.groups.clear();
        self.n_group.clear();
        self.group_offsets.clear();
        self.group_offsets.push(0);
        for groups in per_cluster {
            self.n_group.push(groups.len());
            self.groups.extend(groups);
            self.group_offsets.push(self.groups.len());
        }
    }

    pub fn groups_of(&self, i_cluster: usize) -> &[GroupRecord] {
        &self.groups[self.group_offsets[i_cluster]..self.group_offsets[i_cluster + 1]]
    }

    pub fn groups(&self) -> &[GroupRecord] {
        &self.groups
    }

    pub fn n_group_in_cluster(&self) -> &[usize] {
        &self.n_group
    }

    pub fn n_group_in_cluster_offset(&self) -> &[usize] {
        &self.group_offsets
    }

    pub fn adr_first_ptcl_arti_in_cluster(&self) -> Vec<usize> {
        self.groups.iter().map(|g| g.block_start).collect()
    }

    /// Store addresses of every orbital sample of the cluster's groups
    pub fn orbital_addresses(&self, i_cluster: usize, layout: &GroupLayout) -> Vec<usize> {
        self.groups_of(i_cluster)
            .iter()
            .flat_map(|g| layout.orbital_addresses(g.block_start))
            .collect()
    }
}

/// Union-find over particle indices with path halving
#[derive(Debug, Clone)]
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// The smaller root wins so roots are deterministic
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Connected components of real particles under the symmetric search-radius criterion.
///
/// Returns store addresses per cluster, each ascending, clusters ordered by their first
/// address. Artificial particles are ignored.
pub fn find_clusters(particles: &[SoftParticle], search: &dyn NeighborSearch) -> Vec<Vec<usize>> {
    let links: Vec<Vec<usize>> = par_map(particles, |i, p| {
        if p.status.is_artificial() {
            return Vec::new();
        }
        let mut entries = Vec::new();
        search.neighbors(p.position, p.r_search, &mut entries);
        entries
            .into_iter()
            .filter(|e| e.address != i && !e.status.is_artificial())
            .map(|e| e.address)
            .collect()
    });

    let mut set = DisjointSet::new(particles.len());
    for (i, neighbors) in links.iter().enumerate() {
        for &j in neighbors {
            set.union(i, j);
        }
    }

    let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); particles.len()];
    for (i, p) in particles.iter().enumerate() {
        if !p.status.is_artificial() {
            let root = set.find(i);
            by_root[root].push(i);
        }
    }
    by_root.into_iter().filter(|c| !c.is_empty()).collect()
}
