//! Short-range correction of the long-range force.
//!
//! The long-range solver treats every pair with a linear cutoff at `r_out_base`. Near
//! a particle that is wrong in two ways: the pair should only carry the soft share
//! `1 - W` of the Newtonian force, and grouped members act through their orbital
//! samples instead of themselves. Every variant here applies the same pairwise
//! primitive, [`cutoff_correction`], to a different choice of partners.
//!
//! Per-cluster work runs in parallel against a read-only snapshot of the store and
//! returns its deltas; they are applied afterwards in address order.

use serde::{Deserialize, Serialize};

use crate::hard::cluster::ClusterTable;
use crate::hard::parallel::{par_for_each_mut, par_map, split_disjoint_mut};
use crate::physics::changeover::ChangeOver;
use crate::physics::group_layout::GroupLayout;
use crate::physics::math::{Scalar, Vector};
use crate::physics::neighbor::{NeighborEntry, NeighborSearch};
use crate::physics::particle::{HardParticle, ParticleStatus, SoftParticle};
use crate::physics::store::ParticleStore;

/// What the corrected `pot_tot` holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PotentialCorrection {
    /// Full Newtonian potential of all short-range partners
    #[default]
    Total,
    /// Only the soft, changeover-weighted share
    SoftOnly,
    /// Leave the potential untouched
    Disabled,
}

impl PotentialCorrection {
    pub fn code(self) -> u64 {
        match self {
            PotentialCorrection::Total => 0,
            PotentialCorrection::SoftOnly => 1,
            PotentialCorrection::Disabled => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(PotentialCorrection::Total),
            1 => Some(PotentialCorrection::SoftOnly),
            2 => Some(PotentialCorrection::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionParams {
    pub g: Scalar,
    pub eps_sq: Scalar,
    pub r_out_base: Scalar,
    pub potential: PotentialCorrection,
}

/// Accumulated correction for one store address
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceDelta {
    pub address: usize,
    pub acc: Vector,
    pub pot: Scalar,
}

impl ForceDelta {
    fn new(address: usize) -> Self {
        Self {
            address,
            acc: Vector::ZERO,
            pot: 0.0,
        }
    }

    fn add(&mut self, (acc, pot): (Vector, Scalar)) {
        self.acc += acc;
        self.pot += pot;
    }
}

/// Replace the linear-cutoff contribution of `source` on the particle at `position`
/// by the soft share of the exact force.
#[inline]
pub fn cutoff_correction(
    params: &CorrectionParams,
    position: Vector,
    changeover: &ChangeOver,
    source: &NeighborEntry,
) -> (Vector, Scalar) {
    let dr = position - source.position;
    let r2_eps = dr.length_squared() + params.eps_sq;
    let r_eps = libm::sqrt(r2_eps);
    let r_out2 = params.r_out_base * params.r_out_base;
    let r_max = r_eps.max(params.r_out_base);

    let inv_r = 1.0 / r_eps;
    let inv_r_max = 1.0 / r_max;
    let gm = params.g * source.mass;
    let k = 1.0 - ChangeOver::acc_weight_pair(changeover, &source.changeover, r_eps);
    let acc = -dr * (gm * (k * inv_r * inv_r * inv_r - inv_r_max * inv_r_max * inv_r_max));

    let newtonian_mass = match source.status {
        ParticleStatus::Single => Some(source.mass),
        ParticleStatus::Member { real_mass, .. } => Some(real_mass),
        ParticleStatus::Artificial(_) => None,
    };
    let pot = match (params.potential, newtonian_mass) {
        (PotentialCorrection::Disabled, _) => 0.0,
        // Artificial partners only cancel their own linear-cutoff term
        (_, None) => gm * inv_r_max,
        (PotentialCorrection::Total, Some(m)) => -params.g * (m * inv_r - source.mass * inv_r_max),
        (PotentialCorrection::SoftOnly, Some(_)) if r2_eps > r_out2 => 0.0,
        (PotentialCorrection::SoftOnly, Some(m)) => {
            let kpot = 1.0 - ChangeOver::pot_weight_pair(changeover, &source.changeover, r_eps);
            -params.g * (m * inv_r * kpot - source.mass * inv_r_max)
        }
    };
    (acc, pot)
}

/// Difference between the soft share under the staged radii and under the current ones
#[inline]
pub fn changeover_transition_correction(
    params: &CorrectionParams,
    position: Vector,
    changeover: &ChangeOver,
    source: &NeighborEntry,
) -> Vector {
    let dr = position - source.position;
    let r_eps = libm::sqrt(dr.length_squared() + params.eps_sq);
    let w_old = ChangeOver::acc_weight_pair(changeover, &source.changeover, r_eps);
    let w_new = ChangeOver::acc_weight_pair(
        &changeover.with_staged_scale(),
        &source.changeover.with_staged_scale(),
        r_eps,
    );
    -dr * (params.g * source.mass * (w_old - w_new) / (r_eps * r_eps * r_eps))
}

/// Self-interaction the linear-cutoff kernel adds to a single's potential
#[inline]
fn self_potential(params: &CorrectionParams, particle: &SoftParticle) -> Scalar {
    if params.potential != PotentialCorrection::Disabled && particle.status.is_single() {
        params.g * particle.mass / params.r_out_base
    } else {
        0.0
    }
}

fn apply(store: &mut ParticleStore, deltas: impl IntoIterator<Item = ForceDelta>) {
    for delta in deltas {
        let p = &mut store[delta.address];
        p.acc += delta.acc;
        p.pot_tot += delta.pot;
    }
}

/// Replace every block's center-of-mass acceleration by the mass-weighted mean over its
/// orbital samples, after removing the old one from its tidal samples
pub fn fix_artificial_block(block: &mut [SoftParticle], layout: &GroupLayout) {
    let acc_cm = block[layout.cm_index].acc;
    for sample in &mut block[layout.tidal_range()] {
        sample.acc -= acc_cm;
    }

    let (weighted, mass) = block[layout.orbital_range()]
        .iter()
        .fold((Vector::ZERO, 0.0), |(acc, m), p| (acc + p.acc * p.mass, m + p.mass));
    debug_assert!(mass > 0.0, "artificial block without orbital mass");
    if mass > 0.0 {
        block[layout.cm_index].acc = weighted / mass;
    }
}

fn fix_blocks(store: &mut ParticleStore, block_starts: &[usize], layout: &GroupLayout) {
    let mut ranges: Vec<_> = block_starts.iter().map(|&s| s..s + layout.block_len).collect();
    ranges.sort_by_key(|r| r.start);
    let mut blocks = split_disjoint_mut(store.as_mut_slice(), &ranges);
    par_for_each_mut(&mut blocks, |_, block| fix_artificial_block(block, layout));
}

fn fix_contiguous_blocks(store: &mut ParticleStore, artificial_start: usize, layout: &GroupLayout) {
    let artificial = &mut store.as_mut_slice()[artificial_start..];
    debug_assert_eq!(artificial.len() % layout.block_len, 0);
    let mut blocks: Vec<&mut [SoftParticle]> = artificial.chunks_exact_mut(layout.block_len).collect();
    par_for_each_mut(&mut blocks, |_, block| fix_artificial_block(block, layout));
}

/// Deltas for the artificial particles of one cluster from the cluster's orbital samples
/// and real particles
fn artificial_cluster_deltas(
    store: &ParticleStore,
    hard: &[HardParticle],
    table: &ClusterTable,
    i_cluster: usize,
    layout: &GroupLayout,
    params: &CorrectionParams,
) -> Vec<ForceDelta> {
    let orbital: Vec<NeighborEntry> = table
        .orbital_addresses(i_cluster, layout)
        .into_iter()
        .map(|a| NeighborEntry::from_particle(a, &store[a]))
        .collect();
    let reals: Vec<NeighborEntry> = hard[table.range(i_cluster)]
        .iter()
        .map(|h| NeighborEntry::from_particle(h.adr_org.unwrap_or(usize::MAX), h))
        .collect();

    let mut deltas = Vec::new();
    for group in table.groups_of(i_cluster) {
        for address in group.block_start..group.block_start + layout.block_len {
            let target = &store[address];
            let mut delta = ForceDelta::new(address);
            for source in orbital.iter().filter(|s| s.address != address) {
                delta.add(cutoff_correction(params, target.position, &target.changeover, source));
            }
            for source in &reals {
                delta.add(cutoff_correction(params, target.position, &target.changeover, source));
            }
            deltas.push(delta);
        }
    }
    deltas
}

/// Correct every particle of every cluster from cluster membership alone.
///
/// Real particles see the other reals of their cluster and all orbital samples of the
/// cluster's groups; artificial particles see the cluster's orbital samples and reals.
pub fn correct_force_with_cluster(
    store: &mut ParticleStore,
    hard: &[HardParticle],
    table: &ClusterTable,
    layout: &GroupLayout,
    params: &CorrectionParams,
) {
    let clusters: Vec<usize> = (0..table.len()).collect();
    let deltas = {
        let store = &*store;
        par_map(&clusters, |_, &i_cluster| {
            let mut deltas = artificial_cluster_deltas(store, hard, table, i_cluster, layout, params);

            let orbital: Vec<NeighborEntry> = table
                .orbital_addresses(i_cluster, layout)
                .into_iter()
                .map(|a| NeighborEntry::from_particle(a, &store[a]))
                .collect();
            let members = &hard[table.range(i_cluster)];
            for (j, particle) in members.iter().enumerate() {
                let Some(address) = particle.adr_org else { continue };
                let target = &store[address];
                let mut delta = ForceDelta::new(address);
                delta.pot += self_potential(params, target);
                for (k, other) in members.iter().enumerate() {
                    if k != j {
                        let source = NeighborEntry::from_particle(other.adr_org.unwrap_or(usize::MAX), other);
                        delta.add(cutoff_correction(params, target.position, &target.changeover, &source));
                    }
                }
                for source in &orbital {
                    delta.add(cutoff_correction(params, target.position, &target.changeover, source));
                }
                deltas.push(delta);
            }
            deltas
        })
    };
    apply(store, deltas.into_iter().flatten());
    fix_blocks(store, &table.adr_first_ptcl_arti_in_cluster(), layout);
}

/// Correction of one store particle from the tree's neighbor list, itself excluded by id
pub fn correct_particle_with_tree_neighbors(
    store: &ParticleStore,
    address: usize,
    search: &dyn NeighborSearch,
    params: &CorrectionParams,
) -> ForceDelta {
    let target = &store[address];
    let mut neighbors = Vec::new();
    search.neighbors(target.position, target.r_search, &mut neighbors);

    let mut delta = ForceDelta::new(address);
    delta.pot += self_potential(params, target);
    for source in neighbors.iter().filter(|n| n.id != target.id) {
        delta.add(cutoff_correction(params, target.position, &target.changeover, source));
    }
    delta
}

fn tree_deltas(
    store: &ParticleStore,
    addresses: &[usize],
    search: &dyn NeighborSearch,
    params: &CorrectionParams,
) -> Vec<ForceDelta> {
    par_map(addresses, |_, &address| {
        correct_particle_with_tree_neighbors(store, address, search, params)
    })
}

/// Correct the hard buffer's local reals and every artificial particle from tree
/// neighbors, then fix each artificial block
pub fn correct_force_with_tree_neighbors(
    store: &mut ParticleStore,
    hard: &[HardParticle],
    search: &dyn NeighborSearch,
    layout: &GroupLayout,
    params: &CorrectionParams,
) {
    let artificial_start = store.artificial_start();
    let addresses: Vec<usize> = hard
        .iter()
        .filter_map(|h| h.adr_org)
        .chain(artificial_start..store.len())
        .collect();
    let deltas = tree_deltas(store, &addresses, search, params);
    apply(store, deltas);
    fix_contiguous_blocks(store, artificial_start, layout);
}

/// Correct every store particle from tree neighbors; blocks start at `artificial_start`
pub fn correct_all_with_tree_neighbors(
    store: &mut ParticleStore,
    search: &dyn NeighborSearch,
    artificial_start: usize,
    layout: &GroupLayout,
    params: &CorrectionParams,
) {
    let addresses: Vec<usize> = (0..store.len()).collect();
    let deltas = tree_deltas(store, &addresses, search, params);
    apply(store, deltas);
    fix_contiguous_blocks(store, artificial_start, layout);
}

/// Artificial particles from cluster membership, local reals and the send list from
/// tree neighbors
pub fn correct_force_with_tree_neighbors_and_cluster(
    store: &mut ParticleStore,
    hard: &[HardParticle],
    table: &ClusterTable,
    search: &dyn NeighborSearch,
    adr_send: &[usize],
    layout: &GroupLayout,
    params: &CorrectionParams,
) {
    let clusters: Vec<usize> = (0..table.len()).collect();
    let artificial = {
        let store = &*store;
        par_map(&clusters, |_, &i_cluster| {
            artificial_cluster_deltas(store, hard, table, i_cluster, layout, params)
        })
    };
    let reals: Vec<usize> = hard.iter().filter_map(|h| h.adr_org).collect();
    let real_deltas = tree_deltas(store, &reals, search, params);
    let send_deltas = tree_deltas(store, adr_send, search, params);

    apply(store, artificial.into_iter().flatten());
    fix_blocks(store, &table.adr_first_ptcl_arti_in_cluster(), layout);
    apply(store, real_deltas);
    apply(store, send_deltas);
}

/// Adjust the forces of flagged clusters for their staged changeover radii, then commit
/// the radii on the hard copies and the store mirrors.
///
/// Only pairs where at least one side has a staged scale contribute, so a second call
/// without new staging changes nothing.
pub fn correct_force_for_changeover_update(
    store: &mut ParticleStore,
    hard: &mut [HardParticle],
    table: &ClusterTable,
    flagged: &[usize],
    search: &dyn NeighborSearch,
    adr_send: &[usize],
    layout: &GroupLayout,
    params: &CorrectionParams,
) {
    let deltas = {
        let store = &*store;
        let hard = &*hard;
        par_map(flagged, |_, &i_cluster| {
            let reals: Vec<NeighborEntry> = hard[table.range(i_cluster)]
                .iter()
                .map(|h| NeighborEntry::from_particle(h.adr_org.unwrap_or(usize::MAX), h))
                .collect();
            let groups = table.groups_of(i_cluster);
            let orbital_blocks: Vec<Vec<NeighborEntry>> = groups
                .iter()
                .map(|g| {
                    layout
                        .orbital_addresses(g.block_start)
                        .map(|a| NeighborEntry::from_particle(a, &store[a]))
                        .collect()
                })
                .collect();

            let mut deltas = Vec::new();
            for group in groups {
                for address in layout.orbital_addresses(group.block_start).start..=layout.cm_address(group.block_start) {
                    let target = &store[address];
                    let change_target = target.changeover.has_pending_scale();
                    let mut delta = ForceDelta::new(address);
                    for block in &orbital_blocks {
                        let block_changes = block.first().is_some_and(|s| s.changeover.has_pending_scale());
                        if !(block_changes || change_target) {
                            continue;
                        }
                        for source in block.iter().filter(|s| s.address != address) {
                            delta.acc += changeover_transition_correction(
                                params,
                                target.position,
                                &target.changeover,
                                source,
                            );
                        }
                    }
                    for source in reals
                        .iter()
                        .filter(|s| change_target || s.changeover.has_pending_scale())
                    {
                        delta.acc +=
                            changeover_transition_correction(params, target.position, &target.changeover, source);
                    }
                    deltas.push(delta);
                }
            }

            for particle in &hard[table.range(i_cluster)] {
                if let Some(address) = particle.adr_org {
                    deltas.push(transition_from_neighbors(store, address, search, params));
                }
            }
            deltas
        })
    };
    let send_deltas = {
        let store = &*store;
        par_map(adr_send, |_, &address| transition_from_neighbors(store, address, search, params))
    };

    apply(store, deltas.into_iter().flatten());
    apply(store, send_deltas);

    for &i_cluster in flagged {
        for particle in &mut hard[table.range(i_cluster)] {
            particle.changeover.update_with_r_scale();
            if let Some(address) = particle.adr_org {
                store[address].changeover.update_with_r_scale();
            }
        }
    }
    for &address in adr_send {
        store[address].changeover.update_with_r_scale();
    }
}

fn transition_from_neighbors(
    store: &ParticleStore,
    address: usize,
    search: &dyn NeighborSearch,
    params: &CorrectionParams,
) -> ForceDelta {
    let target = &store[address];
    let change_target = target.changeover.has_pending_scale();
    let mut neighbors = Vec::new();
    search.neighbors(target.position, target.r_search, &mut neighbors);

    let mut delta = ForceDelta::new(address);
    for source in neighbors
        .iter()
        .filter(|n| n.id != target.id && (change_target || n.changeover.has_pending_scale()))
    {
        delta.acc += changeover_transition_correction(params, target.position, &target.changeover, source);
    }
    delta
}

/// Remove the self-interaction term from the potential of the given singles
pub fn correct_potential_with_cutoff(store: &mut ParticleStore, addresses: &[usize], params: &CorrectionParams) {
    for &address in addresses {
        let pot = self_potential(params, &store[address]);
        store[address].pot_tot += pot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::particle::Particle;

    fn params(potential: PotentialCorrection) -> CorrectionParams {
        CorrectionParams {
            g: 1.0,
            eps_sq: 0.0,
            r_out_base: 1e-2,
            potential,
        }
    }

    fn entry(status: ParticleStatus, mass: Scalar, x: Scalar) -> NeighborEntry {
        let mut particle = Particle::new(1, mass, Vector::new(x, 0.0, 0.0), Vector::ZERO);
        particle.status = status;
        NeighborEntry::from_particle(0, &particle)
    }

    #[test]
    fn test_no_correction_beyond_outer_radius() {
        let source = entry(ParticleStatus::Single, 1.0, 0.5);
        let (acc, pot) = cutoff_correction(
            &params(PotentialCorrection::Total),
            Vector::ZERO,
            &ChangeOver::default(),
            &source,
        );
        assert!(acc.length() < 1e-12);
        assert!(pot.abs() < 1e-12);
    }

    #[test]
    fn test_inside_inner_radius_removes_linear_cutoff() {
        // W = 1, so only the linear-cutoff term is removed
        let source = entry(ParticleStatus::Single, 2.0, 5e-4);
        let (acc, pot) = cutoff_correction(
            &params(PotentialCorrection::Total),
            Vector::ZERO,
            &ChangeOver::default(),
            &source,
        );
        let expected = 2.0 * 5e-4 / 1e-6;
        assert!((acc.x + expected).abs() < 1e-9 * expected, "{acc:?}");
        assert!((pot - (-(2.0 / 5e-4) + 2.0 / 1e-2)).abs() < 1e-9);
    }

    #[test]
    fn test_member_uses_real_mass_for_potential_only() {
        let source = entry(
            ParticleStatus::Member {
                cm_address: 3,
                real_mass: 1.5,
            },
            0.0,
            5e-3,
        );
        let (acc, pot) = cutoff_correction(
            &params(PotentialCorrection::Total),
            Vector::ZERO,
            &ChangeOver::default(),
            &source,
        );
        assert_eq!(acc, Vector::ZERO);
        assert!((pot + 1.5 / 5e-3).abs() < 1e-9);

        let (_, soft_pot) = cutoff_correction(
            &params(PotentialCorrection::SoftOnly),
            Vector::ZERO,
            &ChangeOver::default(),
            &source,
        );
        assert!(soft_pot > pot);
        assert!(soft_pot < 0.0);
    }

    #[test]
    fn test_disabled_potential_leaves_pot_alone() {
        let source = entry(ParticleStatus::Single, 1.0, 2e-3);
        let (acc, pot) = cutoff_correction(
            &params(PotentialCorrection::Disabled),
            Vector::ZERO,
            &ChangeOver::default(),
            &source,
        );
        assert_eq!(pot, 0.0);
        assert!(acc.length() > 0.0);
    }

    #[test]
    fn test_transition_is_zero_without_staged_scale() {
        let source = entry(ParticleStatus::Single, 1.0, 3e-3);
        let acc = changeover_transition_correction(
            &params(PotentialCorrection::Total),
            Vector::ZERO,
            &ChangeOver::default(),
            &source,
        );
        assert_eq!(acc, Vector::ZERO);
    }

    #[test]
    fn test_transition_matches_difference_of_corrections() {
        let mut source = entry(ParticleStatus::Single, 1.0, 3e-3);
        let params = params(PotentialCorrection::Total);
        let own = ChangeOver::default();
        let before = cutoff_correction(&params, Vector::ZERO, &own, &source).0;

        source.changeover.r_scale_next = 2.0;
        let transition = changeover_transition_correction(&params, Vector::ZERO, &own, &source);

        source.changeover.update_with_r_scale();
        let after = cutoff_correction(&params, Vector::ZERO, &own, &source).0;
        assert!((before + transition - after).length() < 1e-9 * after.length().max(1.0));
        assert!(transition.length() > 0.0);
    }

    #[test]
    fn test_block_fix_averages_orbital_samples() {
        let layout = GroupLayout::new(5).unwrap();
        let mut block: Vec<SoftParticle> = (0..layout.block_len)
            .map(|i| SoftParticle::new(Particle::new(i as i64, 0.0, Vector::ZERO, Vector::ZERO)))
            .collect();
        block[layout.cm_index].acc = Vector::new(1.0, 0.0, 0.0);
        for (k, i) in layout.orbital_range().enumerate() {
            block[i].mass = (k + 1) as Scalar;
            block[i].acc = Vector::new(0.0, (k + 1) as Scalar, 0.0);
        }

        fix_artificial_block(&mut block, &layout);

        // (1*1 + 2*2) / 3
        assert!((block[layout.cm_index].acc - Vector::new(0.0, 5.0 / 3.0, 0.0)).length() < 1e-14);
        for i in layout.tidal_range() {
            assert_eq!(block[i].acc, Vector::new(-1.0, 0.0, 0.0));
        }
    }
}
