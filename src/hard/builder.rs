//! Group detection and artificial-particle generation for every cluster.
//!
//! The build runs in four phases so that the store never needs a lock:
//!
//! 1. per cluster, in parallel: reset members, detect groups, move group members to the
//!    front of the cluster and draft one artificial block per group;
//! 2. sequentially: size the output, check it against the capacity limit and grow the
//!    store once;
//! 3. per cluster, in parallel: write each draft into its reserved store slice and turn
//!    the cluster's group members into zero-mass members of their new group;
//! 4. sequentially: mirror member state into the store and collect the clusters whose
//!    changeover radii were staged for a change.

use bevy::prelude::*;

use crate::error::{HardError, HardResult};
use crate::hard::cluster::{ClusterTable, GroupRecord};
use crate::hard::manager::HardManager;
use crate::hard::parallel::{par_map_mut, split_disjoint_mut};
use crate::physics::changeover::ChangeOver;
use crate::physics::group_layout::GroupLayout;
use crate::physics::group_search::GroupDetector;
use crate::physics::kepler::KeplerOrbit;
use crate::physics::math::{Scalar, Vector, center_of_mass};
use crate::physics::particle::{
    ArtificialKind, ArtificialTag, GroupIndex, HardParticle, Particle, ParticleStatus, SoftParticle,
};
use crate::physics::store::ParticleStore;
use crate::physics::tidal_tensor::TidalTensor;

/// Outcome of a build, kept by the driver for the correction passes and diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub n_group: usize,
    pub n_artificial: usize,
    /// Grouped members whose store mirror lives elsewhere
    pub n_group_member_remote: usize,
    /// Sorted clusters holding at least one staged changeover change
    pub changeover_clusters: Vec<usize>,
}

#[derive(Debug, Clone)]
struct GroupDraft {
    n_members: usize,
    n_members_1st: usize,
    block: Vec<SoftParticle>,
}

/// Mass, position and velocity of a set of members, by real mass
fn component(members: &[HardParticle]) -> (Scalar, Vector, Vector) {
    center_of_mass(members.iter().map(|p| (p.real_mass(), p.position, p.velocity)))
}

/// Artificial block of one group whose members are given first component first
pub fn generate_artificial_block(
    members: &[HardParticle],
    n_members_1st: usize,
    i_cluster: usize,
    i_group: usize,
    layout: &GroupLayout,
    manager: &HardManager,
    dt_tree: Scalar,
) -> Vec<SoftParticle> {
    debug_assert!(n_members_1st > 0 && n_members_1st < members.len());
    let (first, second) = members.split_at(n_members_1st);
    let (m1, x1, v1) = component(first);
    let (m2, x2, v2) = component(second);
    let (mass, position, velocity) = component(members);

    let group = GroupIndex {
        i_cluster,
        i_group,
        n_members: members.len(),
        n_members_1st,
        first_member_id: members[0].id,
    };
    let component_ids = [first[0].id, second[0].id];

    let mut changeover = ChangeOver::default();
    changeover.set_radii_scaled(mass * manager.mean_mass_inv, manager.r_in_base, manager.r_out_base);
    let mut cm = Particle::new(-group.first_member_id, 0.0, position, velocity).with_changeover(changeover);
    cm.calc_r_search(dt_tree, manager.search_factor, manager.r_search_min);
    cm.status = ParticleStatus::Artificial(ArtificialTag {
        kind: ArtificialKind::CenterOfMass { group_mass: mass },
        group,
    });

    let sample = |slot: usize, kind: ArtificialKind, sample_mass: Scalar, x: Vector| {
        let id = layout.artificial_id(manager.id_offset, component_ids[slot % 2], slot);
        let mut p = Particle::new(id, sample_mass, x, velocity)
            .with_changeover(changeover)
            .with_r_search(cm.r_search);
        p.status = ParticleStatus::Artificial(ArtificialTag { kind, group });
        SoftParticle::new(p)
    };

    let mut block = Vec::with_capacity(layout.block_len);
    for (k, offset) in TidalTensor::sample_offsets(manager.r_tidal_tensor).into_iter().enumerate() {
        block.push(sample(
            layout.tidal_start + k,
            ArtificialKind::TidalSample,
            0.0,
            position + offset,
        ));
    }

    let n_pairs = layout.orbital_pairs();
    let relative: Vec<Vector> = KeplerOrbit::from_relative(mass, x2 - x1, v2 - v1, manager.g)
        .map(|orbit| orbit.sample_relative_positions(n_pairs))
        .unwrap_or_else(|| vec![x2 - x1; n_pairs]);
    let pair_mass = [m1 / n_pairs as Scalar, m2 / n_pairs as Scalar];
    for (k, d) in relative.into_iter().enumerate() {
        let slot = layout.orbital_start + 2 * k;
        block.push(sample(
            slot,
            ArtificialKind::OrbitalSample,
            pair_mass[0],
            position - d * (m2 / mass),
        ));
        block.push(sample(
            slot + 1,
            ArtificialKind::OrbitalSample,
            pair_mass[1],
            position + d * (m1 / mass),
        ));
    }

    block.push(SoftParticle::new(cm));
    debug_assert_eq!(block.len(), layout.block_len);
    block
}

/// Detect groups in one cluster, reorder it and draft its artificial blocks
fn draft_cluster(
    cluster: &mut [HardParticle],
    i_cluster: usize,
    detector: &dyn GroupDetector,
    layout: &GroupLayout,
    manager: &HardManager,
    dt_tree: Scalar,
) -> Vec<GroupDraft> {
    for particle in cluster.iter_mut() {
        particle.leave_group();
    }

    let grouping = detector.detect(cluster, manager.r_tidal_tensor, manager.g);
    let reordered: Vec<HardParticle> = grouping.ordering().map(|i| cluster[i]).collect();
    debug_assert_eq!(reordered.len(), cluster.len());
    cluster.copy_from_slice(&reordered);

    let mut drafts = Vec::with_capacity(grouping.groups.len());
    let mut offset = 0;
    for (i_group, group) in grouping.groups.iter().enumerate() {
        let members = &cluster[offset..offset + group.len()];
        drafts.push(GroupDraft {
            n_members: group.len(),
            n_members_1st: group.n_members_1st,
            block: generate_artificial_block(
                members,
                group.n_members_1st,
                i_cluster,
                i_group,
                layout,
                manager,
                dt_tree,
            ),
        });
        offset += group.len();
    }
    drafts
}

/// Turn a cluster's group members into members of their group and stage their radii.
/// Returns whether any changeover change was staged.
fn enter_groups(cluster: &mut [HardParticle], records: &[GroupRecord], blocks: &[SoftParticle], layout: &GroupLayout) -> bool {
    let mut staged = false;
    let mut offset = 0;
    for (k, record) in records.iter().enumerate() {
        let cm = &blocks[k * layout.block_len + layout.cm_index];
        let cm_address = layout.cm_address(record.block_start);
        for member in &mut cluster[offset..offset + record.n_members] {
            member.enter_group(cm_address);
            if member.changeover.r_in() != cm.changeover.r_in() {
                member.changeover.r_scale_next = cm.changeover.r_in() / member.changeover.r_in();
                staged = true;
            }
            member.r_search = member.r_search.max(cm.r_search);
        }
        offset += record.n_members;
    }
    staged
}

/// Rebuild groups and artificial particles for every cluster of `hard`.
///
/// The store must not hold artificial particles from an earlier build.
pub fn build_clusters(
    hard: &mut [HardParticle],
    table: &mut ClusterTable,
    store: &mut ParticleStore,
    detector: &dyn GroupDetector,
    manager: &HardManager,
    dt_tree: Scalar,
) -> HardResult<BuildReport> {
    let layout = manager.layout()?;
    if table.len() > manager.array_limit {
        return Err(HardError::Capacity {
            what: "clusters",
            requested: table.len(),
            limit: manager.array_limit,
        });
    }
    debug_assert_eq!(store.artificial_start(), store.len());

    for particle in hard.iter() {
        if let Some(address) = particle.adr_org {
            store[address].leave_group();
        }
    }

    // Phase 1
    let ranges = table.ranges();
    let drafts: Vec<Vec<GroupDraft>> = {
        let mut clusters = split_disjoint_mut(hard, &ranges);
        par_map_mut(&mut clusters, |i_cluster, cluster| {
            draft_cluster(cluster, i_cluster, detector, &layout, manager, dt_tree)
        })
    };

    // Phase 2
    let n_artificial: usize = drafts.iter().map(|d| d.len() * layout.block_len).sum();
    let requested = store.len() + n_artificial;
    if requested > manager.array_limit {
        return Err(HardError::Capacity {
            what: "store particles",
            requested,
            limit: manager.array_limit,
        });
    }
    let base = store.grow(n_artificial);

    let mut block_start = base;
    let mut out_ranges = Vec::with_capacity(drafts.len());
    let mut records: Vec<Vec<GroupRecord>> = Vec::with_capacity(drafts.len());
    for cluster_drafts in &drafts {
        let start = block_start;
        let cluster_records: Vec<GroupRecord> = cluster_drafts
            .iter()
            .map(|draft| {
                let record = GroupRecord {
                    block_start,
                    n_members: draft.n_members,
                    n_members_1st: draft.n_members_1st,
                };
                block_start += layout.block_len;
                record
            })
            .collect();
        out_ranges.push(start..block_start);
        records.push(cluster_records);
    }

    // Phase 3
    let staged: Vec<bool> = {
        let clusters = split_disjoint_mut(hard, &ranges);
        let outputs = split_disjoint_mut(store.as_mut_slice(), &out_ranges);
        let mut work: Vec<_> = clusters
            .into_iter()
            .zip(outputs)
            .zip(drafts.iter().zip(&records))
            .collect();
        par_map_mut(&mut work, |_, ((cluster, output), (drafts, records))| {
            for (k, draft) in drafts.iter().enumerate() {
                output[k * layout.block_len..(k + 1) * layout.block_len].copy_from_slice(&draft.block);
            }
            enter_groups(cluster, records, output, &layout)
        })
    };

    // Phase 4
    let mut report = BuildReport {
        n_group: records.iter().map(Vec::len).sum(),
        n_artificial,
        ..Default::default()
    };
    for particle in hard.iter() {
        match particle.adr_org {
            Some(address) => store[address].particle = particle.particle,
            None if particle.status.is_member() => report.n_group_member_remote += 1,
            None => {}
        }
    }
    report.changeover_clusters = staged
        .iter()
        .enumerate()
        .filter_map(|(i, &s)| s.then_some(i))
        .collect();
    report.changeover_clusters.sort_unstable();
    report.changeover_clusters.dedup();
    table.set_groups(records);

    if !report.changeover_clusters.is_empty() {
        debug!(
            "{} clusters staged changeover updates: {:?}",
            report.changeover_clusters.len(),
            report.changeover_clusters
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::group_search::BindingGroupDetector;

    fn hard(id: i64, mass: Scalar, position: Vector, velocity: Vector, adr: usize) -> HardParticle {
        HardParticle::new(Particle::new(id, mass, position, velocity).with_r_search(0.05), Some(adr))
    }

    /// Tight circular binary (ids 1, 2) plus a distant single (id 3), in one cluster
    fn scenario() -> (Vec<HardParticle>, ParticleStore) {
        let v = 0.5 * libm::sqrt(2.0 / 1e-4);
        let particles = vec![
            hard(3, 1.0, Vector::new(0.3, 0.0, 0.0), Vector::ZERO, 0),
            hard(1, 1.0, Vector::new(-5e-5, 0.0, 0.0), Vector::new(0.0, -v, 0.0), 1),
            hard(2, 1.0, Vector::new(5e-5, 0.0, 0.0), Vector::new(0.0, v, 0.0), 2),
        ];
        let store = particles.iter().map(|h| SoftParticle::new(h.particle)).collect();
        (particles, store)
    }

    #[test]
    fn test_binary_and_single_produce_one_block() {
        let (mut particles, mut store) = scenario();
        let mut table = ClusterTable::from_sizes([3]);
        let manager = HardManager::default();
        let layout = manager.layout().unwrap();

        let report =
            build_clusters(&mut particles, &mut table, &mut store, &BindingGroupDetector, &manager, 1.0 / 64.0)
                .unwrap();

        assert_eq!(report.n_group, 1);
        assert_eq!(report.n_artificial, 2 * manager.n_split + 1);
        assert_eq!(store.len(), 3 + layout.block_len);
        assert_eq!(table.groups_of(0).len(), 1);
        assert_eq!(table.adr_first_ptcl_arti_in_cluster(), vec![3]);

        // Group members first, single last
        assert_eq!(particles.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        let cm_address = layout.cm_address(3);
        for member in &particles[..2] {
            assert_eq!(member.mass, 0.0);
            assert_eq!(member.real_mass(), 1.0);
            assert_eq!(member.status.code(), -(cm_address as i64));
            assert_eq!(store[member.adr_org.unwrap()].status, member.status);
        }
        assert!(particles[2].status.is_single());

        let cm = &store[cm_address];
        assert_eq!(cm.id, -1);
        assert_eq!(cm.mass, 0.0);
        assert_eq!(cm.real_mass(), 2.0);
        let orbital_mass: Scalar = layout.orbital_addresses(3).map(|a| store[a].mass).sum();
        assert!((orbital_mass - 2.0).abs() < 1e-12);
        assert!(layout.tidal_addresses(3).all(|a| store[a].mass == 0.0));
    }

    #[test]
    fn test_members_stage_group_radius() {
        let (mut particles, mut store) = scenario();
        let mut table = ClusterTable::from_sizes([3]);
        let manager = HardManager::default();

        let report =
            build_clusters(&mut particles, &mut table, &mut store, &BindingGroupDetector, &manager, 1.0 / 64.0)
                .unwrap();

        // Group of mass 2 has radii scaled by 2^(1/3)
        assert_eq!(report.changeover_clusters, vec![0]);
        let expected = libm::cbrt(2.0);
        for member in &particles[..2] {
            assert!((member.changeover.r_scale_next - expected).abs() < 1e-12);
            assert!(member.changeover.has_pending_scale());
        }
        assert!(!particles[2].changeover.has_pending_scale());
    }

    #[test]
    fn test_artificial_ids_follow_components() {
        let (mut particles, mut store) = scenario();
        let mut table = ClusterTable::from_sizes([3]);
        let manager = HardManager::default();
        let layout = manager.layout().unwrap();
        build_clusters(&mut particles, &mut table, &mut store, &BindingGroupDetector, &manager, 1.0 / 64.0).unwrap();

        let n_split = manager.n_split as i64;
        assert_eq!(store[3].id, manager.id_offset + n_split);
        assert_eq!(store[4].id, manager.id_offset + 2 * n_split);
        let last_orbital = layout.orbital_addresses(3).end - 1;
        assert_eq!(
            store[last_orbital].id,
            manager.id_offset + 2 * n_split + (layout.cm_index as i64 - 1) / 2
        );
    }

    #[test]
    fn test_capacity_limit() {
        let (mut particles, mut store) = scenario();
        let mut table = ClusterTable::from_sizes([3]);
        let manager = HardManager {
            array_limit: 10,
            ..Default::default()
        };
        let result =
            build_clusters(&mut particles, &mut table, &mut store, &BindingGroupDetector, &manager, 1.0 / 64.0);
        assert!(matches!(result, Err(HardError::Capacity { .. })));
    }

    #[test]
    fn test_rebuild_without_groups_restores_members() {
        let (mut particles, mut store) = scenario();
        let mut table = ClusterTable::from_sizes([3]);
        let manager = HardManager::default();
        build_clusters(&mut particles, &mut table, &mut store, &BindingGroupDetector, &manager, 1.0 / 64.0).unwrap();

        // Pull the binary apart and rebuild
        store.truncate(3);
        particles[1].position.x = 0.1;
        let report =
            build_clusters(&mut particles, &mut table, &mut store, &BindingGroupDetector, &manager, 1.0 / 64.0)
                .unwrap();
        assert_eq!(report.n_group, 0);
        for p in &particles {
            assert!(p.status.is_single());
            assert_eq!(p.mass, 1.0);
        }
    }
}
