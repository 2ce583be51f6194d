//! The hard system: owns the cluster buffer for one tree step and drives every cluster
//! with the engine its shape calls for.

use std::path::PathBuf;
use std::sync::Arc;

use bevy::prelude::*;

use crate::error::{HardError, HardResult};
use crate::hard::builder::{self, BuildReport};
use crate::hard::cluster::{ClusterTable, GroupRecord, find_clusters};
use crate::hard::correction::{self, CorrectionParams};
use crate::hard::energy::{ClusterDump, ClusterEnergy};
use crate::hard::manager::HardManager;
use crate::hard::parallel::{par_map, par_map_mut, split_disjoint_mut};
use crate::physics::changeover::ChangeOver;
use crate::physics::group_layout::GroupLayout;
use crate::physics::group_search::{BindingGroupDetector, GroupDetector};
use crate::physics::integrators::hermite::GroupingParams;
use crate::physics::integrators::regularized::ArBody;
use crate::physics::integrators::{
    Engine, HermiteIntegrator, RegularizedIntegrator, SchemeRegistry, SymplecticScheme,
};
use crate::physics::math::{Scalar, Vector};
use crate::physics::neighbor::NeighborSearch;
use crate::physics::particle::{EnclosingGroup, HardParticle, Particle};
use crate::physics::store::ParticleStore;
use crate::physics::tidal_tensor::TidalTensor;

/// Clusters larger than this are reported; they serialize a worker for the whole step
const LARGE_CLUSTER: usize = 512;

/// Totals over every cluster driven in one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardStepReport {
    pub n_cluster: usize,
    /// Clusters made of exactly one group
    pub n_regularized: usize,
    /// Clusters mixing singles and groups
    pub n_combined: usize,
    /// One-particle clusters that only drift
    pub n_drift: usize,
    pub hermite_steps: usize,
    pub ar_steps: usize,
    pub n_merged: usize,
    pub n_dissolved: usize,
    pub largest_cluster: usize,
    pub energy: ClusterEnergy,
}

#[derive(Debug)]
struct ClusterOutcome {
    engine: &'static str,
    hermite_steps: usize,
    ar_steps: usize,
    n_merged: usize,
    n_dissolved: usize,
    energy: ClusterEnergy,
    /// Pre-step state, kept only when the energy check failed
    failed: Option<Vec<HardParticle>>,
}

impl ClusterOutcome {
    fn drift() -> Self {
        Self {
            engine: "drift",
            hermite_steps: 0,
            ar_steps: 0,
            n_merged: 0,
            n_dissolved: 0,
            energy: ClusterEnergy::default(),
            failed: None,
        }
    }
}

/// Short-range integrator state for one tree step
#[derive(Resource, Clone)]
pub struct SystemHard {
    manager: HardManager,
    layout: GroupLayout,
    detector: Arc<dyn GroupDetector>,
    scheme: Box<dyn SymplecticScheme>,
    hard: Vec<HardParticle>,
    table: ClusterTable,
    /// Store addresses of one-particle clusters
    isolated: Vec<usize>,
    changeover_clusters: Vec<usize>,
    n_group_member_remote: usize,
    dump_dir: PathBuf,
}

impl SystemHard {
    pub fn new(manager: HardManager) -> HardResult<Self> {
        manager.check_params()?;
        let layout = manager.layout()?;
        let scheme = SchemeRegistry::default().create(&manager.regularized.scheme)?;
        Ok(Self {
            manager,
            layout,
            detector: Arc::new(BindingGroupDetector),
            scheme,
            hard: Vec::new(),
            table: ClusterTable::new(),
            isolated: Vec::new(),
            changeover_clusters: Vec::new(),
            n_group_member_remote: 0,
            dump_dir: PathBuf::from("."),
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn GroupDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Directory receiving the dump of a cluster that fails the energy check
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = dir.into();
        self
    }

    pub fn manager(&self) -> &HardManager {
        &self.manager
    }

    pub fn layout(&self) -> &GroupLayout {
        &self.layout
    }

    pub fn hard_particles(&self) -> &[HardParticle] {
        &self.hard
    }

    pub fn hard_particles_mut(&mut self) -> &mut [HardParticle] {
        &mut self.hard
    }

    pub fn cluster_table(&self) -> &ClusterTable {
        &self.table
    }

    pub fn n_cluster(&self) -> usize {
        self.table.len()
    }

    pub fn cluster_sizes(&self) -> &[usize] {
        self.table.sizes()
    }

    pub fn cluster_offsets(&self) -> &[usize] {
        self.table.offsets()
    }

    pub fn n_group_in_cluster(&self) -> &[usize] {
        self.table.n_group_in_cluster()
    }

    pub fn n_group_in_cluster_offset(&self) -> &[usize] {
        self.table.n_group_in_cluster_offset()
    }

    pub fn adr_first_ptcl_arti_in_cluster(&self) -> Vec<usize> {
        self.table.adr_first_ptcl_arti_in_cluster()
    }

    pub fn n_cluster_changeover_update(&self) -> usize {
        self.changeover_clusters.len()
    }

    pub fn changeover_clusters(&self) -> &[usize] {
        &self.changeover_clusters
    }

    pub fn n_group_member_remote(&self) -> usize {
        self.n_group_member_remote
    }

    pub fn isolated(&self) -> &[usize] {
        &self.isolated
    }

    /// Replace the buffer with store particles, `counts[i]` consecutive addresses per cluster
    pub fn set_particles_for_isolated_multi_cluster(
        &mut self,
        store: &ParticleStore,
        addresses: &[usize],
        counts: &[usize],
    ) -> HardResult<()> {
        let total: usize = counts.iter().sum();
        if total != addresses.len() {
            return Err(HardError::Invariant(format!(
                "cluster sizes sum to {total} but {} addresses were given",
                addresses.len()
            )));
        }
        self.hard.clear();
        self.table.clear();
        self.hard
            .extend(addresses.iter().map(|&a| HardParticle::new(store[a].particle, Some(a))));
        for &count in counts {
            self.table.push_cluster(count);
        }
        Ok(())
    }

    /// Append particles tagged with a cluster id, possibly owned remotely.
    ///
    /// The input is sorted stably by cluster id, so particles keep their relative order
    /// inside each cluster.
    pub fn set_particles_for_connected_cluster(&mut self, mut particles: Vec<(usize, HardParticle)>) {
        particles.sort_by_key(|&(cluster, _)| cluster);
        let mut current = None;
        let mut size = 0;
        for (cluster, particle) in particles {
            if current != Some(cluster) {
                if size > 0 {
                    self.table.push_cluster(size);
                }
                current = Some(cluster);
                size = 0;
            }
            self.hard.push(particle);
            size += 1;
        }
        if size > 0 {
            self.table.push_cluster(size);
        }
    }

    /// Split the store's real particles into clusters by search radius. One-particle
    /// clusters are kept aside for [`SystemHard::drive_for_one_cluster`].
    pub fn partition_store(&mut self, store: &ParticleStore, search: &dyn NeighborSearch) -> HardResult<()> {
        let clusters = find_clusters(store.as_slice(), search);
        self.isolated.clear();
        let mut addresses = Vec::new();
        let mut counts = Vec::new();
        for cluster in clusters {
            if let [single] = cluster.as_slice() {
                self.isolated.push(*single);
            } else {
                counts.push(cluster.len());
                addresses.extend(cluster);
            }
        }
        self.set_particles_for_isolated_multi_cluster(store, &addresses, &counts)
    }

    /// Detect groups and regenerate artificial particles, dropping the previous ones
    pub fn build_clusters(&mut self, store: &mut ParticleStore, dt_tree: Scalar) -> HardResult<BuildReport> {
        store.truncate(store.artificial_start());
        let report = builder::build_clusters(
            &mut self.hard,
            &mut self.table,
            store,
            self.detector.as_ref(),
            &self.manager,
            dt_tree,
        )?;
        self.changeover_clusters = report.changeover_clusters.clone();
        self.n_group_member_remote = report.n_group_member_remote;
        Ok(report)
    }

    /// Drift the particles of one-particle clusters straight in the store
    pub fn drive_for_one_cluster(&self, store: &mut ParticleStore, addresses: &[usize], dt: Scalar) {
        let moved = {
            let store = &*store;
            par_map(addresses, |_, &address| {
                let mut particle = store[address].particle;
                particle.position += particle.velocity * dt;
                particle.calc_r_search(dt, self.manager.search_factor, self.manager.r_search_min);
                particle
            })
        };
        for (&address, particle) in addresses.iter().zip(moved) {
            store[address].particle = particle;
        }
    }

    /// Integrate every cluster of the buffer over `dt`, one task per cluster
    pub fn drive_for_multi_cluster(&mut self, dt: Scalar, store: &ParticleStore) -> HardResult<HardStepReport> {
        let ranges = self.table.ranges();
        let outcomes: Vec<HardResult<ClusterOutcome>> = {
            let table = &self.table;
            let manager = &self.manager;
            let layout = &self.layout;
            let scheme = self.scheme.as_ref();
            let mut work: Vec<(&mut [HardParticle], &[GroupRecord])> = split_disjoint_mut(&mut self.hard, &ranges)
                .into_iter()
                .enumerate()
                .map(|(i, cluster)| (cluster, table.groups_of(i)))
                .collect();
            par_map_mut(&mut work, |_, (cluster, groups)| {
                drive_cluster(cluster, groups, store, layout, manager, scheme, dt)
            })
        };

        let mut report = HardStepReport {
            n_cluster: self.table.len(),
            largest_cluster: self.table.sizes().iter().copied().max().unwrap_or(0),
            ..Default::default()
        };
        for (i_cluster, outcome) in outcomes.into_iter().enumerate() {
            let outcome = outcome?;
            if let Some(particles) = outcome.failed {
                return Err(self.energy_failure(i_cluster, outcome.engine, dt, outcome.energy, particles));
            }
            match outcome.engine {
                "regularized" => report.n_regularized += 1,
                "hermite" => report.n_combined += 1,
                _ => report.n_drift += 1,
            }
            report.hermite_steps += outcome.hermite_steps;
            report.ar_steps += outcome.ar_steps;
            report.n_merged += outcome.n_merged;
            report.n_dissolved += outcome.n_dissolved;
            report.energy += outcome.energy;
        }

        if report.largest_cluster > LARGE_CLUSTER {
            warn!(
                "Largest hard cluster holds {} particles; it is integrated on a single thread",
                report.largest_cluster
            );
        }
        debug!(
            "Hard step: {} clusters ({} regularized, {} hermite, {} drift), {} hermite / {} AR steps, energy error {:e}",
            report.n_cluster,
            report.n_regularized,
            report.n_combined,
            report.n_drift,
            report.hermite_steps,
            report.ar_steps,
            report.energy.error
        );
        Ok(report)
    }

    fn energy_failure(
        &self,
        i_cluster: usize,
        engine: &str,
        dt: Scalar,
        energy: ClusterEnergy,
        particles: Vec<HardParticle>,
    ) -> HardError {
        let dump = ClusterDump::new(i_cluster, engine, dt, self.manager.energy_error_max, energy, particles);
        let path = match dump.write(&self.dump_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to write dump of cluster {i_cluster}: {e}");
                None
            }
        };
        error!(
            "Cluster {i_cluster} ({engine}) drifted by {:e}, above {:e}",
            energy.error, self.manager.energy_error_max
        );
        HardError::EnergyDrift {
            cluster: i_cluster,
            drift: energy.error,
            threshold: self.manager.energy_error_max,
            dump: path,
        }
    }

    /// Copy the locally owned hard particles back into their store mirrors
    pub fn write_back(&self, store: &mut ParticleStore) {
        for particle in &self.hard {
            if let Some(address) = particle.adr_org {
                store[address].particle = particle.particle;
            }
        }
    }

    /// Pull velocities kicked in the store into the buffer
    pub fn refresh_velocities(&mut self, store: &ParticleStore) {
        for particle in &mut self.hard {
            if let Some(address) = particle.adr_org {
                particle.velocity = store[address].velocity;
            }
        }
    }

    pub fn correction_params(&self) -> CorrectionParams {
        CorrectionParams {
            g: self.manager.g,
            eps_sq: self.manager.eps_sq,
            r_out_base: self.manager.r_out_base,
            potential: self.manager.potential,
        }
    }

    pub fn correct_force_with_cluster(&self, store: &mut ParticleStore) {
        correction::correct_force_with_cluster(store, &self.hard, &self.table, &self.layout, &self.correction_params());
    }

    pub fn correct_force_with_tree_neighbors(&self, store: &mut ParticleStore, search: &dyn NeighborSearch) {
        correction::correct_force_with_tree_neighbors(
            store,
            &self.hard,
            search,
            &self.layout,
            &self.correction_params(),
        );
    }

    pub fn correct_all_with_tree_neighbors(&self, store: &mut ParticleStore, search: &dyn NeighborSearch) {
        let artificial_start = store.artificial_start();
        correction::correct_all_with_tree_neighbors(
            store,
            search,
            artificial_start,
            &self.layout,
            &self.correction_params(),
        );
    }

    pub fn correct_force_with_tree_neighbors_and_cluster(
        &self,
        store: &mut ParticleStore,
        search: &dyn NeighborSearch,
        adr_send: &[usize],
    ) {
        correction::correct_force_with_tree_neighbors_and_cluster(
            store,
            &self.hard,
            &self.table,
            search,
            adr_send,
            &self.layout,
            &self.correction_params(),
        );
    }

    /// Apply and commit the changeover changes staged by the last build
    pub fn correct_force_for_changeover_update(
        &mut self,
        store: &mut ParticleStore,
        search: &dyn NeighborSearch,
        adr_send: &[usize],
    ) {
        let params = self.correction_params();
        correction::correct_force_for_changeover_update(
            store,
            &mut self.hard,
            &self.table,
            &self.changeover_clusters,
            search,
            adr_send,
            &self.layout,
            &params,
        );
    }

    pub fn correct_potential_with_cutoff(&self, store: &mut ParticleStore, addresses: &[usize]) {
        correction::correct_potential_with_cutoff(store, addresses, &self.correction_params());
    }
}

/// Changeover and tidal tensor of a group from its artificial block
fn group_field(store: &ParticleStore, record: &GroupRecord, layout: &GroupLayout, manager: &HardManager) -> (Scalar, TidalTensor) {
    let cm = &store[layout.cm_address(record.block_start)];
    let group_mass = cm.real_mass();
    debug_assert!(group_mass > 0.0, "group without mass at {}", record.block_start);

    let mut changeover = ChangeOver::default();
    changeover.set_radii_scaled(group_mass * manager.mean_mass_inv, manager.r_in_base, manager.r_out_base);
    let samples = &store.as_slice()[layout.tidal_addresses(record.block_start)];
    (group_mass, TidalTensor::fit(samples, cm.position, changeover.r_out()))
}

/// Search radius of a group's center of mass moving at `velocity`
fn group_r_search(velocity: Vector, changeover: ChangeOver, manager: &HardManager, dt: Scalar) -> Scalar {
    let mut cm = Particle::new(0, 0.0, Vector::ZERO, velocity).with_changeover(changeover);
    cm.calc_r_search(dt, manager.search_factor, manager.r_search_min);
    cm.r_search
}

/// Integrate one cluster in place
fn drive_cluster(
    cluster: &mut [HardParticle],
    groups: &[GroupRecord],
    store: &ParticleStore,
    layout: &GroupLayout,
    manager: &HardManager,
    scheme: &dyn SymplecticScheme,
    dt: Scalar,
) -> HardResult<ClusterOutcome> {
    if let ([particle], []) = (&mut *cluster, groups) {
        let dx = particle.velocity * dt;
        particle.position += dx;
        particle.calc_r_search(dt, manager.search_factor, manager.r_search_min);
        return Ok(ClusterOutcome::drift());
    }

    let snapshot = manager.check_energy.then(|| cluster.to_vec());
    let mut frame = (Vector::ZERO, Vector::ZERO);

    let mut engine = match groups {
        [group] if group.n_members == cluster.len() => {
            let (group_mass, tidal) = group_field(store, group, layout, manager);
            let bodies = cluster.iter().enumerate().map(|(index, p)| ArBody {
                index,
                mass: p.real_mass(),
                position: p.position,
                velocity: p.velocity,
            });
            let mut ar = RegularizedIntegrator::new(&manager.regularized, scheme.clone_box(), bodies);
            debug_assert!((ar.mass() - group_mass).abs() <= 1e-12 * group_mass);
            ar.set_tidal_tensor(Some(tidal));
            ar.initialize(0.0);
            Engine::Regularized(ar)
        }
        _ => {
            let particles: Vec<Particle> = cluster
                .iter()
                .map(|h| {
                    let mut p = h.particle;
                    p.leave_group();
                    p
                })
                .collect();
            let params = GroupingParams {
                r_bin: manager.r_tidal_tensor,
                r_in_base: manager.r_in_base,
                r_out_base: manager.r_out_base,
                mean_mass_inv: manager.mean_mass_inv,
            };
            let mut hermite = HermiteIntegrator::new(
                &manager.hermite,
                &manager.regularized,
                scheme.clone_box(),
                params,
                particles,
            );
            let mut offset = 0;
            for group in groups {
                let (_, tidal) = group_field(store, group, layout, manager);
                let members: Vec<usize> = (offset..offset + group.n_members).collect();
                hermite.add_group(&members, group.n_members_1st, Some(tidal));
                offset += group.n_members;
            }
            for index in offset..cluster.len() {
                hermite.add_single(index);
            }
            let (_, position, velocity) = hermite.shift_to_cm_frame();
            frame = (position, velocity);
            hermite.initialize();
            Engine::Combined(hermite)
        }
    };

    let initial = engine.energy();
    engine.integrate_to(dt)?;
    let energy = ClusterEnergy {
        initial,
        last: engine.energy(),
        error: engine.energy_error(),
    };

    // Members keep at least the search radius of the group they ended the step in
    let mut floors: Vec<(Vec<usize>, Scalar)> = Vec::new();
    let mut outcome = ClusterOutcome {
        engine: engine.name(),
        hermite_steps: 0,
        ar_steps: 0,
        n_merged: 0,
        n_dissolved: 0,
        energy,
        failed: None,
    };
    match &mut engine {
        Engine::Regularized(ar) => {
            let (position, velocity) = (ar.cm_position(), ar.cm_velocity());
            ar.set_cm(position + velocity * dt, velocity);
            let enclosing = EnclosingGroup {
                velocity,
                mass: ar.mass(),
            };
            for member in ar.members_absolute() {
                let p = &mut cluster[member.index];
                p.position = member.position;
                p.velocity = member.velocity;
                p.enclosing = enclosing;
            }
            let mut changeover = ChangeOver::default();
            changeover.set_radii_scaled(ar.mass() * manager.mean_mass_inv, manager.r_in_base, manager.r_out_base);
            floors.push(((0..cluster.len()).collect(), group_r_search(velocity, changeover, manager, dt)));
            outcome.ar_steps = ar.step_count();
        }
        Engine::Combined(hermite) => {
            let (position, velocity) = frame;
            hermite.shift_frame(position + velocity * dt, velocity);
            for (p, integrated) in cluster.iter_mut().zip(hermite.particles()) {
                p.position = integrated.position;
                p.velocity = integrated.velocity;
                p.enclosing = integrated.enclosing;
            }
            for group in hermite.groups() {
                let r_search = group_r_search(group.velocity, group.changeover, manager, dt);
                floors.push((group.members, r_search));
            }
            outcome.hermite_steps = hermite.step_count();
            outcome.ar_steps = hermite.ar_step_count();
            outcome.n_merged = hermite.n_merged();
            outcome.n_dissolved = hermite.n_dissolved();
        }
    }

    for p in cluster.iter_mut() {
        p.leave_group();
        p.calc_r_search(dt, manager.search_factor, manager.r_search_min);
    }
    for (members, r_search) in floors {
        for index in members {
            let p = &mut cluster[index];
            p.r_search = p.r_search.max(r_search);
        }
    }
    if manager.check_energy && energy.error.abs() > manager.energy_error_max {
        outcome.failed = snapshot;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::neighbor::DirectNeighborSearch;
    use crate::physics::particle::SoftParticle;

    fn soft(id: i64, mass: Scalar, position: Vector, velocity: Vector) -> SoftParticle {
        SoftParticle::new(Particle::new(id, mass, position, velocity).with_r_search(0.05))
    }

    /// Circular binary of unit masses with separation `a` centered at `center`
    fn binary(first_id: i64, a: Scalar, center: Vector) -> [SoftParticle; 2] {
        let v = 0.5 * libm::sqrt(2.0 / a);
        [
            soft(first_id, 1.0, center - Vector::new(0.5 * a, 0.0, 0.0), Vector::new(0.0, -v, 0.0)),
            soft(first_id + 1, 1.0, center + Vector::new(0.5 * a, 0.0, 0.0), Vector::new(0.0, v, 0.0)),
        ]
    }

    fn manager() -> HardManager {
        HardManager {
            r_tidal_tensor: 5e-3,
            ..Default::default()
        }
    }

    fn system_for(store: &mut ParticleStore, manager: HardManager) -> SystemHard {
        let mut system = SystemHard::new(manager).unwrap();
        let search = DirectNeighborSearch::new(store.as_slice());
        system.partition_store(store, &search).unwrap();
        system.build_clusters(store, 1.0 / 64.0).unwrap();
        system
    }

    #[test]
    fn test_partition_separates_isolated_particles() {
        let mut particles = binary(1, 2e-3, Vector::ZERO).to_vec();
        particles.push(soft(3, 1.0, Vector::new(5.0, 0.0, 0.0), Vector::ZERO));
        let store: ParticleStore = particles.into_iter().collect();

        let mut system = SystemHard::new(manager()).unwrap();
        system.partition_store(&store, &DirectNeighborSearch::new(store.as_slice())).unwrap();
        assert_eq!(system.isolated(), &[2]);
        assert_eq!(system.n_cluster(), 1);
        assert_eq!(system.cluster_sizes(), &[2]);
        assert_eq!(system.hard_particles()[1].adr_org, Some(1));
    }

    #[test]
    fn test_connected_clusters_sort_stably() {
        let mut system = SystemHard::new(manager()).unwrap();
        let p = |id| HardParticle::new(Particle::new(id, 1.0, Vector::ZERO, Vector::ZERO), None);
        system.set_particles_for_connected_cluster(vec![(7, p(1)), (2, p(2)), (7, p(3)), (2, p(4))]);
        let ids: Vec<i64> = system.hard_particles().iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);
        assert_eq!(system.cluster_sizes(), &[2, 2]);
    }

    #[test]
    fn test_mismatched_counts_are_rejected() {
        let store: ParticleStore = binary(1, 2e-3, Vector::ZERO).into_iter().collect();
        let mut system = SystemHard::new(manager()).unwrap();
        let result = system.set_particles_for_isolated_multi_cluster(&store, &[0, 1], &[3]);
        assert!(matches!(result, Err(HardError::Invariant(_))));
    }

    #[test]
    fn test_single_group_cluster_uses_regularized_path() {
        let mut store: ParticleStore = binary(1, 2e-3, Vector::new(1.0, 0.0, 0.0)).into_iter().collect();
        store[0].velocity.x += 0.5;
        store[1].velocity.x += 0.5;
        let mut system = system_for(&mut store, manager());
        assert_eq!(system.n_group_in_cluster(), &[1]);

        let dt = 1.0 / 64.0;
        let report = system.drive_for_multi_cluster(dt, &store).unwrap();
        assert_eq!(report.n_regularized, 1);
        assert!(report.ar_steps > 0);
        assert!(report.energy.relative_error() < 1e-6);

        let particles = system.hard_particles();
        let (mass, position, _) = crate::physics::math::center_of_mass(
            particles.iter().map(|p| (p.mass, p.position, p.velocity)),
        );
        assert_eq!(mass, 2.0);
        assert!((position - Vector::new(1.0 + 0.5 * dt, 0.0, 0.0)).length() < 1e-12);
        for p in particles {
            assert!(p.status.is_single());
            assert_eq!(p.enclosing.mass, 2.0);
            assert!((p.enclosing.velocity.x - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_mixed_cluster_restores_members() {
        let mut particles = binary(1, 2e-3, Vector::ZERO).to_vec();
        particles.push(soft(3, 1.0, Vector::new(0.04, 0.0, 0.0), Vector::ZERO));
        let mut store: ParticleStore = particles.into_iter().collect();
        let mut system = system_for(&mut store, manager());
        assert_eq!(system.n_cluster(), 1);
        assert_eq!(system.n_group_in_cluster(), &[1]);

        let report = system.drive_for_multi_cluster(1.0 / 64.0, &store).unwrap();
        assert_eq!(report.n_combined, 1);
        assert!(report.hermite_steps > 0);

        system.write_back(&mut store);
        let real: Scalar = store.iter().filter(|p| !p.status.is_artificial()).map(|p| p.mass).sum();
        assert!((real - 3.0).abs() < 1e-14);
        for p in store.iter().filter(|p| !p.status.is_artificial()) {
            assert!(p.status.is_single());
        }
        let single = store.iter().find(|p| p.id == 3).unwrap();
        assert_eq!(single.enclosing, EnclosingGroup::default());
    }

    #[test]
    fn test_one_particle_clusters_drift() {
        let mut store: ParticleStore = [soft(1, 1.0, Vector::ZERO, Vector::new(1.0, 0.0, 0.0))].into_iter().collect();
        let system = SystemHard::new(manager()).unwrap();
        system.drive_for_one_cluster(&mut store, &[0], 0.5);
        assert_eq!(store[0].position, Vector::new(0.5, 0.0, 0.0));
        assert!(store[0].r_search >= system.manager().r_search_min);
    }

    #[test]
    fn test_energy_drift_writes_dump() {
        let mut particles = vec![
            soft(1, 1.0, Vector::new(-1e-3, 0.0, 0.0), Vector::new(0.0, -10.0, 0.0)),
            soft(2, 1.0, Vector::new(1e-3, 0.0, 0.0), Vector::new(0.0, 10.0, 0.0)),
        ];
        particles[0].r_search = 0.1;
        particles[1].r_search = 0.1;
        let mut store: ParticleStore = particles.into_iter().collect();

        let mut hard_manager = HardManager {
            energy_error_max: 1e-300,
            r_tidal_tensor: 1e-4,
            ..Default::default()
        };
        hard_manager.hermite.eta = 0.3;
        let dir = std::env::temp_dir().join(format!("hardstep_drift_{}", std::process::id()));
        let mut system = SystemHard::new(hard_manager).unwrap().with_dump_dir(&dir);
        system.partition_store(&store, &DirectNeighborSearch::new(store.as_slice())).unwrap();
        system.build_clusters(&mut store, 1.0 / 64.0).unwrap();
        assert_eq!(system.n_group_in_cluster(), &[0]);

        let result = system.drive_for_multi_cluster(1.0 / 64.0, &store);
        match result {
            Err(HardError::EnergyDrift { cluster, dump, .. }) => {
                assert_eq!(cluster, 0);
                let path = dump.unwrap();
                let restored = ClusterDump::read(&path).unwrap();
                assert_eq!(restored.particles.len(), 2);
                assert_eq!(restored.particles[0].position.x, -1e-3);
            }
            other => panic!("expected an energy drift error, got {other:?}"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
