//! One tree step per `Update`: partition and build, soft force, correction, kick, hard
//! drive and write-back.

use bevy::ecs::schedule::{LogLevel, ScheduleBuildSettings};
use bevy::prelude::*;

use crate::config::SimulationConfig;
use crate::error::HardError;
use crate::hard::{BuildReport, HardManager, HardStepReport, SystemHard};
use crate::physics::math::Scalar;
use crate::physics::octree::Octree;
use crate::physics::soft::{self, SoftForceParams};
use crate::physics::store::ParticleStore;
use crate::resources::{SharedRng, TreeClock};
use crate::scenario::{generate_cluster, total_energy};

#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum HardStepSet {
    Build,
    Force,
    Integrate,
}

/// Diagnostics of the run so far
#[derive(Resource, Debug, Clone, Default)]
pub struct HardStepStats {
    pub initial_energy: Option<Scalar>,
    pub last_build: Option<BuildReport>,
    pub last_report: Option<HardStepReport>,
    /// Energy error accumulated by the hard engines
    pub hard_energy_error: Scalar,
    /// Message of the error that stopped the run
    pub failure: Option<String>,
}

pub struct HardStepPlugin {
    pub config: SimulationConfig,
}

impl HardStepPlugin {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

impl Plugin for HardStepPlugin {
    fn build(&self, app: &mut App) {
        let config = &self.config;
        match toml::to_string_pretty(config) {
            Ok(toml_string) => debug!("Configuration:\n{}", toml_string),
            Err(e) => error!("Failed to serialize configuration to TOML: {}", e),
        }

        let system = match SystemHard::new(config.hard.clone()) {
            Ok(system) => system.with_dump_dir(config.output.dump_dir.clone()),
            Err(e) => {
                error!("Cannot set up the hard system: {e}");
                app.world_mut().send_event(AppExit::error());
                return;
            }
        };

        let mut rng = SharedRng::from_optional_seed(config.scenario.seed);
        let store = generate_cluster(&config.scenario, &config.hard, &mut rng);
        info!(
            "Generated {} singles and {} binaries ({} particles)",
            config.scenario.n_singles,
            config.scenario.n_binaries,
            store.len()
        );

        app.insert_resource(config.clone());
        app.insert_resource(config.hard.clone());
        app.insert_resource(rng);
        app.insert_resource(store);
        app.insert_resource(system);
        app.insert_resource(TreeClock::new(config.scenario.dt_tree, config.scenario.steps));
        app.init_resource::<HardStepStats>();

        app.edit_schedule(Update, |schedule| {
            schedule.set_build_settings(ScheduleBuildSettings {
                ambiguity_detection: LogLevel::Warn,
                ..default()
            });
        });
        app.configure_sets(
            Update,
            (HardStepSet::Build, HardStepSet::Force, HardStepSet::Integrate)
                .chain()
                .run_if(hard_step_active),
        );
        app.add_systems(
            Update,
            (
                rebuild_clusters.in_set(HardStepSet::Build),
                (compute_soft_force, correct_forces)
                    .chain()
                    .in_set(HardStepSet::Force),
                (kick, drive_hard, write_back)
                    .chain()
                    .in_set(HardStepSet::Integrate),
            ),
        );
    }
}

pub fn hard_step_active(clock: Res<TreeClock>, stats: Res<HardStepStats>) -> bool {
    stats.failure.is_none() && !clock.is_finished()
}

fn fail(stats: &mut HardStepStats, exit: &mut EventWriter<AppExit>, error: HardError) {
    error!("Hard step failed: {error}");
    stats.failure = Some(error.to_string());
    exit.write(AppExit::error());
}

/// Drop last step's artificial particles, re-cluster and rebuild groups
pub fn rebuild_clusters(
    mut store: ResMut<ParticleStore>,
    mut system: ResMut<SystemHard>,
    mut stats: ResMut<HardStepStats>,
    clock: Res<TreeClock>,
    mut exit: EventWriter<AppExit>,
) {
    let start = store.artificial_start();
    store.truncate(start);
    if stats.initial_energy.is_none() {
        stats.initial_energy = Some(total_energy(&store, system.manager().g));
    }

    let search = Octree::from_particles(store.as_slice());
    let built = system
        .partition_store(&store, &search)
        .and_then(|_| system.build_clusters(&mut store, clock.dt));
    match built {
        Ok(report) => stats.last_build = Some(report),
        Err(e) => fail(&mut stats, &mut exit, e),
    }
}

pub fn compute_soft_force(mut store: ResMut<ParticleStore>, manager: Res<HardManager>) {
    let params = SoftForceParams {
        g: manager.g,
        eps_sq: manager.eps_sq,
        r_out: manager.r_out_base,
    };
    soft::compute_soft_force(&mut store, &params);
}

/// Cluster-based correction, self-potential of isolated particles, then the staged
/// changeover transitions
pub fn correct_forces(mut store: ResMut<ParticleStore>, mut system: ResMut<SystemHard>) {
    system.correct_force_with_cluster(&mut store);
    system.correct_potential_with_cutoff(&mut store, system.isolated());
    if system.n_cluster_changeover_update() > 0 {
        let search = Octree::from_particles(store.as_slice());
        system.correct_force_for_changeover_update(&mut store, &search, &[]);
    }
}

pub fn kick(mut store: ResMut<ParticleStore>, mut system: ResMut<SystemHard>, clock: Res<TreeClock>) {
    soft::kick(&mut store, clock.dt);
    system.refresh_velocities(&store);
}

pub fn drive_hard(
    mut store: ResMut<ParticleStore>,
    mut system: ResMut<SystemHard>,
    mut stats: ResMut<HardStepStats>,
    clock: Res<TreeClock>,
    mut exit: EventWriter<AppExit>,
) {
    system.drive_for_one_cluster(&mut store, system.isolated(), clock.dt);
    match system.drive_for_multi_cluster(clock.dt, &store) {
        Ok(report) => {
            stats.hard_energy_error += report.energy.error;
            stats.last_report = Some(report);
        }
        Err(e) => fail(&mut stats, &mut exit, e),
    }
}

pub fn write_back(
    mut store: ResMut<ParticleStore>,
    system: Res<SystemHard>,
    mut clock: ResMut<TreeClock>,
    stats: Res<HardStepStats>,
    config: Res<SimulationConfig>,
    mut exit: EventWriter<AppExit>,
) {
    if stats.failure.is_some() {
        return;
    }
    system.write_back(&mut store);
    let start = store.artificial_start();
    store.truncate(start);
    clock.advance();

    let interval = config.output.summary_interval.max(1);
    if clock.step % interval == 0 || clock.is_finished() {
        let energy = total_energy(&store, system.manager().g);
        let initial = stats.initial_energy.unwrap_or(energy);
        info!(
            "Step {} t={:.6}: {} clusters, {} groups, energy {:.9e} (relative change {:.3e}, hard error {:.3e})",
            clock.step,
            clock.time,
            system.n_cluster(),
            system.n_group_in_cluster().iter().sum::<usize>(),
            energy,
            (energy - initial) / initial.abs().max(Scalar::MIN_POSITIVE),
            stats.hard_energy_error
        );
    }
    if clock.is_finished() {
        info!("Finished {} tree steps", clock.step);
        exit.write(AppExit::Success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use crate::test_utils::create_test_app;

    fn config(steps: usize) -> SimulationConfig {
        SimulationConfig {
            hard: HardManager {
                check_energy: false,
                ..Default::default()
            },
            scenario: ScenarioConfig {
                n_singles: 12,
                n_binaries: 2,
                seed: Some(3),
                steps: Some(steps),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_plugin_inserts_resources() {
        let mut app = create_test_app();
        app.add_plugins(HardStepPlugin::new(config(1)));

        assert!(app.world().contains_resource::<SystemHard>());
        assert!(app.world().contains_resource::<HardManager>());
        assert!(app.world().contains_resource::<TreeClock>());
        assert_eq!(app.world().resource::<ParticleStore>().len(), 16);
    }

    #[test]
    fn test_steps_stop_at_limit() {
        let mut app = create_test_app();
        app.add_plugins(HardStepPlugin::new(config(2)));
        for _ in 0..4 {
            app.update();
        }

        let clock = app.world().resource::<TreeClock>();
        assert_eq!(clock.step, 2);
        let stats = app.world().resource::<HardStepStats>();
        assert!(stats.failure.is_none(), "{:?}", stats.failure);
        assert!(stats.last_report.is_some());

        let store = app.world().resource::<ParticleStore>();
        assert_eq!(store.len(), 16);
        assert!(store.iter().all(|p| p.status.is_single()));
    }
}
