use std::path::{Path, PathBuf};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{HardError, HardResult};
use crate::hard::HardManager;
use crate::physics::math::Scalar;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "HARDSTEP";

#[derive(Resource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub hard: HardManager,
    pub scenario: ScenarioConfig,
    pub output: OutputConfig,
}

/// Star cluster generated at startup
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScenarioConfig {
    pub n_singles: usize,
    pub n_binaries: usize,
    pub seed: Option<u64>,
    pub dt_tree: Scalar,
    /// Tree steps to run; `None` runs until interrupted
    pub steps: Option<usize>,
    pub cluster_radius: Scalar,
    pub velocity_dispersion: Scalar,
    pub particle_mass: Scalar,
    pub binary_semi_min: Scalar,
    pub binary_semi_max: Scalar,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            n_singles: 256,
            n_binaries: 16,
            seed: None,
            dt_tree: 1.0 / 64.0,
            steps: Some(64),
            cluster_radius: 1.0,
            velocity_dispersion: 0.5,
            particle_mass: 1.0 / 288.0,
            binary_semi_min: 1e-4,
            binary_semi_max: 5e-4,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Where clusters failing the energy check are dumped
    pub dump_dir: PathBuf,
    /// Log a summary every this many tree steps
    pub summary_interval: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("dumps"),
            summary_interval: 8,
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a file, falling back to defaults if the file doesn't exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse config file {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("Config file {} not found. Using defaults.", path.display());
                Self::default()
            }
        }
    }

    /// Platform config directory of the application, if the platform has one
    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "hardstep", "hardstep")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// User config file layered with `HARDSTEP_*` environment variables, where `__`
    /// separates nested keys (`HARDSTEP_HARD__N_SPLIT=12`)
    pub fn load_from_user_config() -> Self {
        let mut builder = config::Config::builder();
        if let Some(path) = Self::user_config_path() {
            info!("Loading user configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let layered = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<SimulationConfig>());
        match layered {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load user configuration: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> HardResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(HardError::from)
    }
}
