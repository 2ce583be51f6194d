//! Energy bookkeeping for driven clusters and the postmortem dump written when a
//! cluster drifts past the allowed error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HardResult;
use crate::physics::math::Scalar;
use crate::physics::particle::HardParticle;

/// Energies of one driven cluster
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterEnergy {
    pub initial: Scalar,
    pub last: Scalar,
    /// Drift not explained by the perturbation work
    pub error: Scalar,
}

impl ClusterEnergy {
    pub fn relative_error(&self) -> Scalar {
        if self.initial == 0.0 {
            self.error.abs()
        } else {
            (self.error / self.initial).abs()
        }
    }
}

impl std::ops::AddAssign for ClusterEnergy {
    fn add_assign(&mut self, other: Self) {
        self.initial += other.initial;
        self.last += other.last;
        self.error += other.error;
    }
}

/// State of a cluster at the start of a failed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDump {
    pub written_at: String,
    pub cluster: usize,
    pub engine: String,
    pub time_step: Scalar,
    pub threshold: Scalar,
    pub energy: ClusterEnergy,
    pub particles: Vec<HardParticle>,
}

impl ClusterDump {
    pub fn new(
        cluster: usize,
        engine: &str,
        time_step: Scalar,
        threshold: Scalar,
        energy: ClusterEnergy,
        particles: Vec<HardParticle>,
    ) -> Self {
        Self {
            written_at: chrono::Local::now().to_rfc3339(),
            cluster,
            engine: engine.to_string(),
            time_step,
            threshold,
            energy,
            particles,
        }
    }

    /// Write as TOML under `dir`, returning the file path
    pub fn write(&self, dir: &Path) -> HardResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S%.3f");
        let path = dir.join(format!("hard_dump_c{}_{stamp}.toml", self.cluster));
        fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> HardResult<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| crate::error::HardError::Serialize(e.to_string()))
    }
}
