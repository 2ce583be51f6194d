//! Commonly used types of the crate and of bevy.

pub use bevy::prelude::*;
pub use rand::Rng;

pub use crate::config::SimulationConfig;
pub use crate::error::{HardError, HardResult};
pub use crate::hard::{ClusterTable, HardManager, HardStepReport, PotentialCorrection, SystemHard};
pub use crate::physics::changeover::ChangeOver;
pub use crate::physics::math::{Scalar, Vector};
pub use crate::physics::particle::{HardParticle, Particle, ParticleStatus, SoftParticle};
pub use crate::physics::store::ParticleStore;
pub use crate::resources::{SharedRng, TreeClock};
