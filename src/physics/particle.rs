//! Particle records shared by the hard integrator and the global particle store.
//!
//! A particle is always in exactly one of three states, encoded by [`ParticleStatus`]:
//! a true single, a member of a bound group (live mass zeroed, real mass kept in the
//! tag), or an artificial sample particle that stands in for a group in the tree.

use crate::physics::changeover::ChangeOver;
use crate::physics::math::{Scalar, Vector};
use bevy::prelude::{Deref, DerefMut};
use serde::{Deserialize, Serialize};

/// Index bookkeeping carried by every artificial particle of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupIndex {
    pub i_cluster: usize,
    pub i_group: usize,
    pub n_members: usize,
    /// Members belonging to the first binary component; listed first in the cluster
    pub n_members_1st: usize,
    pub first_member_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ArtificialKind {
    /// Massless probe of the external field for the tidal-tensor fit
    TidalSample,
    /// Massive sample along the group's orbit; the tree sees the group through these
    OrbitalSample,
    /// Center-of-mass placeholder; live mass is zero, the group mass is kept here
    CenterOfMass { group_mass: Scalar },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArtificialTag {
    pub kind: ArtificialKind,
    pub group: GroupIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ParticleStatus {
    #[default]
    Single,
    /// Grouped particle; `cm_address` is the store address of its group's center-of-mass particle
    Member { cm_address: usize, real_mass: Scalar },
    Artificial(ArtificialTag),
}

impl ParticleStatus {
    #[inline]
    pub fn is_single(&self) -> bool {
        matches!(self, ParticleStatus::Single)
    }

    #[inline]
    pub fn is_member(&self) -> bool {
        matches!(self, ParticleStatus::Member { .. })
    }

    #[inline]
    pub fn is_artificial(&self) -> bool {
        matches!(self, ParticleStatus::Artificial(_))
    }

    /// Mass saved while the live mass is zeroed (group members and center-of-mass particles)
    pub fn backup_mass(&self) -> Option<Scalar> {
        match self {
            ParticleStatus::Member { real_mass, .. } => Some(*real_mass),
            ParticleStatus::Artificial(ArtificialTag {
                kind: ArtificialKind::CenterOfMass { group_mass },
                ..
            }) => Some(*group_mass),
            _ => None,
        }
    }

    /// Signed legacy tag: 0 for singles, minus the center-of-mass address for members,
    /// and a positive role code for artificial particles.
    pub fn code(&self) -> i64 {
        match self {
            ParticleStatus::Single => 0,
            ParticleStatus::Member { cm_address, .. } => -(*cm_address as i64),
            ParticleStatus::Artificial(tag) => match tag.kind {
                ArtificialKind::TidalSample => 1,
                ArtificialKind::OrbitalSample => 2,
                ArtificialKind::CenterOfMass { .. } => 3,
            },
        }
    }
}

/// Velocity and mass of the group a particle was integrated in, zero for true singles.
///
/// Written after each hard step so that the next neighbor search can predict the
/// particle with its group's motion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnclosingGroup {
    pub velocity: Vector,
    pub mass: Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: i64,
    /// Live mass; zero while the particle is a group member
    pub mass: Scalar,
    pub position: Vector,
    pub velocity: Vector,
    pub changeover: ChangeOver,
    pub r_search: Scalar,
    pub status: ParticleStatus,
    pub enclosing: EnclosingGroup,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            id: 0,
            mass: 0.0,
            position: Vector::ZERO,
            velocity: Vector::ZERO,
            changeover: ChangeOver::default(),
            r_search: 0.0,
            status: ParticleStatus::Single,
            enclosing: EnclosingGroup::default(),
        }
    }
}

impl Particle {
    pub fn new(id: i64, mass: Scalar, position: Vector, velocity: Vector) -> Self {
        Self {
            id,
            mass,
            position,
            velocity,
            ..Default::default()
        }
    }

    pub fn with_changeover(mut self, changeover: ChangeOver) -> Self {
        self.changeover = changeover;
        self
    }

    pub fn with_r_search(mut self, r_search: Scalar) -> Self {
        self.r_search = r_search;
        self
    }

    /// Physical mass regardless of grouping state
    pub fn real_mass(&self) -> Scalar {
        self.status.backup_mass().unwrap_or(self.mass)
    }

    /// Search radius covering the distance travelled in `dt` plus the outer changeover radius
    pub fn calc_r_search(&mut self, dt: Scalar, search_factor: Scalar, r_search_min: Scalar) {
        let travel = self.velocity.length() * dt * search_factor;
        self.r_search = (travel + self.changeover.r_out()).max(r_search_min);
    }

    /// Mark as a member of the group whose center-of-mass particle lives at `cm_address`
    pub fn enter_group(&mut self, cm_address: usize) {
        let real_mass = self.real_mass();
        self.status = ParticleStatus::Member {
            cm_address,
            real_mass,
        };
        self.mass = 0.0;
    }

    /// Restore the live mass of a group member and return it to the single state
    pub fn leave_group(&mut self) {
        if let ParticleStatus::Member { real_mass, .. } = self.status {
            self.mass = real_mass;
        }
        self.status = ParticleStatus::Single;
    }
}

/// Entry of the per-cluster hard buffer: a particle plus the address of its store mirror
#[derive(Debug, Clone, Copy, PartialEq, Default, Deref, DerefMut, Serialize, Deserialize)]
pub struct HardParticle {
    #[deref]
    pub particle: Particle,
    /// Address in the global store, `None` when the mirror is owned remotely
    pub adr_org: Option<usize>,
}

impl HardParticle {
    pub fn new(particle: Particle, adr_org: Option<usize>) -> Self {
        Self { particle, adr_org }
    }
}

/// Entry of the global particle store; adds the long-range force results
#[derive(Debug, Clone, Copy, PartialEq, Default, Deref, DerefMut, Serialize, Deserialize)]
pub struct SoftParticle {
    #[deref]
    pub particle: Particle,
    pub acc: Vector,
    pub pot_tot: Scalar,
}

impl SoftParticle {
    pub fn new(particle: Particle) -> Self {
        Self {
            particle,
            acc: Vector::ZERO,
            pot_tot: 0.0,
        }
    }
}

impl From<Particle> for SoftParticle {
    fn from(particle: Particle) -> Self {
        Self::new(particle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_round_trip_restores_mass_and_status() {
        let mut particle = Particle::new(3, 2.5, Vector::X, Vector::Y);

        particle.enter_group(17);
        assert_eq!(particle.mass, 0.0);
        assert_eq!(particle.real_mass(), 2.5);
        assert_eq!(particle.status.code(), -17);
        assert!(particle.status.is_member());

        particle.leave_group();
        assert_eq!(particle.mass, 2.5);
        assert_eq!(particle.status, ParticleStatus::Single);
        assert_eq!(particle.status.code(), 0);
    }

    #[test]
    fn test_regrouping_keeps_real_mass() {
        let mut particle = Particle::new(1, 1.0, Vector::ZERO, Vector::ZERO);
        particle.enter_group(4);
        particle.enter_group(9);
        assert_eq!(particle.real_mass(), 1.0);
        assert_eq!(particle.status.code(), -9);
    }

    #[test]
    fn test_center_of_mass_backup_mass() {
        let status = ParticleStatus::Artificial(ArtificialTag {
            kind: ArtificialKind::CenterOfMass { group_mass: 3.0 },
            group: GroupIndex::default(),
        });
        assert_eq!(status.backup_mass(), Some(3.0));
        assert!(status.code() > 0);

        let orbital = ParticleStatus::Artificial(ArtificialTag {
            kind: ArtificialKind::OrbitalSample,
            group: GroupIndex::default(),
        });
        assert_eq!(orbital.backup_mass(), None);
    }

    #[test]
    fn test_calc_r_search() {
        let mut particle = Particle::new(0, 1.0, Vector::ZERO, Vector::new(3.0, 4.0, 0.0))
            .with_changeover(ChangeOver::new(0.1, 0.5));

        particle.calc_r_search(0.1, 2.0, 0.0);
        assert!((particle.r_search - 1.5).abs() < 1e-14);

        particle.calc_r_search(0.1, 2.0, 4.0);
        assert_eq!(particle.r_search, 4.0);
    }

    #[test]
    fn test_deref_reaches_particle_fields() {
        let mut hard = HardParticle::new(Particle::new(5, 1.0, Vector::ZERO, Vector::ZERO), Some(2));
        hard.mass = 4.0;
        assert_eq!(hard.particle.mass, 4.0);
        assert_eq!(hard.id, 5);

        let soft: SoftParticle = hard.particle.into();
        assert_eq!(soft.acc, Vector::ZERO);
        assert_eq!(soft.mass, 4.0);
    }
}
