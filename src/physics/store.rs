//! Global particle store: every locally owned particle plus the artificial particles of
//! the current tree step, addressed by index.

use std::ops::{Index, IndexMut};

use bevy::prelude::*;

use crate::physics::particle::SoftParticle;

#[derive(Resource, Debug, Clone, Default)]
pub struct ParticleStore {
    particles: Vec<SoftParticle>,
}

impl ParticleStore {
    pub fn new(particles: Vec<SoftParticle>) -> Self {
        Self { particles }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    #[inline]
    pub fn get(&self, address: usize) -> Option<&SoftParticle> {
        self.particles.get(address)
    }

    #[inline]
    pub fn get_mut(&mut self, address: usize) -> Option<&mut SoftParticle> {
        self.particles.get_mut(address)
    }

    /// Append particles and return the address of the first one
    pub fn append(&mut self, particles: impl IntoIterator<Item = SoftParticle>) -> usize {
        let base = self.particles.len();
        self.particles.extend(particles);
        base
    }

    /// Reserve `n` default slots at the end and return the base address
    pub fn grow(&mut self, n: usize) -> usize {
        let base = self.particles.len();
        self.particles.resize(base + n, SoftParticle::default());
        base
    }

    /// Drop everything from `len` on, typically last step's artificial particles
    pub fn truncate(&mut self, len: usize) {
        self.particles.truncate(len);
    }

    #[inline]
    pub fn as_slice(&self) -> &[SoftParticle] {
        &self.particles
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [SoftParticle] {
        &mut self.particles
    }

    pub fn iter(&self) -> impl Iterator<Item = &SoftParticle> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SoftParticle> {
        self.particles.iter_mut()
    }

    /// First address holding an artificial particle, or `len()` if there is none
    pub fn artificial_start(&self) -> usize {
        self.particles
            .iter()
            .position(|p| p.status.is_artificial())
            .unwrap_or(self.particles.len())
    }
}

impl Index<usize> for ParticleStore {
    type Output = SoftParticle;

    fn index(&self, address: usize) -> &Self::Output {
        &self.particles[address]
    }
}

impl IndexMut<usize> for ParticleStore {
    fn index_mut(&mut self, address: usize) -> &mut Self::Output {
        &mut self.particles[address]
    }
}

impl FromIterator<SoftParticle> for ParticleStore {
    fn from_iter<I: IntoIterator<Item = SoftParticle>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::math::Vector;
    use crate::physics::particle::Particle;

    fn particle(id: i64) -> SoftParticle {
        SoftParticle::new(Particle::new(id, 1.0, Vector::ZERO, Vector::ZERO))
    }

    #[test]
    fn test_append_returns_base_address() {
        let mut store: ParticleStore = (0..3).map(particle).collect();
        let base = store.append([particle(10), particle(11)]);
        assert_eq!(base, 3);
        assert_eq!(store.len(), 5);
        assert_eq!(store[4].id, 11);
    }

    #[test]
    fn test_grow_and_truncate() {
        let mut store: ParticleStore = (0..2).map(particle).collect();
        let base = store.grow(4);
        assert_eq!(base, 2);
        assert_eq!(store.len(), 6);
        store.truncate(base);
        assert_eq!(store.len(), 2);
        assert_eq!(store.artificial_start(), 2);
    }
}
