use bevy::prelude::*;
use rand_chacha::{ChaCha8Rng, rand_core::SeedableRng};

use crate::physics::math::Scalar;

/// Random source for scenario generation
#[derive(Resource, Deref, DerefMut, Debug, Clone, PartialEq)]
pub struct SharedRng(pub ChaCha8Rng);

impl SharedRng {
    pub fn from_seed(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::default(),
        }
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self(ChaCha8Rng::from_rng(&mut rand::rng()))
    }
}

/// Tree step length and progress of the run
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct TreeClock {
    pub dt: Scalar,
    pub time: Scalar,
    pub step: usize,
    /// Stop after this many steps; `None` runs until the app exits
    pub max_steps: Option<usize>,
}

impl Default for TreeClock {
    fn default() -> Self {
        Self {
            dt: 1.0 / 64.0,
            time: 0.0,
            step: 0,
            max_steps: None,
        }
    }
}

impl TreeClock {
    pub fn new(dt: Scalar, max_steps: Option<usize>) -> Self {
        Self {
            dt,
            max_steps,
            ..Default::default()
        }
    }

    pub fn advance(&mut self) {
        self.step += 1;
        self.time = self.step as Scalar * self.dt;
    }

    pub fn is_finished(&self) -> bool {
        self.max_steps.is_some_and(|max| self.step >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let mut a = SharedRng::from_seed(42);
        let mut b = SharedRng::from_optional_seed(Some(42));
        let xs: Vec<f64> = (0..4).map(|_| a.random()).collect();
        let ys: Vec<f64> = (0..4).map(|_| b.random()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_clock_stops_at_max_steps() {
        let mut clock = TreeClock::new(0.25, Some(2));
        assert!(!clock.is_finished());
        clock.advance();
        clock.advance();
        assert!(clock.is_finished());
        assert_eq!(clock.time, 0.5);
    }
}
