//! Addressing scheme for a group's block of artificial particles.
//!
//! Every group owns `2 * n_split + 1` consecutive store slots:
//!
//! ```text
//! [ tidal samples (8) | orbital samples (2*n_split - 8) | center of mass ]
//!   tidal_start         orbital_start                     cm_index
//! ```
//!
//! Slots are filled in pairs; slot `2k` is tied to the first binary component and slot
//! `2k + 1` to the second, which is what the artificial ids encode.

use std::ops::Range;

use crate::error::{HardError, HardResult};
use crate::physics::particle::{ArtificialKind, GroupIndex, ParticleStatus, SoftParticle};

/// Corners of a cube sampled around each group for the tidal-tensor fit
pub const TIDAL_TENSOR_SAMPLES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLayout {
    pub n_split: usize,
    pub tidal_start: usize,
    pub orbital_start: usize,
    pub cm_index: usize,
    pub block_len: usize,
}

impl GroupLayout {
    /// Smallest split factor that leaves at least one orbital sample pair
    pub const MIN_SPLIT: usize = TIDAL_TENSOR_SAMPLES / 2 + 1;

    pub fn new(n_split: usize) -> HardResult<Self> {
        if n_split < Self::MIN_SPLIT {
            return Err(HardError::InvalidParameter(format!(
                "n_split must be at least {}, got {n_split}",
                Self::MIN_SPLIT
            )));
        }
        Ok(Self {
            n_split,
            tidal_start: 0,
            orbital_start: TIDAL_TENSOR_SAMPLES,
            cm_index: 2 * n_split,
            block_len: 2 * n_split + 1,
        })
    }

    #[inline]
    pub fn tidal_range(&self) -> Range<usize> {
        self.tidal_start..self.orbital_start
    }

    #[inline]
    pub fn orbital_range(&self) -> Range<usize> {
        self.orbital_start..self.cm_index
    }

    /// Number of (first component, second component) orbital sample pairs
    #[inline]
    pub fn orbital_pairs(&self) -> usize {
        (self.cm_index - self.orbital_start) / 2
    }

    /// Store addresses of the tidal samples in the block starting at `block_start`
    #[inline]
    pub fn tidal_addresses(&self, block_start: usize) -> Range<usize> {
        block_start + self.tidal_start..block_start + self.orbital_start
    }

    #[inline]
    pub fn orbital_addresses(&self, block_start: usize) -> Range<usize> {
        block_start + self.orbital_start..block_start + self.cm_index
    }

    #[inline]
    pub fn cm_address(&self, block_start: usize) -> usize {
        block_start + self.cm_index
    }

    /// Id of the artificial particle in `slot`, derived from its component's first member id
    pub fn artificial_id(&self, id_offset: i64, component_member_id: i64, slot: usize) -> i64 {
        id_offset + component_member_id * self.n_split as i64 + (slot / 2) as i64
    }

    /// Group bookkeeping stored in a block's center-of-mass particle
    pub fn group_index(&self, block: &[SoftParticle]) -> HardResult<GroupIndex> {
        let cm = block.get(self.cm_index).ok_or_else(|| {
            HardError::Invariant(format!(
                "artificial block of length {} is shorter than {}",
                block.len(),
                self.block_len
            ))
        })?;
        match cm.status {
            ParticleStatus::Artificial(tag) if matches!(tag.kind, ArtificialKind::CenterOfMass { .. }) => {
                Ok(tag.group)
            }
            other => Err(HardError::Invariant(format!(
                "slot {} of an artificial block is not a center-of-mass particle (status code {})",
                self.cm_index,
                other.code()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_length_is_twice_split_plus_one() {
        for n_split in [5, 8, 16] {
            let layout = GroupLayout::new(n_split).unwrap();
            assert_eq!(layout.block_len, 2 * n_split + 1);
            assert_eq!(layout.tidal_range().len(), TIDAL_TENSOR_SAMPLES);
            assert_eq!(layout.orbital_range().len(), 2 * n_split - TIDAL_TENSOR_SAMPLES);
            assert_eq!(layout.orbital_pairs(), n_split - 4);
            assert_eq!(layout.cm_index, layout.block_len - 1);
        }
    }

    #[test]
    fn test_rejects_split_without_orbital_samples() {
        assert!(GroupLayout::new(4).is_err());
        assert!(GroupLayout::new(0).is_err());
    }

    #[test]
    fn test_addresses_are_offset_by_block_start() {
        let layout = GroupLayout::new(8).unwrap();
        assert_eq!(layout.tidal_addresses(100), 100..108);
        assert_eq!(layout.orbital_addresses(100), 108..116);
        assert_eq!(layout.cm_address(100), 116);
    }

    #[test]
    fn test_artificial_ids_pair_up() {
        let layout = GroupLayout::new(8).unwrap();
        assert_eq!(layout.artificial_id(1000, 3, 0), 1024);
        assert_eq!(layout.artificial_id(1000, 3, 1), 1024);
        assert_eq!(layout.artificial_id(1000, 3, 6), 1027);
    }

    #[test]
    fn test_group_index_requires_cm_slot() {
        let layout = GroupLayout::new(5).unwrap();
        let block = vec![SoftParticle::default(); layout.block_len];
        assert!(layout.group_index(&block).is_err());
        assert!(layout.group_index(&block[..3]).is_err());
    }
}
