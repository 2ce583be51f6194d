//! Parameters shared by every stage of the hard step.

use std::fmt;
use std::io::{Read, Write};

use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::{HardError, HardResult};
use crate::hard::correction::PotentialCorrection;
use crate::physics::group_layout::GroupLayout;
use crate::physics::integrators::hermite::HermiteRecord;
use crate::physics::integrators::regularized::RegularizedRecord;
use crate::physics::integrators::{HermiteManager, RegularizedManager};
use crate::physics::math::Scalar;

/// Write-once configuration of the hard integrator.
///
/// Softening and the gravitational constant are duplicated into both engine managers;
/// set them through [`HardManager::set_eps_sq`] and [`HardManager::set_g`] so the copies
/// stay in step.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardManager {
    /// Largest tolerated per-cluster energy drift `|ΔE|`
    pub energy_error_max: Scalar,
    /// Tidal sample radius, also the binding radius of the group detector
    pub r_tidal_tensor: Scalar,
    pub r_in_base: Scalar,
    pub r_out_base: Scalar,
    pub eps_sq: Scalar,
    pub g: Scalar,
    /// Added to every artificial particle id so they never collide with real ones
    pub id_offset: i64,
    /// Artificial particles per group are `2 * n_split + 1`
    pub n_split: usize,
    /// Inverse of the mean particle mass, used to scale changeover radii with mass
    pub mean_mass_inv: Scalar,
    pub search_factor: Scalar,
    pub r_search_min: Scalar,
    /// Ceiling on clusters and store particles
    pub array_limit: usize,
    pub check_energy: bool,
    pub potential: PotentialCorrection,
    pub hermite: HermiteManager,
    pub regularized: RegularizedManager,
}

impl Default for HardManager {
    fn default() -> Self {
        let mut manager = Self {
            energy_error_max: 1e-4,
            r_tidal_tensor: 1e-3,
            r_in_base: 1e-3,
            r_out_base: 1e-2,
            eps_sq: 0.0,
            g: 1.0,
            id_offset: 1 << 40,
            n_split: 8,
            mean_mass_inv: 1.0,
            search_factor: 3.0,
            r_search_min: 1e-2,
            array_limit: 1 << 26,
            check_energy: true,
            potential: PotentialCorrection::Total,
            hermite: HermiteManager::default(),
            regularized: RegularizedManager::default(),
        };
        manager.set_dt_range(1.0 / 64.0, 20);
        manager
    }
}

/// Fixed-size checkpoint image of the scalar part of [`HardManager`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct HardRecord {
    pub energy_error_max: f64,
    pub r_tidal_tensor: f64,
    pub r_in_base: f64,
    pub r_out_base: f64,
    pub eps_sq: f64,
    pub g: f64,
    pub id_offset: i64,
    pub n_split: u64,
    pub mean_mass_inv: f64,
    pub search_factor: f64,
    pub r_search_min: f64,
    pub array_limit: u64,
    pub check_energy: u64,
    pub potential: u64,
}

fn read_record<R: Read, T: Pod>(reader: &mut R, what: &str) -> HardResult<T> {
    let mut record = T::zeroed();
    reader
        .read_exact(bytemuck::bytes_of_mut(&mut record))
        .map_err(|e| HardError::Checkpoint(format!("reading {what} record: {e}")))?;
    Ok(record)
}

impl HardManager {
    pub fn set_eps_sq(&mut self, eps_sq: Scalar) {
        self.eps_sq = eps_sq;
        self.hermite.eps_sq = eps_sq;
        self.regularized.eps_sq = eps_sq;
    }

    pub fn set_g(&mut self, g: Scalar) {
        self.g = g;
        self.hermite.g = g;
        self.regularized.g = g;
    }

    /// Time-step bounds of both engines from the largest step and the power-of-two depth
    pub fn set_dt_range(&mut self, dt_max: Scalar, dt_min_index: u32) {
        self.hermite.set_dt_range(dt_max, dt_min_index);
        let dt_min = self.hermite.dt_min();
        self.regularized.time_step_real_min = dt_min;
        self.regularized.time_error_max_real = 0.25 * dt_min;
        self.regularized.slowdown_timescale_max = dt_max;
    }

    pub fn layout(&self) -> HardResult<GroupLayout> {
        GroupLayout::new(self.n_split)
    }

    pub fn check_params(&self) -> HardResult<()> {
        let invalid = |msg: String| Err(HardError::InvalidParameter(msg));
        if !(self.energy_error_max > 0.0) {
            return invalid(format!(
                "energy_error_max must be positive, got {}",
                self.energy_error_max
            ));
        }
        if !(self.r_tidal_tensor > 0.0) {
            return invalid(format!("r_tidal_tensor must be positive, got {}", self.r_tidal_tensor));
        }
        if !(self.r_in_base > 0.0 && self.r_out_base > self.r_in_base) {
            return invalid(format!(
                "changeover radii must satisfy 0 < r_in < r_out, got {} and {}",
                self.r_in_base, self.r_out_base
            ));
        }
        if self.r_tidal_tensor > self.r_out_base {
            return invalid(format!(
                "r_tidal_tensor {} exceeds r_out_base {}",
                self.r_tidal_tensor, self.r_out_base
            ));
        }
        if !(self.eps_sq >= 0.0) {
            return invalid(format!("eps_sq must be non-negative, got {}", self.eps_sq));
        }
        if !(self.g > 0.0) {
            return invalid(format!("g must be positive, got {}", self.g));
        }
        if self.id_offset <= 0 {
            return invalid(format!("id_offset must be positive, got {}", self.id_offset));
        }
        self.layout()?;
        if !(self.mean_mass_inv > 0.0) {
            return invalid(format!("mean_mass_inv must be positive, got {}", self.mean_mass_inv));
        }
        if !(self.search_factor > 0.0 && self.r_search_min > 0.0) {
            return invalid("search_factor and r_search_min must be positive".to_string());
        }
        if self.array_limit == 0 {
            return invalid("array_limit must be positive".to_string());
        }
        if self.hermite.g != self.g || self.regularized.g != self.g {
            return invalid("engine g differs from the hard manager; use set_g".to_string());
        }
        if self.hermite.eps_sq != self.eps_sq || self.regularized.eps_sq != self.eps_sq {
            return invalid("engine eps_sq differs from the hard manager; use set_eps_sq".to_string());
        }
        self.hermite.check_params()?;
        self.regularized.check_params()?;
        Ok(())
    }

    pub fn to_record(&self) -> HardRecord {
        HardRecord {
            energy_error_max: self.energy_error_max,
            r_tidal_tensor: self.r_tidal_tensor,
            r_in_base: self.r_in_base,
            r_out_base: self.r_out_base,
            eps_sq: self.eps_sq,
            g: self.g,
            id_offset: self.id_offset,
            n_split: self.n_split as u64,
            mean_mass_inv: self.mean_mass_inv,
            search_factor: self.search_factor,
            r_search_min: self.r_search_min,
            array_limit: self.array_limit as u64,
            check_energy: self.check_energy as u64,
            potential: self.potential.code(),
        }
    }

    /// Persist the manager followed by both engine managers
    pub fn write_binary<W: Write>(&self, writer: &mut W) -> HardResult<()> {
        let write = |writer: &mut W, bytes: &[u8]| {
            writer
                .write_all(bytes)
                .map_err(|e| HardError::Checkpoint(format!("writing manager record: {e}")))
        };
        write(writer, bytemuck::bytes_of(&self.to_record()))?;
        write(writer, bytemuck::bytes_of(&self.hermite.to_record()))?;
        write(writer, bytemuck::bytes_of(&self.regularized.to_record()))?;
        Ok(())
    }

    pub fn read_binary<R: Read>(reader: &mut R) -> HardResult<Self> {
        let record: HardRecord = read_record(reader, "hard manager")?;
        let hermite: HermiteRecord = read_record(reader, "hermite manager")?;
        let regularized: RegularizedRecord = read_record(reader, "regularized manager")?;

        let potential = PotentialCorrection::from_code(record.potential).ok_or_else(|| {
            HardError::Checkpoint(format!("unknown potential correction code {}", record.potential))
        })?;

        Ok(Self {
            energy_error_max: record.energy_error_max,
            r_tidal_tensor: record.r_tidal_tensor,
            r_in_base: record.r_in_base,
            r_out_base: record.r_out_base,
            eps_sq: record.eps_sq,
            g: record.g,
            id_offset: record.id_offset,
            n_split: checkpoint_usize(record.n_split, "n_split")?,
            mean_mass_inv: record.mean_mass_inv,
            search_factor: record.search_factor,
            r_search_min: record.r_search_min,
            array_limit: checkpoint_usize(record.array_limit, "array_limit")?,
            check_energy: record.check_energy != 0,
            potential,
            hermite: HermiteManager::from_record(&hermite),
            regularized: RegularizedManager::from_record(&regularized)
                .map_err(|e| HardError::Checkpoint(e.to_string()))?,
        })
    }
}

fn checkpoint_usize(value: u64, what: &str) -> HardResult<usize> {
    usize::try_from(value).map_err(|_| HardError::Checkpoint(format!("{what} {value} does not fit this platform")))
}

impl fmt::Display for HardManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "energy_error_max : {}", self.energy_error_max)?;
        writeln!(f, "r_tidal_tensor   : {}", self.r_tidal_tensor)?;
        writeln!(f, "r_in_base        : {}", self.r_in_base)?;
        writeln!(f, "r_out_base       : {}", self.r_out_base)?;
        writeln!(f, "eps_sq           : {}", self.eps_sq)?;
        writeln!(f, "g                : {}", self.g)?;
        writeln!(f, "id_offset        : {}", self.id_offset)?;
        writeln!(f, "n_split          : {}", self.n_split)?;
        writeln!(f, "mean_mass_inv    : {}", self.mean_mass_inv)?;
        writeln!(f, "search_factor    : {}", self.search_factor)?;
        writeln!(f, "r_search_min     : {}", self.r_search_min)?;
        writeln!(f, "array_limit      : {}", self.array_limit)?;
        writeln!(f, "check_energy     : {}", self.check_energy)?;
        writeln!(f, "potential        : {:?}", self.potential)?;
        writeln!(
            f,
            "hermite          : dt_max {} dt_min {} eta {} eta_init {}",
            self.hermite.dt_max,
            self.hermite.dt_min(),
            self.hermite.eta,
            self.hermite.eta_init
        )?;
        write!(
            f,
            "regularized      : scheme {} steps/orbit {} dt_min {} slowdown_max {}",
            self.regularized.scheme,
            self.regularized.steps_per_orbit,
            self.regularized.time_step_real_min,
            self.regularized.slowdown_timescale_max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(HardManager::default().check_params().is_ok());
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let cases: Vec<Box<dyn Fn(&mut HardManager)>> = vec![
            Box::new(|m| m.energy_error_max = 0.0),
            Box::new(|m| m.energy_error_max = Scalar::NAN),
            Box::new(|m| m.r_out_base = m.r_in_base),
            Box::new(|m| m.r_tidal_tensor = -1.0),
            Box::new(|m| m.n_split = 2),
            Box::new(|m| m.id_offset = -1),
            Box::new(|m| m.g = 2.0),
            Box::new(|m| m.array_limit = 0),
        ];
        for (i, case) in cases.iter().enumerate() {
            let mut manager = HardManager::default();
            case(&mut manager);
            assert!(
                matches!(manager.check_params(), Err(HardError::InvalidParameter(_))),
                "Case {i} should be rejected"
            );
        }
    }

    #[test]
    fn test_setters_keep_engines_in_step() {
        let mut manager = HardManager::default();
        manager.set_g(2.0);
        manager.set_eps_sq(1e-8);
        manager.set_dt_range(1.0 / 128.0, 10);
        assert!(manager.check_params().is_ok());
        assert_eq!(manager.regularized.time_step_real_min, 1.0 / 128.0 / 1024.0);
        assert_eq!(manager.regularized.time_error_max_real, 0.25 / 128.0 / 1024.0);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let mut manager = HardManager {
            n_split: 12,
            potential: PotentialCorrection::SoftOnly,
            check_energy: false,
            ..Default::default()
        };
        manager.set_eps_sq(1e-10);
        manager.regularized.scheme = "pefrl".to_string();

        let mut buffer = Vec::new();
        manager.write_binary(&mut buffer).unwrap();
        let restored = HardManager::read_binary(&mut buffer.as_slice()).unwrap();
        assert_eq!(restored, manager);
    }

    #[test]
    fn test_checkpoint_sizes_must_fit_usize() {
        let manager = HardManager::default();
        let mut record = manager.to_record();
        record.array_limit = u64::MAX;

        let mut buffer = Vec::new();
        buffer.extend_from_slice(bytemuck::bytes_of(&record));
        buffer.extend_from_slice(bytemuck::bytes_of(&manager.hermite.to_record()));
        buffer.extend_from_slice(bytemuck::bytes_of(&manager.regularized.to_record()));

        let result = HardManager::read_binary(&mut buffer.as_slice());
        match usize::try_from(u64::MAX) {
            Ok(limit) => assert_eq!(result.unwrap().array_limit, limit),
            Err(_) => assert!(matches!(result, Err(HardError::Checkpoint(_)))),
        }
        assert!(checkpoint_usize(12, "n_split").is_ok_and(|n| n == 12));
    }

    #[test]
    fn test_short_read_fails() {
        let mut buffer = Vec::new();
        HardManager::default().write_binary(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 3);
        assert!(matches!(
            HardManager::read_binary(&mut buffer.as_slice()),
            Err(HardError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_display_lists_parameters() {
        let printed = HardManager::default().to_string();
        assert!(printed.contains("r_out_base"));
        assert!(printed.contains("leapfrog"));
    }
}
