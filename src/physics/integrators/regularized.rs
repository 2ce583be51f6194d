//! Algorithmic regularization (LogH) for bound groups.
//!
//! The group is integrated in its center-of-mass frame with the time transformation
//! `dt = ds / U` for kicks and `dt = ds / (T + B)` for drifts, where `U` is the force
//! function and `B` the binding energy carried as an extra momentum. With this
//! transformation a leapfrog step follows the Kepler energy exactly, so close
//! encounters and highly eccentric orbits need no step-size control.
//!
//! A weakly perturbed binary is additionally slowed down by a factor `κ`: its orbit is
//! followed at `1/κ` of the real speed while the perturbation is amplified by `κ`, which
//! preserves the secular effect of the perturbation at a fraction of the cost.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::SymplecticScheme;
use super::registry::SchemeRegistry;
use crate::error::{HardError, HardResult};
use crate::physics::kepler::KeplerOrbit;
use crate::physics::math::{Scalar, Vector, center_of_mass};
use crate::physics::tidal_tensor::TidalTensor;

const SCHEME_NAME_BYTES: usize = 16;
const MAX_LANDING_ITERATIONS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegularizedManager {
    pub g: Scalar,
    pub eps_sq: Scalar,
    /// Smallest physical time step; set together with the Hermite step range
    pub time_step_real_min: Scalar,
    /// Tolerance when landing on the requested end time
    pub time_error_max_real: Scalar,
    pub step_count_max: usize,
    pub steps_per_orbit: usize,
    /// A binary is slowed down only when its inner force exceeds the perturbation by
    /// the inverse of this ratio
    pub slowdown_pert_ratio_ref: Scalar,
    /// Upper bound on `κ · period`
    pub slowdown_timescale_max: Scalar,
    pub scheme: String,
}

impl Default for RegularizedManager {
    fn default() -> Self {
        let dt_min = 1.0 / 64.0 / (1u64 << 20) as Scalar;
        Self {
            g: 1.0,
            eps_sq: 0.0,
            time_step_real_min: dt_min,
            time_error_max_real: 0.25 * dt_min,
            step_count_max: 1_000_000,
            steps_per_orbit: 64,
            slowdown_pert_ratio_ref: 1e-4,
            slowdown_timescale_max: 1.0 / 64.0,
            scheme: "leapfrog".to_string(),
        }
    }
}

/// Fixed-size checkpoint image of [`RegularizedManager`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RegularizedRecord {
    pub g: f64,
    pub eps_sq: f64,
    pub time_step_real_min: f64,
    pub time_error_max_real: f64,
    pub step_count_max: u64,
    pub steps_per_orbit: u64,
    pub slowdown_pert_ratio_ref: f64,
    pub slowdown_timescale_max: f64,
    pub scheme: [u8; SCHEME_NAME_BYTES],
}

impl RegularizedManager {
    pub fn check_params(&self) -> HardResult<()> {
        let invalid = |msg: String| Err(HardError::InvalidParameter(msg));
        if self.g <= 0.0 {
            return invalid(format!("regularized g must be positive, got {}", self.g));
        }
        if self.eps_sq < 0.0 {
            return invalid(format!("regularized eps_sq must be non-negative, got {}", self.eps_sq));
        }
        if self.time_step_real_min <= 0.0 {
            return invalid("regularized time_step_real_min is unset".to_string());
        }
        if self.time_error_max_real <= 0.0 || self.time_error_max_real > self.time_step_real_min {
            return invalid(format!(
                "regularized time_error_max_real must lie in (0, {}], got {}",
                self.time_step_real_min, self.time_error_max_real
            ));
        }
        if self.step_count_max == 0 || self.steps_per_orbit == 0 {
            return invalid("regularized step counts must be positive".to_string());
        }
        if self.slowdown_pert_ratio_ref <= 0.0 || self.slowdown_timescale_max <= 0.0 {
            return invalid("regularized slowdown parameters must be positive".to_string());
        }
        if self.scheme.len() > SCHEME_NAME_BYTES {
            return invalid(format!(
                "scheme name '{}' is longer than {SCHEME_NAME_BYTES} bytes",
                self.scheme
            ));
        }
        SchemeRegistry::default().create(&self.scheme).map(|_| ())
    }

    pub fn to_record(&self) -> RegularizedRecord {
        let mut scheme = [0u8; SCHEME_NAME_BYTES];
        let bytes = self.scheme.as_bytes();
        let len = bytes.len().min(SCHEME_NAME_BYTES);
        scheme[..len].copy_from_slice(&bytes[..len]);

        RegularizedRecord {
            g: self.g,
            eps_sq: self.eps_sq,
            time_step_real_min: self.time_step_real_min,
            time_error_max_real: self.time_error_max_real,
            step_count_max: self.step_count_max as u64,
            steps_per_orbit: self.steps_per_orbit as u64,
            slowdown_pert_ratio_ref: self.slowdown_pert_ratio_ref,
            slowdown_timescale_max: self.slowdown_timescale_max,
            scheme,
        }
    }

    pub fn from_record(record: &RegularizedRecord) -> HardResult<Self> {
        let end = record
            .scheme
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SCHEME_NAME_BYTES);
        let scheme = std::str::from_utf8(&record.scheme[..end])
            .map_err(|e| HardError::Checkpoint(format!("scheme name is not UTF-8: {e}")))?;

        Ok(Self {
            g: record.g,
            eps_sq: record.eps_sq,
            time_step_real_min: record.time_step_real_min,
            time_error_max_real: record.time_error_max_real,
            step_count_max: record.step_count_max as usize,
            steps_per_orbit: record.steps_per_orbit as usize,
            slowdown_pert_ratio_ref: record.slowdown_pert_ratio_ref,
            slowdown_timescale_max: record.slowdown_timescale_max,
            scheme: scheme.to_string(),
        })
    }
}

/// Group member as seen by the regularized engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArBody {
    /// Caller-side index used when writing results back
    pub index: usize,
    pub mass: Scalar,
    pub position: Vector,
    pub velocity: Vector,
}

/// Phase-space state advanced by the composition scheme
#[derive(Debug, Clone)]
struct ArState {
    g: Scalar,
    eps_sq: Scalar,
    /// Members relative to the center of mass
    bodies: Vec<ArBody>,
    /// `B = -E` minus the accumulated perturbation work
    binding: Scalar,
    time: Scalar,
    slowdown: Scalar,
    tidal: Option<TidalTensor>,
    /// Extra per-member acceleration, held fixed over one `integrate_to` call
    perturbation: Vec<Vector>,
    acc: Vec<Vector>,
}

impl ArState {
    fn kinetic(&self) -> Scalar {
        self.bodies
            .iter()
            .map(|b| 0.5 * b.mass * b.velocity.length_squared())
            .sum()
    }

    fn force_function(&self) -> Scalar {
        let mut u = 0.0;
        for (i, bi) in self.bodies.iter().enumerate() {
            for bj in &self.bodies[i + 1..] {
                let r2 = (bi.position - bj.position).length_squared() + self.eps_sq;
                u += self.g * bi.mass * bj.mass / libm::sqrt(r2);
            }
        }
        u
    }

    fn compute_inner_acc(&mut self) {
        self.acc.clear();
        self.acc.resize(self.bodies.len(), Vector::ZERO);
        for i in 0..self.bodies.len() {
            for j in i + 1..self.bodies.len() {
                let dr = self.bodies[i].position - self.bodies[j].position;
                let r2 = dr.length_squared() + self.eps_sq;
                let inv_r3 = 1.0 / (r2 * libm::sqrt(r2));
                self.acc[i] -= dr * (self.g * self.bodies[j].mass * inv_r3);
                self.acc[j] += dr * (self.g * self.bodies[i].mass * inv_r3);
            }
        }
    }

    fn perturbation_of(&self, i: usize) -> Vector {
        let tidal = self
            .tidal
            .as_ref()
            .map(|tt| tt.tensor * self.bodies[i].position)
            .unwrap_or(Vector::ZERO);
        tidal + self.perturbation.get(i).copied().unwrap_or(Vector::ZERO)
    }

    fn apply_kick(&mut self, dtau: Scalar) {
        self.compute_inner_acc();
        let mut work = 0.0;
        for i in 0..self.bodies.len() {
            let a_pert = self.perturbation_of(i) * self.slowdown;
            let body = &mut self.bodies[i];
            let v_old = body.velocity;
            body.velocity += (self.acc[i] + a_pert) * dtau;
            work += body.mass * (0.5 * (v_old + body.velocity)).dot(a_pert) * dtau;
        }
        self.binding -= work;
    }

    fn apply_drift(&mut self, dtau: Scalar) {
        for body in &mut self.bodies {
            body.position += body.velocity * dtau;
        }
        self.time += self.slowdown * dtau;
    }

    /// Plain leapfrog over a physical interval, used to close tiny gaps to the end time
    fn fixed_time_step(&mut self, dt: Scalar) {
        let dtau = dt / self.slowdown;
        self.apply_drift(0.5 * dtau);
        self.apply_kick(dtau);
        self.apply_drift(0.5 * dtau);
    }
}

impl super::SplitSystem for ArState {
    fn drift(&mut self, ds: Scalar) {
        let dtau = ds / (self.kinetic() + self.binding);
        self.apply_drift(dtau);
    }

    fn kick(&mut self, ds: Scalar) {
        let dtau = ds / self.force_function();
        self.apply_kick(dtau);
    }
}

#[derive(Debug, Clone)]
pub struct RegularizedIntegrator {
    manager: RegularizedManager,
    scheme: Box<dyn SymplecticScheme>,
    state: ArState,
    mass: Scalar,
    cm_position: Vector,
    cm_velocity: Vector,
    ds: Scalar,
    step_count: usize,
}

impl RegularizedIntegrator {
    /// Build from members in absolute coordinates; the engine works in their
    /// center-of-mass frame
    pub fn new(
        manager: &RegularizedManager,
        scheme: Box<dyn SymplecticScheme>,
        members: impl IntoIterator<Item = ArBody>,
    ) -> Self {
        let mut bodies: Vec<ArBody> = members.into_iter().collect();
        let (mass, cm_position, cm_velocity) =
            center_of_mass(bodies.iter().map(|b| (b.mass, b.position, b.velocity)));
        for body in &mut bodies {
            body.position -= cm_position;
            body.velocity -= cm_velocity;
        }

        Self {
            manager: manager.clone(),
            scheme,
            state: ArState {
                g: manager.g,
                eps_sq: manager.eps_sq,
                perturbation: vec![Vector::ZERO; bodies.len()],
                acc: Vec::with_capacity(bodies.len()),
                bodies,
                binding: 0.0,
                time: 0.0,
                slowdown: 1.0,
                tidal: None,
            },
            mass,
            cm_position,
            cm_velocity,
            ds: 0.0,
            step_count: 0,
        }
    }

    /// Tidal field acting on the members, with its center moved to the group center
    pub fn set_tidal_tensor(&mut self, tidal: Option<TidalTensor>) {
        self.state.tidal = tidal.map(|mut tt| {
            tt.shift_cm(self.cm_position);
            tt
        });
    }

    pub fn tidal_tensor(&self) -> Option<&TidalTensor> {
        self.state.tidal.as_ref()
    }

    /// Per-member perturbing acceleration; its mass-weighted mean must be zero
    pub fn set_perturbation(&mut self, perturbation: Vec<Vector>) {
        debug_assert_eq!(perturbation.len(), self.state.bodies.len());
        self.state.perturbation = perturbation;
        self.update_slowdown();
    }

    /// Reset the clock and the binding energy, and pick the step length
    pub fn initialize(&mut self, time: Scalar) {
        self.state.time = time;
        self.state.binding = self.state.force_function() - self.state.kinetic();
        self.update_slowdown();
        self.ds = self.calc_ds();
    }

    /// Step length in `s` giving roughly `steps_per_orbit` steps per characteristic time
    fn calc_ds(&self) -> Scalar {
        let bodies = &self.state.bodies;
        let g = self.state.g;

        let tightest = (0..bodies.len())
            .flat_map(|i| (i + 1..bodies.len()).map(move |j| (i, j)))
            .max_by(|&(a, b), &(c, d)| {
                let u = |i: usize, j: usize| {
                    bodies[i].mass * bodies[j].mass / (bodies[i].position - bodies[j].position).length()
                };
                u(a, b).total_cmp(&u(c, d))
            });

        let Some((i, j)) = tightest else {
            return 0.0;
        };

        let pair_mass = bodies[i].mass + bodies[j].mass;
        let dx = bodies[j].position - bodies[i].position;
        let dv = bodies[j].velocity - bodies[i].velocity;
        let time_scale = match KeplerOrbit::from_relative(pair_mass, dx, dv, g) {
            Some(orbit) => orbit.period,
            None => {
                let r = dx.length();
                let crossing = r / dv.length().max(Scalar::MIN_POSITIVE);
                let free_fall = libm::sqrt(r * r * r / (g * pair_mass));
                std::f64::consts::TAU * crossing.min(free_fall)
            }
        };

        self.state.force_function() * time_scale / self.manager.steps_per_orbit as Scalar
    }

    fn update_slowdown(&mut self) {
        self.state.slowdown = self.calc_slowdown();
    }

    fn calc_slowdown(&self) -> Scalar {
        let Some(orbit) = self.binary_orbit() else {
            return 1.0;
        };

        let bodies = &self.state.bodies;
        let (m1, m2) = (bodies[0].mass, bodies[1].mass);
        let reduced = m1 * m2 / (m1 + m2);

        let inner = self.state.g * m1 * m2 / (orbit.semi * orbit.semi);
        let tidal = self
            .state
            .tidal
            .as_ref()
            .map(|tt| {
                [tt.tensor.x_axis, tt.tensor.y_axis, tt.tensor.z_axis]
                    .iter()
                    .map(|col| col.length())
                    .fold(0.0, Scalar::max)
            })
            .unwrap_or(0.0);
        let differential = (self.state.perturbation[1] - self.state.perturbation[0]).length();
        let outer = reduced * (tidal * orbit.semi + differential);

        let kappa_max = (self.manager.slowdown_timescale_max / orbit.period).max(1.0);
        if outer <= 0.0 {
            return kappa_max;
        }
        (self.manager.slowdown_pert_ratio_ref * inner / outer).clamp(1.0, kappa_max)
    }

    /// Relative orbit of a two-member group, `None` for larger or unbound groups
    pub fn binary_orbit(&self) -> Option<KeplerOrbit> {
        match self.state.bodies.as_slice() {
            [a, b] => KeplerOrbit::from_relative(
                a.mass + b.mass,
                b.position - a.position,
                b.velocity - a.velocity,
                self.state.g,
            ),
            _ => None,
        }
    }

    /// Advance to physical time `time_end`, landing within `time_error_max_real`
    pub fn integrate_to(&mut self, time_end: Scalar) -> HardResult<()> {
        if self.state.bodies.len() < 2 {
            self.state.time = time_end;
            return Ok(());
        }

        let tolerance = self.manager.time_error_max_real;
        while time_end - self.state.time > tolerance {
            if self.step_count >= self.manager.step_count_max {
                return Err(HardError::StepLimit {
                    engine: "regularized",
                    steps: self.step_count,
                    time: self.state.time,
                    target: time_end,
                });
            }

            let backup = self.state.clone();
            let t0 = backup.time;
            let mut ds = self.ds;
            self.scheme.step(&mut self.state, ds);
            self.step_count += 1;

            // Time advance is close to linear in ds over one step
            let mut iterations = 0;
            while self.state.time > time_end + tolerance {
                iterations += 1;
                ds *= if iterations <= MAX_LANDING_ITERATIONS {
                    (time_end - t0) / (self.state.time - t0)
                } else {
                    0.5
                };
                self.state = backup.clone();
                self.scheme.step(&mut self.state, ds);
            }
        }

        let remainder = time_end - self.state.time;
        if remainder != 0.0 {
            self.state.fixed_time_step(remainder);
            self.state.time = time_end;
        }
        Ok(())
    }

    /// Internal energy `T - U` in the center-of-mass frame
    pub fn energy(&self) -> Scalar {
        self.state.kinetic() - self.state.force_function()
    }

    /// Deviation of the internal energy from its initial value plus perturbation work
    pub fn energy_error(&self) -> Scalar {
        self.energy() + self.state.binding
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn slowdown(&self) -> Scalar {
        self.state.slowdown
    }

    pub fn time(&self) -> Scalar {
        self.state.time
    }

    pub fn ds(&self) -> Scalar {
        self.ds
    }

    pub fn mass(&self) -> Scalar {
        self.mass
    }

    pub fn cm_position(&self) -> Vector {
        self.cm_position
    }

    pub fn cm_velocity(&self) -> Vector {
        self.cm_velocity
    }

    /// Move the group frame, e.g. when the combined stepper advances the center of mass
    pub fn set_cm(&mut self, position: Vector, velocity: Vector) {
        self.cm_position = position;
        self.cm_velocity = velocity;
        if let Some(tt) = self.state.tidal.as_mut() {
            tt.shift_cm(position);
        }
    }

    pub fn len(&self) -> usize {
        self.state.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.bodies.is_empty()
    }

    /// Members relative to the center of mass
    pub fn bodies(&self) -> &[ArBody] {
        &self.state.bodies
    }

    /// Members in the frame the engine was built in
    pub fn members_absolute(&self) -> impl Iterator<Item = ArBody> + '_ {
        self.state.bodies.iter().map(|b| ArBody {
            position: b.position + self.cm_position,
            velocity: b.velocity + self.cm_velocity,
            ..*b
        })
    }
}
