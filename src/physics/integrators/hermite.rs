//! Fourth-order Hermite integrator with block time steps.
//!
//! Singles and bound groups are first-class elements of the same step schedule. A group
//! is a point mass at its center of mass for everybody else; internally it is followed
//! by its own [`RegularizedIntegrator`], which receives the differential pull of the
//! other elements plus its tidal tensor as perturbation.
//!
//! Times are kept as integer ticks of the smallest step so that block boundaries line up
//! exactly. All elements synchronize every `dt_max`; group formation and dissolution are
//! only decided at those points.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::SymplecticScheme;
use super::regularized::{ArBody, RegularizedIntegrator, RegularizedManager};
use crate::error::{HardError, HardResult};
use crate::physics::changeover::ChangeOver;
use crate::physics::kepler::relative_energy;
use crate::physics::math::{Scalar, Vector, center_of_mass};
use crate::physics::particle::{EnclosingGroup, Particle};
use crate::physics::tidal_tensor::{TidalTensor, nearest_matching};

const MAX_DT_MIN_INDEX: u32 = 52;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HermiteManager {
    pub g: Scalar,
    pub eps_sq: Scalar,
    pub dt_max: Scalar,
    /// The smallest step is `dt_max / 2^dt_min_index`
    pub dt_min_index: u32,
    /// Accuracy parameter of the Aarseth step criterion
    pub eta: Scalar,
    pub eta_init: Scalar,
    pub step_count_max: usize,
}

impl Default for HermiteManager {
    fn default() -> Self {
        Self {
            g: 1.0,
            eps_sq: 0.0,
            dt_max: 1.0 / 64.0,
            dt_min_index: 20,
            eta: 0.1,
            eta_init: 0.01,
            step_count_max: 1_000_000,
        }
    }
}

/// Fixed-size checkpoint image of [`HermiteManager`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct HermiteRecord {
    pub g: f64,
    pub eps_sq: f64,
    pub dt_max: f64,
    pub dt_min_index: u64,
    pub eta: f64,
    pub eta_init: f64,
    pub step_count_max: u64,
}

impl HermiteManager {
    pub fn set_dt_range(&mut self, dt_max: Scalar, dt_min_index: u32) {
        self.dt_max = dt_max;
        self.dt_min_index = dt_min_index;
    }

    #[inline]
    pub fn dt_min(&self) -> Scalar {
        self.dt_max / (1u64 << self.dt_min_index) as Scalar
    }

    #[inline]
    fn dt_max_ticks(&self) -> u64 {
        1u64 << self.dt_min_index
    }

    pub fn check_params(&self) -> HardResult<()> {
        let invalid = |msg: String| Err(HardError::InvalidParameter(msg));
        if self.g <= 0.0 {
            return invalid(format!("hermite g must be positive, got {}", self.g));
        }
        if self.eps_sq < 0.0 {
            return invalid(format!("hermite eps_sq must be non-negative, got {}", self.eps_sq));
        }
        if self.dt_max <= 0.0 {
            return invalid(format!("hermite dt_max must be positive, got {}", self.dt_max));
        }
        if self.dt_min_index > MAX_DT_MIN_INDEX {
            return invalid(format!(
                "hermite dt_min_index must be at most {MAX_DT_MIN_INDEX}, got {}",
                self.dt_min_index
            ));
        }
        if self.eta <= 0.0 || self.eta_init <= 0.0 {
            return invalid("hermite eta and eta_init must be positive".to_string());
        }
        if self.step_count_max == 0 {
            return invalid("hermite step_count_max must be positive".to_string());
        }
        Ok(())
    }

    pub fn to_record(&self) -> HermiteRecord {
        HermiteRecord {
            g: self.g,
            eps_sq: self.eps_sq,
            dt_max: self.dt_max,
            dt_min_index: self.dt_min_index as u64,
            eta: self.eta,
            eta_init: self.eta_init,
            step_count_max: self.step_count_max as u64,
        }
    }

    pub fn from_record(record: &HermiteRecord) -> Self {
        Self {
            g: record.g,
            eps_sq: record.eps_sq,
            dt_max: record.dt_max,
            dt_min_index: record.dt_min_index as u32,
            eta: record.eta,
            eta_init: record.eta_init,
            step_count_max: record.step_count_max as usize,
        }
    }
}

/// Parameters deciding when elements merge into or leave a group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupingParams {
    /// Bound pairs closer than this merge; members farther than this from their center leave
    pub r_bin: Scalar,
    pub r_in_base: Scalar,
    pub r_out_base: Scalar,
    pub mean_mass_inv: Scalar,
}

#[derive(Debug, Clone)]
enum Element {
    Single { index: usize },
    Group(Box<RegularizedIntegrator>),
}

#[derive(Debug, Clone)]
struct HermiteBody {
    element: Element,
    mass: Scalar,
    position: Vector,
    velocity: Vector,
    acc: Vector,
    jerk: Vector,
    changeover: ChangeOver,
    time_ticks: u64,
    dt_ticks: u64,
    /// Members of the first binary component, listed first in a group
    n_members_1st: usize,
}

impl HermiteBody {
    fn is_group(&self) -> bool {
        matches!(self.element, Element::Group(_))
    }

    fn predict(&self, dt: Scalar) -> (Vector, Vector) {
        let dt2 = dt * dt;
        (
            self.position + self.velocity * dt + self.acc * (0.5 * dt2) + self.jerk * (dt2 * dt / 6.0),
            self.velocity + self.acc * dt + self.jerk * (0.5 * dt2),
        )
    }
}

/// A group as it stands at the end of the integration
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub members: Vec<usize>,
    pub n_members_1st: usize,
    pub mass: Scalar,
    pub position: Vector,
    pub velocity: Vector,
    pub changeover: ChangeOver,
}

/// Acceleration and jerk on a body at `dr = x_i - x_j`, `dv = v_i - v_j` from mass `m_j`
#[inline]
fn pair_acc_jerk(
    g: Scalar,
    eps_sq: Scalar,
    m_j: Scalar,
    dr: Vector,
    dv: Vector,
    co_i: &ChangeOver,
    co_j: &ChangeOver,
) -> (Vector, Vector) {
    let r2 = dr.length_squared() + eps_sq;
    let r = libm::sqrt(r2);
    let w = ChangeOver::acc_weight_pair(co_i, co_j, r);
    let dw = ChangeOver::acc_weight_derivative_pair(co_i, co_j, r);
    if w == 0.0 && dw == 0.0 {
        return (Vector::ZERO, Vector::ZERO);
    }

    let gm_inv_r3 = g * m_j / (r2 * r);
    let rv = dr.dot(dv);
    let acc = -dr * (gm_inv_r3 * w);
    let jerk = -(dv - dr * (3.0 * rv / r2)) * (gm_inv_r3 * w) - dr * (gm_inv_r3 * dw * rv / r);
    (acc, jerk)
}

#[derive(Debug, Clone)]
pub struct HermiteIntegrator {
    manager: HermiteManager,
    ar_manager: RegularizedManager,
    scheme: Box<dyn SymplecticScheme>,
    params: GroupingParams,
    particles: Vec<Particle>,
    bodies: Vec<HermiteBody>,
    /// Tensors available to groups formed during the run
    tidal_tensors: Vec<TidalTensor>,
    time_ticks: u64,
    time_end: Scalar,
    end_ticks: u64,
    energy_offset: Scalar,
    /// Energy errors of groups that no longer exist
    retired_error: Scalar,
    step_count: usize,
    retired_ar_steps: usize,
    n_merged: usize,
    n_dissolved: usize,
}

impl HermiteIntegrator {
    /// `particles` are the cluster members with their real masses; elements refer to
    /// them by index
    pub fn new(
        manager: &HermiteManager,
        ar_manager: &RegularizedManager,
        scheme: Box<dyn SymplecticScheme>,
        params: GroupingParams,
        particles: Vec<Particle>,
    ) -> Self {
        Self {
            manager: manager.clone(),
            ar_manager: ar_manager.clone(),
            scheme,
            params,
            particles,
            bodies: Vec::new(),
            tidal_tensors: Vec::new(),
            time_ticks: 0,
            time_end: 0.0,
            end_ticks: 0,
            energy_offset: 0.0,
            retired_error: 0.0,
            step_count: 0,
            retired_ar_steps: 0,
            n_merged: 0,
            n_dissolved: 0,
        }
    }

    pub fn add_single(&mut self, index: usize) {
        let p = &self.particles[index];
        self.bodies.push(HermiteBody {
            element: Element::Single { index },
            mass: p.mass,
            position: p.position,
            velocity: p.velocity,
            acc: Vector::ZERO,
            jerk: Vector::ZERO,
            changeover: p.changeover,
            time_ticks: self.time_ticks,
            dt_ticks: 1,
            n_members_1st: 0,
        });
    }

    /// Add a group from member indices; its changeover is derived from its mass
    pub fn add_group(&mut self, members: &[usize], n_members_1st: usize, tidal: Option<TidalTensor>) {
        let bodies: Vec<ArBody> = members
            .iter()
            .map(|&index| {
                let p = &self.particles[index];
                ArBody {
                    index,
                    mass: p.mass,
                    position: p.position,
                    velocity: p.velocity,
                }
            })
            .collect();
        if let Some(tt) = tidal {
            self.tidal_tensors.push(tt);
        }
        self.push_group(bodies, n_members_1st, tidal);
    }

    fn push_group(&mut self, members: Vec<ArBody>, n_members_1st: usize, tidal: Option<TidalTensor>) {
        let mut ar = RegularizedIntegrator::new(&self.ar_manager, self.scheme.clone_box(), members);
        ar.set_tidal_tensor(tidal);

        let mut changeover = ChangeOver::default();
        changeover.set_radii_scaled(
            ar.mass() * self.params.mean_mass_inv,
            self.params.r_in_base,
            self.params.r_out_base,
        );

        self.bodies.push(HermiteBody {
            mass: ar.mass(),
            position: ar.cm_position(),
            velocity: ar.cm_velocity(),
            acc: Vector::ZERO,
            jerk: Vector::ZERO,
            changeover,
            time_ticks: self.time_ticks,
            dt_ticks: 1,
            n_members_1st,
            element: Element::Group(Box::new(ar)),
        });
    }

    pub fn n_single(&self) -> usize {
        self.bodies.iter().filter(|b| !b.is_group()).count()
    }

    pub fn n_group(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_group()).count()
    }

    pub fn n_merged(&self) -> usize {
        self.n_merged
    }

    pub fn n_dissolved(&self) -> usize {
        self.n_dissolved
    }

    /// Move every element into the frame of the overall center of mass; returns that
    /// center's `(mass, position, velocity)`
    pub fn shift_to_cm_frame(&mut self) -> (Scalar, Vector, Vector) {
        let (mass, position, velocity) =
            center_of_mass(self.bodies.iter().map(|b| (b.mass, b.position, b.velocity)));
        self.shift_frame(-position, -velocity);
        (mass, position, velocity)
    }

    pub fn shift_frame(&mut self, dx: Vector, dv: Vector) {
        for tt in &mut self.tidal_tensors {
            tt.center += dx;
        }
        for body in &mut self.bodies {
            body.position += dx;
            body.velocity += dv;
            if let Element::Group(ar) = &mut body.element {
                ar.set_cm(body.position, body.velocity);
            }
        }
    }

    #[inline]
    fn tick_time(&self, ticks: u64) -> Scalar {
        if ticks >= self.end_ticks && self.end_ticks > 0 {
            self.time_end
        } else {
            ticks as Scalar * self.manager.dt_min()
        }
    }

    /// Forces, jerks and first steps of every element at the current (synchronized) time
    pub fn initialize(&mut self) {
        let time = self.tick_time(self.time_ticks);
        for body in &mut self.bodies {
            if let Element::Group(ar) = &mut body.element {
                ar.initialize(time);
            }
        }
        self.init_forces();
        self.energy_offset = self.energy_outer();
    }

    fn init_forces(&mut self) {
        let states: Vec<(Vector, Vector)> = self.bodies.iter().map(|b| (b.position, b.velocity)).collect();
        for i in 0..self.bodies.len() {
            let (acc, jerk) = self.force_on(i, &states);
            let body = &mut self.bodies[i];
            body.acc = acc;
            body.jerk = jerk;
            body.time_ticks = self.time_ticks;

            let dt_crit = if jerk.length_squared() > 0.0 {
                self.manager.eta_init * acc.length() / jerk.length()
            } else {
                self.manager.dt_max
            };
            let mut dt = self.quantize(dt_crit);
            while self.time_ticks % dt != 0 {
                dt >>= 1;
            }
            self.bodies[i].dt_ticks = dt;
        }
    }

    /// Largest power-of-two tick count whose duration does not exceed `dt`
    fn quantize(&self, dt: Scalar) -> u64 {
        let dt_min = self.manager.dt_min();
        let mut ticks = self.manager.dt_max_ticks();
        while ticks > 1 && ticks as Scalar * dt_min > dt {
            ticks >>= 1;
        }
        ticks
    }

    fn force_on(&self, i: usize, states: &[(Vector, Vector)]) -> (Vector, Vector) {
        let (xi, vi) = states[i];
        let bi = &self.bodies[i];
        let mut acc = Vector::ZERO;
        let mut jerk = Vector::ZERO;
        for (j, bj) in self.bodies.iter().enumerate() {
            if j == i {
                continue;
            }
            let (xj, vj) = states[j];
            let (a, jk) = pair_acc_jerk(
                self.manager.g,
                self.manager.eps_sq,
                bj.mass,
                xi - xj,
                vi - vj,
                &bi.changeover,
                &bj.changeover,
            );
            acc += a;
            jerk += jk;
        }
        (acc, jerk)
    }

    /// Pull of all other elements on the members of group `i`, minus its mass-weighted mean
    fn group_perturbation(&self, i: usize, ar: &RegularizedIntegrator, states: &[(Vector, Vector)]) -> Vec<Vector> {
        let (x_cm, v_cm) = states[i];
        let group_changeover = self.bodies[i].changeover;
        let mut pert: Vec<Vector> = ar
            .bodies()
            .iter()
            .map(|member| {
                let mut acc = Vector::ZERO;
                for (j, bj) in self.bodies.iter().enumerate() {
                    if j == i {
                        continue;
                    }
                    let (xj, vj) = states[j];
                    let (a, _) = pair_acc_jerk(
                        self.manager.g,
                        self.manager.eps_sq,
                        bj.mass,
                        x_cm + member.position - xj,
                        v_cm + member.velocity - vj,
                        &group_changeover,
                        &bj.changeover,
                    );
                    acc += a;
                }
                acc
            })
            .collect();

        let mean = ar
            .bodies()
            .iter()
            .zip(&pert)
            .fold(Vector::ZERO, |sum, (member, a)| sum + *a * member.mass)
            / ar.mass();
        for a in &mut pert {
            *a -= mean;
        }
        pert
    }

    /// Advance every element to `time_end`
    pub fn integrate_to(&mut self, time_end: Scalar) -> HardResult<()> {
        let dt_min = self.manager.dt_min();
        self.time_end = time_end;
        self.end_ticks = libm::round(time_end / dt_min).max(0.0) as u64;
        if self.bodies.is_empty() {
            self.time_ticks = self.end_ticks;
            return Ok(());
        }

        let dt_max_ticks = self.manager.dt_max_ticks();
        while self.time_ticks < self.end_ticks {
            let sync_ticks = ((self.time_ticks / dt_max_ticks + 1) * dt_max_ticks).min(self.end_ticks);
            self.run_block_steps(sync_ticks)?;
            self.time_ticks = sync_ticks;
            if sync_ticks < self.end_ticks && self.adjust_groups() {
                self.init_forces();
            }
        }
        Ok(())
    }

    fn run_block_steps(&mut self, sync_ticks: u64) -> HardResult<()> {
        let dt_min = self.manager.dt_min();
        loop {
            let next_of = |b: &HermiteBody| (b.time_ticks + b.dt_ticks).min(sync_ticks);
            let Some(next) = self
                .bodies
                .iter()
                .filter(|b| b.time_ticks < sync_ticks)
                .map(next_of)
                .min()
            else {
                return Ok(());
            };
            let next_time = self.tick_time(next);

            let states: Vec<(Vector, Vector)> = self
                .bodies
                .iter()
                .map(|b| b.predict((next - b.time_ticks) as Scalar * dt_min))
                .collect();
            let active: Vec<usize> = (0..self.bodies.len())
                .filter(|&i| self.bodies[i].time_ticks < sync_ticks && next_of(&self.bodies[i]) == next)
                .collect();

            let mut corrected = Vec::with_capacity(active.len());
            for &i in &active {
                let (acc1, jerk1) = self.force_on(i, &states);
                let perturbation = match &self.bodies[i].element {
                    Element::Group(ar) => Some(self.group_perturbation(i, ar, &states)),
                    Element::Single { .. } => None,
                };
                corrected.push((i, acc1, jerk1, perturbation));
            }

            for (i, acc1, jerk1, perturbation) in corrected {
                let dt_new = {
                    let body = &self.bodies[i];
                    let dt = (next - body.time_ticks) as Scalar * dt_min;
                    let (x_p, v_p) = states[i];
                    let (a0, j0) = (body.acc, body.jerk);

                    let a2 = (-(a0 - acc1) * 6.0 - (j0 * 4.0 + jerk1 * 2.0) * dt) / (dt * dt);
                    let a3 = ((a0 - acc1) * 12.0 + (j0 + jerk1) * (6.0 * dt)) / (dt * dt * dt);
                    let dt3 = dt * dt * dt;
                    let position = x_p + a2 * (dt3 * dt / 24.0) + a3 * (dt3 * dt * dt / 120.0);
                    let velocity = v_p + a2 * (dt3 / 6.0) + a3 * (dt3 * dt / 24.0);

                    let a2_end = a2 + a3 * dt;
                    let numerator = acc1.length() * a2_end.length() + jerk1.length_squared();
                    let denominator = jerk1.length() * a3.length() + a2_end.length_squared();
                    let dt_crit = if denominator > 0.0 && numerator > 0.0 {
                        libm::sqrt(self.manager.eta * numerator / denominator)
                    } else {
                        self.manager.dt_max
                    };

                    let mut dt_new = self.quantize(dt_crit).min(2 * body.dt_ticks);
                    while next % dt_new != 0 {
                        dt_new >>= 1;
                    }

                    let body = &mut self.bodies[i];
                    body.position = position;
                    body.velocity = velocity;
                    body.acc = acc1;
                    body.jerk = jerk1;
                    body.time_ticks = next;
                    dt_new
                };
                self.bodies[i].dt_ticks = dt_new;

                let body = &mut self.bodies[i];
                if let (Element::Group(ar), Some(perturbation)) = (&mut body.element, perturbation) {
                    ar.set_perturbation(perturbation);
                    ar.integrate_to(next_time)?;
                    ar.set_cm(body.position, body.velocity);
                }
            }

            self.step_count += active.len();
            if self.step_count > self.manager.step_count_max {
                return Err(HardError::StepLimit {
                    engine: "hermite",
                    steps: self.step_count,
                    time: next_time,
                    target: self.time_end,
                });
            }
        }
    }

    /// Dissolve groups with escaping members and merge close bound pairs.
    /// Returns whether the element set changed.
    fn adjust_groups(&mut self) -> bool {
        let outer_before = self.energy_outer();
        let mut changed = false;

        // Dissolve
        let r_bin = self.params.r_bin;
        let mut i = 0;
        while i < self.bodies.len() {
            let escaping = match &self.bodies[i].element {
                Element::Group(ar) => ar.bodies().iter().any(|m| m.position.length() > r_bin),
                Element::Single { .. } => false,
            };
            if !escaping {
                i += 1;
                continue;
            }

            let body = self.bodies.swap_remove(i);
            if let Element::Group(ar) = body.element {
                self.retire(&ar);
                for member in ar.members_absolute() {
                    self.particles[member.index].position = member.position;
                    self.particles[member.index].velocity = member.velocity;
                    self.add_single(member.index);
                }
            }
            self.n_dissolved += 1;
            changed = true;
        }

        // Merge the closest bound pair until none is left
        while let Some((a, b)) = self.closest_bound_pair() {
            let (hi, lo) = if a > b { (a, b) } else { (b, a) };
            let second = self.bodies.swap_remove(hi);
            let first = self.bodies.swap_remove(lo);
            let (first, second) = if a < b { (first, second) } else { (second, first) };

            let mut members = self.element_members(first);
            let n_members_1st = members.len();
            members.extend(self.element_members(second));

            let (mass, cm, _) = center_of_mass(members.iter().map(|m| (m.mass, m.position, m.velocity)));
            let mut changeover = ChangeOver::default();
            changeover.set_radii_scaled(
                mass * self.params.mean_mass_inv,
                self.params.r_in_base,
                self.params.r_out_base,
            );
            let tidal = nearest_matching(&self.tidal_tensors, cm, changeover.r_out())
                .map(|k| self.tidal_tensors[k]);

            self.push_group(members, n_members_1st, tidal);
            let time = self.tick_time(self.time_ticks);
            if let Some(Element::Group(ar)) = self.bodies.last_mut().map(|b| &mut b.element) {
                ar.initialize(time);
            }
            self.n_merged += 1;
            changed = true;
        }

        if changed {
            self.energy_offset += self.energy_outer() - outer_before;
        }
        changed
    }

    fn retire(&mut self, ar: &RegularizedIntegrator) {
        self.retired_error += ar.energy_error();
        self.retired_ar_steps += ar.step_count();
    }

    /// Members of an element in absolute coordinates; consumes groups
    fn element_members(&mut self, body: HermiteBody) -> Vec<ArBody> {
        match body.element {
            Element::Single { index } => vec![ArBody {
                index,
                mass: body.mass,
                position: body.position,
                velocity: body.velocity,
            }],
            Element::Group(ar) => {
                self.retire(&ar);
                ar.members_absolute().collect()
            }
        }
    }

    fn closest_bound_pair(&self) -> Option<(usize, usize)> {
        let r_bin_sq = self.params.r_bin * self.params.r_bin;
        let mut best: Option<(usize, usize, Scalar)> = None;
        for i in 0..self.bodies.len() {
            for j in i + 1..self.bodies.len() {
                let (bi, bj) = (&self.bodies[i], &self.bodies[j]);
                let dx = bj.position - bi.position;
                let r2 = dx.length_squared();
                if r2 >= r_bin_sq || best.is_some_and(|(_, _, d)| d <= r2) {
                    continue;
                }
                let dv = bj.velocity - bi.velocity;
                if relative_energy(bi.mass + bj.mass, dx, dv, self.manager.g) < 0.0 {
                    best = Some((i, j, r2));
                }
            }
        }
        best.map(|(i, j, _)| (i, j))
    }

    /// Kinetic energy of the elements plus their changeover-weighted mutual potential
    fn energy_outer(&self) -> Scalar {
        let mut energy = 0.0;
        for (i, bi) in self.bodies.iter().enumerate() {
            energy += 0.5 * bi.mass * bi.velocity.length_squared();
            for bj in &self.bodies[i + 1..] {
                let r = libm::sqrt((bi.position - bj.position).length_squared() + self.manager.eps_sq);
                let wp = ChangeOver::pot_weight_pair(&bi.changeover, &bj.changeover, r);
                energy -= self.manager.g * bi.mass * bj.mass * wp / r;
            }
        }
        energy
    }

    /// Total energy: element motion plus the internal energy of every group
    pub fn energy(&self) -> Scalar {
        self.energy_outer()
            + self
                .bodies
                .iter()
                .filter_map(|b| match &b.element {
                    Element::Group(ar) => Some(ar.energy()),
                    Element::Single { .. } => None,
                })
                .sum::<Scalar>()
    }

    pub fn energy_error(&self) -> Scalar {
        let groups: Scalar = self
            .bodies
            .iter()
            .filter_map(|b| match &b.element {
                Element::Group(ar) => Some(ar.energy_error()),
                Element::Single { .. } => None,
            })
            .sum();
        self.energy_outer() - self.energy_offset + groups + self.retired_error
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Regularized steps taken by current and former groups
    pub fn ar_step_count(&self) -> usize {
        self.retired_ar_steps
            + self
                .bodies
                .iter()
                .filter_map(|b| match &b.element {
                    Element::Group(ar) => Some(ar.step_count()),
                    Element::Single { .. } => None,
                })
                .sum::<usize>()
    }

    pub fn groups(&self) -> Vec<GroupSummary> {
        self.bodies
            .iter()
            .filter_map(|b| match &b.element {
                Element::Group(ar) => Some(GroupSummary {
                    members: ar.bodies().iter().map(|m| m.index).collect(),
                    n_members_1st: b.n_members_1st,
                    mass: b.mass,
                    position: b.position,
                    velocity: b.velocity,
                    changeover: b.changeover,
                }),
                Element::Single { .. } => None,
            })
            .collect()
    }

    /// Particles with the integrated positions and velocities, each stamped with the
    /// velocity and mass of the group it ends in (zero for singles)
    pub fn particles(&self) -> Vec<Particle> {
        let mut particles = self.particles.clone();
        for body in &self.bodies {
            match &body.element {
                Element::Single { index } => {
                    let p = &mut particles[*index];
                    p.position = body.position;
                    p.velocity = body.velocity;
                    p.enclosing = EnclosingGroup::default();
                }
                Element::Group(ar) => {
                    for member in ar.members_absolute() {
                        let p = &mut particles[member.index];
                        p.position = member.position;
                        p.velocity = member.velocity;
                        p.enclosing = EnclosingGroup {
                            velocity: body.velocity,
                            mass: body.mass,
                        };
                    }
                }
            }
        }
        particles
    }
}
