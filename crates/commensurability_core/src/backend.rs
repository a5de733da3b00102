//! Orbit integration backends and the registry that picks one.
//!
//! A backend integrates a batch of initial conditions through a potential.
//! Resolution is either explicit (a registry name) or implicit: every
//! built-in backend exposes an `accepts` predicate over the potential's
//! [`PotentialFamily`], and exactly one must match.

use crate::autodiff::Dual;
use crate::coords::{CoordBatch, Orbit, PhaseSpaceCoord};
use crate::error::{AnalysisError, AnalysisResult};
use crate::potential::{Potential, PotentialFamily};
use crate::solvers::{Leapfrog, Tsit5, RK4};
use crate::traits::{DynamicalSystem, Steppable};
use crate::units::KMS_TO_KPC_PER_GYR;
use anyhow::{bail, Result};
use nalgebra::{Rotation3, Vector3};
use rayon::prelude::*;
use std::cell::RefCell;
use std::fmt;

/// A pluggable orbit integrator.
pub trait OrbitBackend: Send + Sync {
    /// Registry name, e.g. `leapfrog`.
    fn name(&self) -> &str;

    /// Concrete implementation name stored in saved containers.
    fn implementation_name(&self) -> &str;

    /// Capability predicate used by implicit resolution.
    fn accepts(&self, potential: &Potential) -> bool;

    /// Integrates every coordinate of `coords` for `steps` steps of `dt` Gyr in
    /// `potential`, which rotates about z at `pattern_speed` km/s/kpc.
    ///
    /// Returns one orbit per coordinate, in input order.
    fn integrate(
        &self,
        coords: &CoordBatch,
        potential: &Potential,
        dt: f64,
        steps: usize,
        pattern_speed: f64,
    ) -> Result<Vec<Orbit>>;
}

/// The closed set of built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Leapfrog,
    Rk4,
    Tsit5,
}

impl BackendKind {
    /// Order in which implicit resolution checks the predicates.
    pub const ALL: [BackendKind; 3] = [BackendKind::Leapfrog, BackendKind::Rk4, BackendKind::Tsit5];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Leapfrog => "leapfrog",
            BackendKind::Rk4 => "rk4",
            BackendKind::Tsit5 => "tsit5",
        }
    }

    pub fn implementation_name(self) -> &'static str {
        match self {
            BackendKind::Leapfrog => "LeapfrogBackend",
            BackendKind::Rk4 => "RungeKuttaBackend",
            BackendKind::Tsit5 => "Tsit5Backend",
        }
    }

    /// Looks up a registry or implementation name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|kind| {
            kind.name().eq_ignore_ascii_case(name)
                || kind.implementation_name().eq_ignore_ascii_case(name)
        })
    }

    pub fn instantiate(self) -> Box<dyn OrbitBackend> {
        match self {
            BackendKind::Leapfrog => Box::new(LeapfrogBackend),
            BackendKind::Rk4 => Box::new(RungeKuttaBackend),
            BackendKind::Tsit5 => Box::new(Tsit5Backend),
        }
    }
}

/// How an analysis picks its backend.
#[derive(Default)]
pub enum BackendChoice {
    /// Resolve from the potential.
    #[default]
    Implicit,
    /// Look up a registry name.
    Named(String),
    /// Use the given instance as is.
    Custom(Box<dyn OrbitBackend>),
}

impl fmt::Debug for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Implicit => f.write_str("Implicit"),
            BackendChoice::Named(name) => f.debug_tuple("Named").field(name).finish(),
            BackendChoice::Custom(backend) => f
                .debug_tuple("Custom")
                .field(&backend.implementation_name())
                .finish(),
        }
    }
}

impl From<&str> for BackendChoice {
    fn from(name: &str) -> Self {
        BackendChoice::Named(name.to_string())
    }
}

impl From<BackendKind> for BackendChoice {
    fn from(kind: BackendKind) -> Self {
        BackendChoice::Named(kind.name().to_string())
    }
}

impl From<Option<String>> for BackendChoice {
    fn from(name: Option<String>) -> Self {
        name.map_or(BackendChoice::Implicit, BackendChoice::Named)
    }
}

/// Resolves a backend choice against `potential`. Pure: nothing is logged or
/// mutated.
pub fn resolve(
    choice: BackendChoice,
    potential: &Potential,
) -> AnalysisResult<Box<dyn OrbitBackend>> {
    match choice {
        BackendChoice::Custom(backend) => Ok(backend),
        BackendChoice::Named(name) => BackendKind::from_name(&name)
            .map(BackendKind::instantiate)
            .ok_or(AnalysisError::UnknownBackend(name)),
        BackendChoice::Implicit => select_unique(
            BackendKind::ALL.into_iter().map(BackendKind::instantiate).collect(),
            potential,
        ),
    }
}

fn select_unique(
    candidates: Vec<Box<dyn OrbitBackend>>,
    potential: &Potential,
) -> AnalysisResult<Box<dyn OrbitBackend>> {
    let mut matches: Vec<_> = candidates
        .into_iter()
        .filter(|backend| backend.accepts(potential))
        .collect();
    match matches.len() {
        0 => Err(AnalysisError::UnresolvedPotential(format!(
            "{:?} family",
            potential.family()
        ))),
        1 => Ok(matches.remove(0)),
        _ => Err(AnalysisError::AmbiguousBackend(
            matches
                .iter()
                .map(|backend| backend.name().to_string())
                .collect(),
        )),
    }
}

/// Equations of motion in the inertial frame, state `[x, y, z, vx, vy, vz]`
/// in kpc and kpc/Gyr. The potential is rotated by `omega * t` about z.
struct OrbitSystem<'a> {
    potential: &'a Potential,
    /// Pattern speed in rad/Gyr.
    omega: f64,
    scratch: RefCell<Vec<Dual>>,
}

impl<'a> OrbitSystem<'a> {
    fn new(potential: &'a Potential, pattern_speed: f64) -> Self {
        Self {
            potential,
            omega: pattern_speed * KMS_TO_KPC_PER_GYR,
            scratch: RefCell::new(Vec::new()),
        }
    }

    fn frame_rotation(&self, t: f64) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::z_axis(), self.omega * t)
    }

    /// Inertial state at t = 0 from a co-rotating coordinate in km/s.
    fn initial_state(&self, coord: &PhaseSpaceCoord) -> [f64; 6] {
        let spin = Vector3::new(0.0, 0.0, self.omega);
        let v = coord.velocity * KMS_TO_KPC_PER_GYR + spin.cross(&coord.position);
        [
            coord.position.x,
            coord.position.y,
            coord.position.z,
            v.x,
            v.y,
            v.z,
        ]
    }

    /// Co-rotating coordinate in km/s from an inertial state at time `t`.
    fn observe(&self, t: f64, state: &[f64]) -> PhaseSpaceCoord {
        let to_rotating = self.frame_rotation(t).inverse();
        let position = Vector3::new(state[0], state[1], state[2]);
        let velocity = Vector3::new(state[3], state[4], state[5]);
        let spin = Vector3::new(0.0, 0.0, self.omega);
        let relative = velocity - spin.cross(&position);
        PhaseSpaceCoord::new(
            to_rotating * position,
            to_rotating * relative / KMS_TO_KPC_PER_GYR,
        )
    }
}

impl DynamicalSystem<f64> for OrbitSystem<'_> {
    fn dimension(&self) -> usize {
        6
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        out[0] = x[3];
        out[1] = x[4];
        out[2] = x[5];

        let rotation = self.frame_rotation(t);
        let body = rotation.inverse() * Vector3::new(x[0], x[1], x[2]);
        let grad = self
            .potential
            .gradient(&body, &mut self.scratch.borrow_mut());
        // (km/s)^2/kpc -> kpc/Gyr^2
        let accel = rotation * grad * -(KMS_TO_KPC_PER_GYR * KMS_TO_KPC_PER_GYR);
        out[3] = accel.x;
        out[4] = accel.y;
        out[5] = accel.z;
    }
}

fn integrate_orbit<S: Steppable<f64>>(
    mut stepper: S,
    coord: &PhaseSpaceCoord,
    potential: &Potential,
    dt: f64,
    steps: usize,
    pattern_speed: f64,
) -> Result<Orbit> {
    let system = OrbitSystem::new(potential, pattern_speed);
    let mut state = system.initial_state(coord);
    let mut t = 0.0;
    let mut orbit = Orbit::with_capacity(steps + 1);
    orbit.push(t, system.observe(t, &state));
    for step in 1..=steps {
        stepper.step(&system, &mut t, &mut state, dt);
        if state.iter().any(|v| !v.is_finite()) {
            bail!("Orbit became non-finite at step {step} (t = {t} Gyr).");
        }
        // multiples of dt keep sample times free of accumulated rounding
        orbit.push(step as f64 * dt, system.observe(t, &state));
    }
    Ok(orbit)
}

fn integrate_batch<S, F>(
    coords: &CoordBatch,
    potential: &Potential,
    dt: f64,
    steps: usize,
    pattern_speed: f64,
    make_stepper: F,
) -> Result<Vec<Orbit>>
where
    S: Steppable<f64>,
    F: Fn(usize) -> S + Sync,
{
    if dt.is_nan() || dt <= 0.0 {
        bail!("Time step must be positive.");
    }
    let inputs: Vec<PhaseSpaceCoord> = coords.iter().collect();
    inputs
        .par_iter()
        .enumerate()
        .map(|(index, coord)| {
            integrate_orbit(make_stepper(6), coord, potential, dt, steps, pattern_speed)
                .map_err(|err| err.context(format!("Orbit {index} of the batch failed")))
        })
        .collect()
}

/// Kick-drift-kick leapfrog. Symplectic; the default for analytic potentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeapfrogBackend;

impl OrbitBackend for LeapfrogBackend {
    fn name(&self) -> &str {
        BackendKind::Leapfrog.name()
    }

    fn implementation_name(&self) -> &str {
        BackendKind::Leapfrog.implementation_name()
    }

    fn accepts(&self, potential: &Potential) -> bool {
        potential.family() == PotentialFamily::Analytic
    }

    fn integrate(
        &self,
        coords: &CoordBatch,
        potential: &Potential,
        dt: f64,
        steps: usize,
        pattern_speed: f64,
    ) -> Result<Vec<Orbit>> {
        integrate_batch(coords, potential, dt, steps, pattern_speed, Leapfrog::new)
    }
}

/// Classic fourth order Runge-Kutta, used for expression potentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct RungeKuttaBackend;

impl OrbitBackend for RungeKuttaBackend {
    fn name(&self) -> &str {
        BackendKind::Rk4.name()
    }

    fn implementation_name(&self) -> &str {
        BackendKind::Rk4.implementation_name()
    }

    fn accepts(&self, potential: &Potential) -> bool {
        potential.family() == PotentialFamily::Symbolic
    }

    fn integrate(
        &self,
        coords: &CoordBatch,
        potential: &Potential,
        dt: f64,
        steps: usize,
        pattern_speed: f64,
    ) -> Result<Vec<Orbit>> {
        integrate_batch(coords, potential, dt, steps, pattern_speed, RK4::new)
    }
}

/// Fixed-step Tsitouras 5(4). Only selected by name.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tsit5Backend;

impl OrbitBackend for Tsit5Backend {
    fn name(&self) -> &str {
        BackendKind::Tsit5.name()
    }

    fn implementation_name(&self) -> &str {
        BackendKind::Tsit5.implementation_name()
    }

    fn accepts(&self, _potential: &Potential) -> bool {
        false
    }

    fn integrate(
        &self,
        coords: &CoordBatch,
        potential: &Potential,
        dt: f64,
        steps: usize,
        pattern_speed: f64,
    ) -> Result<Vec<Orbit>> {
        integrate_batch(coords, potential, dt, steps, pattern_speed, Tsit5::new)
    }
}
