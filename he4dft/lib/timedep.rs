//! Self-consistent predictor–corrector propagation of an amplitude in a
//! potential that depends on the amplitude itself.
//!
//! A single step `ψ → ψ'` with (possibly complex) time step `τ` is
//! 1. *predict*: `V₀ = V[ψ]`, `ψ̃ = U(τ, V₀) ψ`;
//! 2. `V₁ = V[ψ̃]`;
//! 3. *correct*: `ψ' = U(τ, (V₀ + V₁)/2) ψ`,
//!
//! where `U` is the second-order split-step operator
//! ```text
//! U(τ, V) = exp(-i V τ/2) F⁻¹ exp(-i τ |k - k₀|²/2m) F exp(-i V τ/2)
//! ```
//! and `k₀` is the frame momentum of the grid. Real `τ` gives real-time
//! dynamics, `τ = -i dt` imaginary-time relaxation toward the ground state.

use ndarray as nd;
use num_complex::Complex64 as C64;
use serde::{ Deserialize, Serialize };
use tracing::debug;
use crate::{
    error::{ Error, HeResult, ShapeError },
    functional::Functional,
    grid::{ Boundary, CGrid, GridShape, RGrid },
    utils::{ Fft3, wavenumbers },
    wavefunction::Wavefunction,
};

/// How the complex time step depends on the iteration index.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeMode {
    #[default]
    Real,
    Imaginary,
    /// Blend from imaginary to real time over the first `warmup` iterations.
    Ramp { warmup: usize },
}

impl TimeMode {
    /// Complex time step for iteration `iter` with magnitude `dt`.
    ///
    /// For `Ramp`, `x = min(iter / warmup, 1)` and `τ = (x - i(1 - x)) dt`.
    pub fn time_step(&self, dt: f64, iter: usize) -> C64 {
        match self {
            Self::Real => C64::new(dt, 0.0),
            Self::Imaginary => C64::new(0.0, -dt),
            Self::Ramp { warmup } => {
                let x = if *warmup == 0 {
                    1.0
                } else {
                    (iter as f64 / *warmup as f64).min(1.0)
                };
                C64::new(x, x - 1.0) * dt
            },
        }
    }

    /// `true` if the step for iteration `iter` has an imaginary part.
    pub fn is_dissipative(&self, iter: usize) -> bool {
        self.time_step(1.0, iter).im != 0.0
    }
}

/// Anything that can produce the potential felt by an amplitude.
///
/// Implementations overwrite `out` completely, so a stale potential from a
/// previous phase is never reused.
pub trait PotentialSource {
    fn potential(&mut self, psi: &CGrid, out: &mut CGrid) -> HeResult<()>;
}

/// A fixed real potential, independent of the amplitude.
#[derive(Clone, Debug)]
pub struct StaticPotential {
    pub field: RGrid,
}

impl StaticPotential {
    pub fn new(field: RGrid) -> Self { Self { field } }
}

impl PotentialSource for StaticPotential {
    fn potential(&mut self, psi: &CGrid, out: &mut CGrid) -> HeResult<()> {
        ShapeError::check(psi.shape(), self.field.shape())?;
        ShapeError::check(out.shape(), self.field.shape())?;
        nd::Zip::from(out.data_mut()).and(self.field.data())
            .par_for_each(|o, v| { *o = C64::from(*v); });
        Ok(())
    }
}

// external - μ₀, written over `out`
fn offset_field(external: Option<&RGrid>, mu0: f64, out: &mut CGrid) -> HeResult<()> {
    match external {
        Some(ext) => {
            ShapeError::check(ext.shape(), out.shape())?;
            nd::Zip::from(out.data_mut()).and(ext.data())
                .par_for_each(|o, v| { *o = C64::from(*v - mu0); });
        },
        None => { out.fill(C64::from(-mu0)); },
    }
    Ok(())
}

/// Mean-field potential of liquid helium: functional derivative plus an
/// optional external field, measured from the bulk chemical potential.
#[derive(Clone, Debug)]
pub struct HeliumPotential {
    functional: Functional,
    external: Option<RGrid>,
    mu0: f64,
}

impl HeliumPotential {
    /// Use `functional` with `μ₀` set to the chemical potential of its
    /// reference bulk density.
    pub fn new(functional: Functional) -> Self {
        let mu0 = functional.mu0();
        Self { functional, external: None, mu0 }
    }

    pub fn with_external(mut self, external: RGrid) -> Self {
        self.external = Some(external);
        self
    }

    pub fn with_mu0(mut self, mu0: f64) -> Self {
        self.mu0 = mu0;
        self
    }

    pub fn mu0(&self) -> f64 { self.mu0 }

    pub fn functional(&self) -> &Functional { &self.functional }

    pub fn functional_mut(&mut self) -> &mut Functional { &mut self.functional }

    pub fn external(&self) -> Option<&RGrid> { self.external.as_ref() }

    pub fn set_external(&mut self, external: Option<RGrid>) { self.external = external; }

    pub fn external_mut(&mut self) -> &mut Option<RGrid> { &mut self.external }
}

impl PotentialSource for HeliumPotential {
    fn potential(&mut self, psi: &CGrid, out: &mut CGrid) -> HeResult<()> {
        offset_field(self.external.as_ref(), self.mu0, out)?;
        self.functional.add_potential(psi, out)
    }
}

/// Like [`HeliumPotential`], but the functional is evaluated on the combined
/// density of the propagated amplitude and a fixed partner amplitude.
#[derive(Clone, Debug)]
pub struct HeliumPairPotential {
    functional: Functional,
    partner: CGrid,
    external: Option<RGrid>,
    mu0: f64,
}

impl HeliumPairPotential {
    pub fn new(functional: Functional, partner: CGrid) -> Self {
        let mu0 = functional.mu0();
        Self { functional, partner, external: None, mu0 }
    }

    pub fn with_external(mut self, external: RGrid) -> Self {
        self.external = Some(external);
        self
    }

    /// Replace the partner amplitude.
    pub fn set_partner(&mut self, partner: &CGrid) -> Result<(), ShapeError> {
        self.partner.assign(partner)?;
        self.partner.set_momentum(partner.momentum());
        Ok(())
    }

    pub fn partner(&self) -> &CGrid { &self.partner }
}

impl PotentialSource for HeliumPairPotential {
    fn potential(&mut self, psi: &CGrid, out: &mut CGrid) -> HeResult<()> {
        offset_field(self.external.as_ref(), self.mu0, out)?;
        self.functional.add_potential_pair(psi, &self.partner, out)
    }
}

/// Another source with a fixed real field added to its potential, e.g. a
/// constraint that is not part of the physical external potential.
pub struct WithField<'a, P: ?Sized> {
    source: &'a mut P,
    field: &'a RGrid,
}

impl<'a, P> WithField<'a, P>
where P: PotentialSource + ?Sized
{
    pub fn new(source: &'a mut P, field: &'a RGrid) -> Self { Self { source, field } }
}

impl<P> PotentialSource for WithField<'_, P>
where P: PotentialSource + ?Sized
{
    fn potential(&mut self, psi: &CGrid, out: &mut CGrid) -> HeResult<()> {
        self.source.potential(psi, out)?;
        ShapeError::check(out.shape(), self.field.shape())?;
        nd::Zip::from(out.data_mut()).and(self.field.data())
            .par_for_each(|o, v| { *o += *v; });
        Ok(())
    }
}

/// The kinetic half of the split-step operator,
/// `F⁻¹ exp(-i τ |k - k₀|²/2m) F`.
///
/// Neumann grids are propagated on their half-sample mirror extension (twice
/// the size along each axis), which keeps the normal derivative at the faces
/// zero.
#[derive(Clone, Debug)]
pub struct Kinetic {
    shape: GridShape,
    boundary: Boundary,
    fft: Fft3,
    k: [nd::Array1<f64>; 3],
}

impl Kinetic {
    pub fn new(shape: &GridShape, boundary: Boundary) -> Self {
        let h = shape.step();
        let factor = match boundary {
            Boundary::Periodic => 1,
            Boundary::Neumann => 2,
        };
        let dims = (factor * shape.nx(), factor * shape.ny(), factor * shape.nz());
        let k = [
            wavenumbers(dims.0, h),
            wavenumbers(dims.1, h),
            wavenumbers(dims.2, h),
        ];
        Self { shape: *shape, boundary, fft: Fft3::new(dims), k }
    }

    pub fn boundary(&self) -> Boundary { self.boundary }

    fn phase(&self, data: &mut nd::Array3<C64>, ts: C64, mass: f64, k0: [f64; 3]) {
        let [kx, ky, kz] = &self.k;
        let c = -C64::i() * ts / (2.0 * mass);
        nd::Zip::indexed(data)
            .par_for_each(|(i, j, k), v| {
                let k2 = (kx[i] - k0[0]).powi(2)
                    + (ky[j] - k0[1]).powi(2)
                    + (kz[k] - k0[2]).powi(2);
                *v *= (c * k2).exp();
            });
    }

    /// Apply the kinetic propagator to `psi` in place.
    pub fn apply(&self, psi: &mut CGrid, ts: C64, mass: f64) -> Result<(), ShapeError> {
        ShapeError::check(&self.shape, psi.shape())?;
        let k0 = psi.momentum();
        match self.boundary {
            Boundary::Periodic => {
                let data = psi.data_mut();
                self.fft.forward(data);
                self.phase(data, ts, mass, k0);
                self.fft.inverse(data);
            },
            Boundary::Neumann => {
                let (nx, ny, nz) = self.shape.dims();
                let mirror = |i: usize, n: usize| if i < n { i } else { 2 * n - 1 - i };
                let src = psi.data();
                let mut ext: nd::Array3<C64>
                    = nd::Array3::from_shape_fn(self.fft.dims(), |(i, j, k)| {
                        src[[mirror(i, nx), mirror(j, ny), mirror(k, nz)]]
                    });
                self.fft.forward(&mut ext);
                self.phase(&mut ext, ts, mass, k0);
                self.fft.inverse(&mut ext);
                psi.data_mut()
                    .assign(&ext.slice(nd::s![..nx, ..ny, ..nz]));
            },
        }
        Ok(())
    }
}

// multiply by exp(-i V τ/2)
fn apply_half_potential(psi: &mut CGrid, pot: &CGrid, ts: C64) -> Result<(), ShapeError> {
    ShapeError::check(psi.shape(), pot.shape())?;
    let c = -C64::i() * ts / 2.0;
    nd::Zip::from(psi.data_mut()).and(pot.data())
        .par_for_each(|p, v| { *p *= (c * v).exp(); });
    Ok(())
}

fn split_step(kinetic: &Kinetic, psi: &mut CGrid, pot: &CGrid, ts: C64, mass: f64)
    -> Result<(), ShapeError>
{
    apply_half_potential(psi, pot, ts)?;
    kinetic.apply(psi, ts, mass)?;
    apply_half_potential(psi, pot, ts)
}

/// Predictor–corrector integrator for one species.
///
/// Owns the two potential buffers of a step: the potential of the current
/// amplitude (kept from predict to correct) and the one evaluated on the
/// predicted amplitude.
#[derive(Clone, Debug)]
pub struct Propagator {
    kinetic: Kinetic,
    v_now: CGrid,
    v_future: CGrid,
}

impl Propagator {
    pub fn new(shape: &GridShape, boundary: Boundary) -> Self {
        Self {
            kinetic: Kinetic::new(shape, boundary),
            v_now: CGrid::zeros(shape),
            v_future: CGrid::zeros(shape),
        }
    }

    pub fn kinetic(&self) -> &Kinetic { &self.kinetic }

    /// Potential evaluated on the current amplitude in the last predict
    /// phase.
    pub fn last_potential(&self) -> &CGrid { &self.v_now }

    /// Apply `U(τ, V)` to `psi` in place.
    pub fn split_step(&self, psi: &mut CGrid, pot: &CGrid, ts: C64, mass: f64)
        -> Result<(), ShapeError>
    {
        split_step(&self.kinetic, psi, pot, ts, mass)
    }

    /// Predict phase: evaluate the potential on the current amplitude and
    /// propagate a copy of it into the future buffer.
    pub fn predict<P>(&mut self, wf: &mut Wavefunction, source: &mut P, ts: C64)
        -> HeResult<()>
    where P: PotentialSource + ?Sized
    {
        wf.predicted = false;
        source.potential(wf.current(), &mut self.v_now)?;
        let mass = wf.mass();
        let (current, future) = wf.split_mut();
        future.assign(current)?;
        future.set_momentum(current.momentum());
        future.set_boundary(current.boundary());
        split_step(&self.kinetic, future, &self.v_now, ts, mass)?;
        wf.predicted = true;
        Ok(())
    }

    /// Correct phase: evaluate the potential on the predicted amplitude and
    /// propagate the current amplitude with the average of both potentials.
    pub fn correct<P>(&mut self, wf: &mut Wavefunction, source: &mut P, ts: C64)
        -> HeResult<()>
    where P: PotentialSource + ?Sized
    {
        if !wf.is_predicted() { return Err(Error::NotPredicted); }
        source.potential(wf.future(), &mut self.v_future)?;
        nd::Zip::from(self.v_future.data_mut()).and(self.v_now.data())
            .par_for_each(|f, n| { *f = 0.5 * (*f + *n); });
        let mass = wf.mass();
        wf.predicted = false;
        split_step(&self.kinetic, wf.current_mut(), &self.v_future, ts, mass)?;
        debug!("corrected step with ts = {ts}");
        Ok(())
    }

    /// One full predictor–corrector step.
    pub fn step<P>(&mut self, wf: &mut Wavefunction, source: &mut P, ts: C64)
        -> HeResult<()>
    where P: PotentialSource + ?Sized
    {
        self.predict(wf, source, ts)?;
        self.correct(wf, source, ts)
    }
}
