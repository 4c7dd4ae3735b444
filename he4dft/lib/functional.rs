//! The Orsay-Trento density functional for superfluid ⁴He and its bulk
//! equation of state.
//!
//! The functional is
//! ```text
//! E = ∫ ½ ρ (V_LJ * ρ) + (c₂/2) ρ ρ̄² + (c₃/3) ρ ρ̄³
//!   - C ∫ G·(F * G)
//!   - (m/2) ∫ [ (J²/ρ)(V_J * ρ) - J·(V_J * J) ]
//! ```
//! with `ρ̄ = Π_h * ρ`, `ρ̃ = F * ρ`, `G = (1 - ρ̃/ρ₀s) ∇ρ` and
//! `C = α_s / 4m` (ħ = 1). The second line is the kinetic-correlation term and
//! the third the backflow term; both are optional and selected by [`Model`].
//! Everything here is in atomic units unless a name says otherwise.
//!
//! See [`docs`][crate::docs] for the physical background.

use std::f64::consts::PI;
use ndarray as nd;
use num_complex::Complex64 as C64;
use serde::{ Deserialize, Serialize };
use tracing::info;
use crate::{
    bulk::BulkProperties,
    convolution::Convolution,
    error::{ BulkError, ConfigError, DomainError, HeResult },
    grid::{ Boundary, CGrid, GridShape, RGrid },
    units::{ AU_ANG, HELIUM_MASS, ang_to_au, density_to_au, kelvin_to_au },
};

/// Parameters of the functional, stored in atomic units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OtParameters {
    /// Lennard-Jones well depth.
    pub epsilon: f64,
    /// Lennard-Jones length.
    pub sigma: f64,
    /// Core radius: the LJ kernel vanishes inside it, and it is the radius of
    /// `Π_h`.
    pub h: f64,
    pub c2: f64,
    pub c3: f64,
    pub alpha_s: f64,
    pub rho0s: f64,
    /// Width of the kinetic-correlation Gaussian `F`.
    pub l_g: f64,
    pub gamma11: f64,
    pub gamma12: f64,
    pub alpha1: f64,
    pub gamma21: f64,
    pub gamma22: f64,
    pub alpha2: f64,
    /// Reference bulk density `ρ₀`.
    pub rho0: f64,
    /// Particle mass.
    pub mass: f64,
    /// Below this density the backflow velocity field is taken to vanish.
    pub min_density: f64,
    /// Upper bound on the backflow velocity magnitude.
    pub velocity_cutoff: Option<f64>,
}

impl Default for OtParameters {
    fn default() -> Self { Self::orsay_trento() }
}

impl OtParameters {
    /// Standard zero-temperature Orsay-Trento parameters.
    pub fn orsay_trento() -> Self {
        let ang2 = AU_ANG * AU_ANG; // Å⁻² -> bohr⁻²
        Self {
            epsilon: kelvin_to_au(10.22),
            sigma: ang_to_au(2.556),
            h: ang_to_au(2.190323),
            c2: kelvin_to_au(-2.411857e4) * ang_to_au(1.0).powi(6),
            c3: kelvin_to_au(1.858496e6) * ang_to_au(1.0).powi(9),
            alpha_s: 54.31 * ang_to_au(1.0).powi(3),
            rho0s: density_to_au(0.04),
            l_g: ang_to_au(1.0),
            gamma11: -19.7544,
            gamma12: 12.5616 * ang2,
            alpha1: 1.023 * ang2,
            gamma21: -0.2395,
            gamma22: 0.0312 * ang2,
            alpha2: 0.14912 * ang2,
            rho0: density_to_au(0.0218360),
            mass: HELIUM_MASS,
            min_density: density_to_au(1e-5),
            velocity_cutoff: None,
        }
    }

    /// Replace the reference bulk density (atomic units).
    pub fn with_rho0(mut self, rho0: f64) -> Self {
        self.rho0 = rho0;
        self
    }

    /// Lennard-Jones pair potential at distance `r`, zero inside the core
    /// radius `h`.
    pub fn lennard_jones(&self, r: f64) -> f64 {
        if r < self.h { return 0.0; }
        let s6 = (self.sigma / r).powi(6);
        4.0 * self.epsilon * (s6 * s6 - s6)
    }

    /// Backflow kernel `V_J` at distance `r`.
    pub fn backflow_kernel(&self, r: f64) -> f64 {
        let r2 = r * r;
        (self.gamma11 + self.gamma12 * r2) * (-self.alpha1 * r2).exp()
            + (self.gamma21 + self.gamma22 * r2) * (-self.alpha2 * r2).exp()
    }

    // kinetic-correlation prefactor α_s / 4m
    fn kc_prefactor(&self) -> f64 { self.alpha_s / (4.0 * self.mass) }
}

/// Selection of optional terms in the functional.
///
/// The plain Orsay-Trento part is always present. The integer form used in
/// parameter files is a bitmask: 1 = plain, 2 = kinetic correlation,
/// 4 = backflow.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Model {
    pub kinetic_correlation: bool,
    pub backflow: bool,
}

impl Model {
    pub const PLAIN: u32 = 1;
    pub const KINETIC_CORRELATION: u32 = 2;
    pub const BACKFLOW: u32 = 4;

    /// Full functional with all terms switched on.
    pub fn full() -> Self { Self { kinetic_correlation: true, backflow: true } }

    pub fn from_bits(bits: u32) -> Result<Self, ConfigError> {
        let known = Self::PLAIN | Self::KINETIC_CORRELATION | Self::BACKFLOW;
        if bits & Self::PLAIN == 0 || bits & !known != 0 {
            return Err(ConfigError::Malformed {
                key: "model".into(), value: bits.to_string() });
        }
        Ok(Self {
            kinetic_correlation: bits & Self::KINETIC_CORRELATION != 0,
            backflow: bits & Self::BACKFLOW != 0,
        })
    }

    pub fn bits(&self) -> u32 {
        Self::PLAIN
            | if self.kinetic_correlation { Self::KINETIC_CORRELATION } else { 0 }
            | if self.backflow { Self::BACKFLOW } else { 0 }
    }
}

impl TryFrom<u32> for Model {
    type Error = ConfigError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> { Self::from_bits(bits) }
}

impl From<Model> for u32 {
    fn from(model: Model) -> Self { model.bits() }
}

/// Energy, chemical potential and pressure of uniform liquid described by the
/// discretized functional.
///
/// `b` is the grid integral of the sampled Lennard-Jones kernel, so that these
/// quantities agree exactly with what [`Functional`] produces on a uniform
/// density.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BulkEos {
    pub b: f64,
    pub c2: f64,
    pub c3: f64,
}

impl BulkEos {
    /// Energy density `e(ρ)`.
    pub fn energy_density(&self, rho: f64) -> f64 {
        self.b / 2.0 * rho.powi(2)
            + self.c2 / 2.0 * rho.powi(3)
            + self.c3 / 3.0 * rho.powi(4)
    }

    /// Energy per particle `e(ρ) / ρ`.
    pub fn energy_per_particle(&self, rho: f64) -> f64 {
        self.energy_density(rho) / rho
    }

    /// Chemical potential `de/dρ`.
    pub fn chemical_potential(&self, rho: f64) -> f64 {
        self.b * rho
            + 1.5 * self.c2 * rho.powi(2)
            + 4.0 / 3.0 * self.c3 * rho.powi(3)
    }

    /// Pressure `ρ μ - e`.
    pub fn pressure(&self, rho: f64) -> f64 {
        rho * self.chemical_potential(rho) - self.energy_density(rho)
    }

    // dP/dρ
    fn dpressure(&self, rho: f64) -> f64 {
        self.b * rho + 3.0 * self.c2 * rho.powi(2) + 4.0 * self.c3 * rho.powi(3)
    }

    /// Density of the liquid held at external pressure `p`.
    ///
    /// Zero pressure has a closed form; anything else is found by Newton
    /// iteration starting from it.
    pub fn equilibrium_density(&self, p: f64) -> Result<f64, BulkError> {
        const MAXITERS: usize = 100;
        const EPSILON: f64 = 1e-12;

        let disc = self.c2 * self.c2 - 2.0 * self.b * self.c3;
        if disc < 0.0 {
            return Err(BulkError::NoConvergence { target: p, iters: 0 });
        }
        let rho_zero = (-self.c2 + disc.sqrt()) / (2.0 * self.c3);
        if p == 0.0 { return Ok(rho_zero); }
        let mut rho = rho_zero;
        for _ in 0..MAXITERS {
            let step = (self.pressure(rho) - p) / self.dpressure(rho);
            rho -= step;
            if (step / rho).abs() < EPSILON {
                return Ok(rho);
            }
        }
        Err(BulkError::NoConvergence { target: p, iters: MAXITERS })
    }
}

/// Liquid temperature regimes with their measured bulk parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    T0mK,
    T400mK,
    T800mK,
    T1200mK,
    T1600mK,
    T1800mK,
    T2100mK,
}

/// Bulk parameters of a [`Regime`], in laboratory units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegimeParams {
    /// Temperature (K).
    pub temperature: f64,
    /// Bulk density (Å⁻³).
    pub density: f64,
    /// Viscosity (Pa s).
    pub viscosity: f64,
    /// Normal fluid fraction.
    pub normal_fraction: f64,
}

impl Regime {
    pub const ALL: [Self; 7] = [
        Self::T0mK,
        Self::T400mK,
        Self::T800mK,
        Self::T1200mK,
        Self::T1600mK,
        Self::T1800mK,
        Self::T2100mK,
    ];

    /// Tabulated parameters.
    pub fn params(&self) -> RegimeParams {
        let (temperature, density, viscosity, normal_fraction) = match self {
            Self::T0mK => (0.0, 0.0218360, 0.0, 0.0),
            Self::T400mK => (0.4, 0.021845, 114.15e-6, 1.3e-6),
            Self::T800mK => (0.8, 0.021876, 15.823e-6, 0.001),
            Self::T1200mK => (1.2, 0.021846, 1.809e-6, 0.0289),
            Self::T1600mK => (1.6, 0.021845, 1.30977e-6, 0.171),
            Self::T1800mK => (1.8, 0.021885, 1.25e-6, 0.35),
            Self::T2100mK => (2.1, 0.021954, 1.71877e-6, 0.752),
        };
        RegimeParams { temperature, density, viscosity, normal_fraction }
    }

    /// Tabulated parameters with the normal fraction recomputed from measured
    /// superfluid-fraction data.
    pub fn calibrated(&self, bulk: &BulkProperties) -> Result<RegimeParams, DomainError> {
        let mut params = self.params();
        if params.temperature > 0.0 {
            bulk.superfluid_fraction.eval(params.temperature).checked()?;
            params.normal_fraction
                = 1.0 - bulk.superfluid_fraction(params.temperature);
        }
        Ok(params)
    }
}

// sample a radial function on the grid around the origin
fn radial(shape: &GridShape, f: impl Fn(f64) -> f64 + Sync) -> RGrid {
    RGrid::from_fn(shape, &|x: f64, y: f64, z: f64| f((x * x + y * y + z * z).sqrt()))
}

// rescale a sampled kernel so that its grid integral is exactly one
fn unit_integral(mut kernel: RGrid) -> RGrid {
    let total = kernel.integral();
    if total != 0.0 { kernel.scale(total.recip()); }
    kernel
}

/// Allocator for temporaries of the functional's shape.
struct Scratch {
    shape: GridShape,
}

impl Scratch {
    fn grid(&self) -> RGrid { RGrid::zeros(&self.shape) }

    fn grids<const N: usize>(&self) -> [RGrid; N] {
        std::array::from_fn(|_| self.grid())
    }
}

/// Density and (optionally) flux that the functional is evaluated on.
struct Fields<'a> {
    rho: &'a RGrid,
    flux: Option<&'a [RGrid; 3]>,
}

/// Orsay-Trento evaluator bound to one grid shape.
///
/// Holds only the static kernel spectra between calls; every potential and
/// energy evaluation starts from the density it is given.
#[derive(Clone, Debug)]
pub struct Functional {
    params: OtParameters,
    model: Model,
    shape: GridShape,
    lj: Convolution,
    sphere: Convolution,
    gauss: Convolution,
    backflow: Option<Convolution>,
    bulk: BulkEos,
}

impl Functional {
    /// Sample all kernels on `shape` and cache their spectra.
    pub fn new(shape: &GridShape, params: OtParameters, model: Model) -> Self {
        let lj_kernel = radial(shape, |r| params.lennard_jones(r));
        let bulk = BulkEos { b: lj_kernel.integral(), c2: params.c2, c3: params.c3 };
        let sphere_kernel
            = unit_integral(radial(shape, |r| if r <= params.h { 1.0 } else { 0.0 }));
        let l = params.l_g;
        let norm = (PI.powf(1.5) * l.powi(3)).recip();
        let gauss = Convolution::with_kernel(
            &unit_integral(radial(shape, |r| norm * (-(r / l).powi(2)).exp())));
        let backflow = model.backflow.then(|| {
            Convolution::with_kernel(&radial(shape, |r| params.backflow_kernel(r)))
        });
        info!(
            "functional on {shape}: model {}, b = {:.6e}, mu0 = {:.6e}",
            model.bits(), bulk.b, bulk.chemical_potential(params.rho0),
        );
        Self {
            params,
            model,
            shape: *shape,
            lj: Convolution::with_kernel(&lj_kernel),
            sphere: Convolution::with_kernel(&sphere_kernel),
            gauss,
            backflow,
            bulk,
        }
    }

    pub fn params(&self) -> &OtParameters { &self.params }

    pub fn model(&self) -> Model { self.model }

    pub fn shape(&self) -> &GridShape { &self.shape }

    /// Uniform-liquid equation of state consistent with this discretization.
    pub fn bulk(&self) -> &BulkEos { &self.bulk }

    /// Chemical potential of the reference bulk density.
    pub fn mu0(&self) -> f64 { self.bulk.chemical_potential(self.params.rho0) }

    /// Replace the reference bulk density, e.g. with the equilibrium density
    /// at some pressure found from [`bulk`][Self::bulk].
    pub fn with_rho0(mut self, rho0: f64) -> Self {
        self.params.rho0 = rho0;
        self
    }

    fn scratch(&self) -> Scratch { Scratch { shape: self.shape } }

    // density and, when backflow is on, flux of a single amplitude
    fn fields_of(&self, psi: &CGrid) -> HeResult<(RGrid, Option<[RGrid; 3]>)> {
        let mut rho = self.scratch().grid();
        psi.density(&mut rho)?;
        rho.set_boundary(psi.boundary());
        let flux = if self.model.backflow {
            let mut work = CGrid::zeros(&self.shape);
            let mut j: [RGrid; 3] = self.scratch().grids();
            for (axis, ja) in j.iter_mut().enumerate() {
                psi.flux(self.params.mass, axis, &mut work, ja)?;
            }
            Some(j)
        } else {
            None
        };
        Ok((rho, flux))
    }

    /// Add `δE/δρ` for the amplitude `psi` to `pot`.
    pub fn add_potential(&mut self, psi: &CGrid, pot: &mut CGrid) -> HeResult<()> {
        let (rho, flux) = self.fields_of(psi)?;
        self.add_terms(Fields { rho: &rho, flux: flux.as_ref() }, pot)
    }

    /// Add `δE/δρ` evaluated on the combined density (and flux) of two
    /// amplitudes to `pot`.
    pub fn add_potential_pair(&mut self, a: &CGrid, b: &CGrid, pot: &mut CGrid)
        -> HeResult<()>
    {
        let (mut rho, mut flux) = self.fields_of(a)?;
        let (rho_b, flux_b) = self.fields_of(b)?;
        nd::Zip::from(rho.data_mut()).and(rho_b.data())
            .par_for_each(|r, rb| { *r += *rb; });
        if let (Some(ja), Some(jb)) = (flux.as_mut(), flux_b.as_ref()) {
            for (ja_k, jb_k) in ja.iter_mut().zip(jb) {
                nd::Zip::from(ja_k.data_mut()).and(jb_k.data())
                    .par_for_each(|x, y| { *x += *y; });
            }
        }
        self.add_terms(Fields { rho: &rho, flux: flux.as_ref() }, pot)
    }

    fn add_terms(&mut self, fields: Fields<'_>, pot: &mut CGrid) -> HeResult<()> {
        crate::error::ShapeError::check(fields.rho.shape(), pot.shape())?;
        let mut re = self.scratch().grid();
        self.plain_potential(fields.rho, &mut re)?;
        if self.model.kinetic_correlation {
            self.kc_potential(fields.rho, &mut re)?;
        }
        let mut im = None;
        if let Some(j) = fields.flux {
            let mut imag = self.scratch().grid();
            self.backflow_potential(fields.rho, j, &mut re, &mut imag)?;
            im = Some(imag);
        }
        match im {
            Some(im) => {
                nd::Zip::from(pot.data_mut()).and(re.data()).and(im.data())
                    .par_for_each(|p, r, i| { *p += C64::new(*r, *i); });
            },
            None => {
                nd::Zip::from(pot.data_mut()).and(re.data())
                    .par_for_each(|p, r| { p.re += *r; });
            },
        }
        Ok(())
    }

    fn plain_potential(&mut self, rho: &RGrid, out: &mut RGrid) -> HeResult<()> {
        let p = self.params;
        let [mut lj_rho, mut rb, mut t1, mut t2, mut work]: [RGrid; 5]
            = self.scratch().grids();
        self.lj.convolve(rho, &mut lj_rho)?;
        self.sphere.convolve(rho, &mut rb)?;

        nd::Zip::from(work.data_mut()).and(rho.data()).and(rb.data())
            .par_for_each(|w, r, b| { *w = r * b; });
        self.sphere.convolve(&work, &mut t1)?;
        nd::Zip::from(work.data_mut()).and(rho.data()).and(rb.data())
            .par_for_each(|w, r, b| { *w = r * b * b; });
        self.sphere.convolve(&work, &mut t2)?;

        nd::Zip::from(out.data_mut())
            .and(lj_rho.data())
            .and(rb.data())
            .and(t1.data())
            .and(t2.data())
            .par_for_each(|o, l, b, a1, a2| {
                *o += l
                    + p.c2 / 2.0 * b * b + p.c2 * a1
                    + p.c3 / 3.0 * b * b * b + p.c3 * a2;
            });
        Ok(())
    }

    // factor (1 - ρ̃/ρ₀s) together with ∇ρ and W = F * G
    #[allow(clippy::type_complexity)]
    fn kc_fields(&mut self, rho: &RGrid)
        -> HeResult<(RGrid, [RGrid; 3], [RGrid; 3])>
    {
        let rho0s = self.params.rho0s;
        let sc = self.scratch();
        let gauss = &mut self.gauss;
        let mut factor = sc.grid();
        gauss.convolve(rho, &mut factor)?;
        factor.data_mut().par_map_inplace(|f| { *f = 1.0 - *f / rho0s; });

        let mut grad: [RGrid; 3] = sc.grids();
        let mut w: [RGrid; 3] = sc.grids();
        let mut g = sc.grid();
        for axis in 0..3 {
            rho.gradient(axis, &mut grad[axis])?;
            nd::Zip::from(g.data_mut()).and(grad[axis].data()).and(factor.data())
                .par_for_each(|gk, d, f| { *gk = f * d; });
            gauss.convolve(&g, &mut w[axis])?;
        }
        Ok((factor, grad, w))
    }

    fn kc_potential(&mut self, rho: &RGrid, out: &mut RGrid) -> HeResult<()> {
        let c = self.params.kc_prefactor();
        let rho0s = self.params.rho0s;
        let boundary = rho.boundary();
        let (factor, grad, w) = self.kc_fields(rho)?;
        let sc = self.scratch();

        let mut dot = sc.grid();
        for (ga, wa) in grad.iter().zip(&w) {
            nd::Zip::from(dot.data_mut()).and(ga.data()).and(wa.data())
                .par_for_each(|d, g, w| { *d += g * w; });
        }
        let mut smoothed = sc.grid();
        self.gauss.convolve(&dot, &mut smoothed)?;

        let q: [RGrid; 3] = std::array::from_fn(|axis| {
            let mut qa = sc.grid();
            nd::Zip::from(qa.data_mut()).and(w[axis].data()).and(factor.data())
                .par_for_each(|q, w, f| { *q = f * w; });
            qa
        });
        let mut div = sc.grid().with_boundary(boundary);
        let mut work = sc.grid();
        div.divergence([&q[0], &q[1], &q[2]], &mut work)?;

        nd::Zip::from(out.data_mut()).and(smoothed.data()).and(div.data())
            .par_for_each(|o, s, d| { *o += 2.0 * c * (s / rho0s + d); });
        Ok(())
    }

    // velocity field v = J/ρ, zero where the liquid is too thin, optionally
    // clamped in magnitude
    fn velocity(&self, rho: &RGrid, flux: &[RGrid; 3]) -> [RGrid; 3] {
        let rmin = self.params.min_density;
        let cutoff = self.params.velocity_cutoff;
        let mut v: [RGrid; 3] = self.scratch().grids();
        for (va, ja) in v.iter_mut().zip(flux) {
            nd::Zip::from(va.data_mut()).and(rho.data()).and(ja.data())
                .par_for_each(|v, r, j| { *v = if *r < rmin { 0.0 } else { j / r }; });
        }
        let [vx, vy, vz] = &mut v;
        if let Some(vmax) = cutoff {
            nd::Zip::from(vx.data_mut()).and(vy.data_mut()).and(vz.data_mut())
                .par_for_each(|x, y, z| {
                    let speed = (*x * *x + *y * *y + *z * *z).sqrt();
                    if speed > vmax {
                        let s = vmax / speed;
                        *x *= s; *y *= s; *z *= s;
                    }
                });
        }
        v
    }

    fn backflow_potential(
        &mut self,
        rho: &RGrid,
        flux: &[RGrid; 3],
        re: &mut RGrid,
        im: &mut RGrid,
    ) -> HeResult<()>
    {
        let m = self.params.mass;
        let rmin = self.params.min_density;
        let boundary = rho.boundary();
        let sc = self.scratch();
        let v = self.velocity(rho, flux);
        let Some(vj) = self.backflow.as_mut() else { return Ok(()); };

        // ρ v² = J²/ρ
        let mut rv2 = sc.grid();
        let mut v2 = sc.grid();
        for va in v.iter() {
            nd::Zip::from(v2.data_mut()).and(va.data())
                .par_for_each(|s, v| { *s += v * v; });
        }
        nd::Zip::from(rv2.data_mut()).and(rho.data()).and(v2.data())
            .par_for_each(|o, r, s| { *o = r * s; });

        let mut vj_rho = sc.grid();
        vj.convolve(rho, &mut vj_rho)?;
        let mut vj_rv2 = sc.grid();
        vj.convolve(&rv2, &mut vj_rv2)?;

        // S = -(m/2) (V_J * (J²/ρ) - v² (V_J * ρ))
        nd::Zip::from(re.data_mut()).and(vj_rv2.data()).and(v2.data()).and(vj_rho.data())
            .par_for_each(|o, a, s, b| { *o += -0.5 * m * (a - s * b); });

        // A = m (V_J * J - (V_J * ρ) v); add A·v to the real part and keep ρA
        // for the imaginary part
        let mut vj_j = sc.grid();
        let mut rho_a: [RGrid; 3] = sc.grids();
        for axis in 0..3 {
            vj.convolve(&flux[axis], &mut vj_j)?;
            nd::Zip::from(re.data_mut())
                .and(rho_a[axis].data_mut())
                .and(vj_j.data())
                .and(vj_rho.data())
                .and(v[axis].data())
                .and(rho.data())
                .par_for_each(|o, ra, cj, cr, va, r| {
                    let a = m * (cj - cr * va);
                    *o += a * va;
                    *ra = r * a;
                });
        }

        // -1/(2ρ) ∇·(ρA)
        let mut div = sc.grid().with_boundary(boundary);
        let mut work = sc.grid();
        div.divergence([&rho_a[0], &rho_a[1], &rho_a[2]], &mut work)?;
        nd::Zip::from(im.data_mut()).and(div.data()).and(rho.data())
            .par_for_each(|o, d, r| {
                if *r >= rmin { *o += -0.5 * d / r; }
            });
        Ok(())
    }

    /// Functional energy density of `psi` (kinetic energy excluded), written
    /// to `out`.
    pub fn energy_density(&mut self, psi: &CGrid, out: &mut RGrid) -> HeResult<()> {
        let p = self.params;
        let (rho, flux) = self.fields_of(psi)?;
        crate::error::ShapeError::check(rho.shape(), out.shape())?;
        let sc = self.scratch();
        let mut lj_rho = sc.grid();
        let mut rb = sc.grid();
        self.lj.convolve(&rho, &mut lj_rho)?;
        self.sphere.convolve(&rho, &mut rb)?;
        nd::Zip::from(out.data_mut()).and(rho.data()).and(lj_rho.data()).and(rb.data())
            .par_for_each(|e, r, l, b| {
                *e = 0.5 * r * l + p.c2 / 2.0 * r * b * b + p.c3 / 3.0 * r * b * b * b;
            });

        if self.model.kinetic_correlation {
            let c = p.kc_prefactor();
            let (factor, grad, w) = self.kc_fields(&rho)?;
            for (ga, wa) in grad.iter().zip(&w) {
                nd::Zip::from(out.data_mut()).and(ga.data()).and(wa.data()).and(factor.data())
                    .par_for_each(|e, g, w, f| { *e -= c * f * g * w; });
            }
        }

        if let Some(j) = flux.as_ref() {
            let v = self.velocity(&rho, j);
            if let Some(vj) = self.backflow.as_mut() {
                let mut vj_rho = sc.grid();
                vj.convolve(&rho, &mut vj_rho)?;
                let mut vj_j = sc.grid();
                for axis in 0..3 {
                    vj.convolve(&j[axis], &mut vj_j)?;
                    nd::Zip::from(out.data_mut())
                        .and(rho.data())
                        .and(v[axis].data())
                        .and(vj_rho.data())
                        .and(j[axis].data())
                        .and(vj_j.data())
                        .par_for_each(|e, r, va, cr, ja, cj| {
                            *e -= 0.5 * p.mass * (r * va * va * cr - ja * cj);
                        });
                }
            }
        }
        Ok(())
    }

    /// Total functional energy of `psi` (kinetic energy excluded).
    pub fn energy(&mut self, psi: &CGrid) -> HeResult<f64> {
        let mut e = self.scratch().grid();
        self.energy_density(psi, &mut e)?;
        Ok(e.integral())
    }
}

/// Uniform amplitude `√ρ` on `shape`.
pub fn uniform_liquid(shape: &GridShape, rho: f64, boundary: Boundary) -> CGrid {
    let amp = C64::from(rho.sqrt());
    let mut psi = CGrid::zeros(shape).with_boundary(boundary);
    psi.fill(amp);
    psi
}
