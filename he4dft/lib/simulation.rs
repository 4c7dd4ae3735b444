//! The owner of a whole run: configuration, amplitudes, policies and the
//! integrators that advance them.
//!
//! One [`Simulation::step`] advances every species by one predictor–corrector
//! step. With an impurity present the order is that of a staggered coupling:
//! 1. the impurity moves in the static field `V_pair * ρ_He` of the liquid;
//! 2. the liquid moves in its mean field plus `V_pair * ρ_imp` of the updated
//!    impurity;
//! 3. the boundary and normalization policies are applied to the liquid.
//!
//! A step that fails leaves every amplitude as it was before the step.

use std::{ f64::consts::PI, path::Path };
use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::{ debug, info, warn };
use crate::{
    bulk::BulkProperties,
    checkpoint,
    config::Config,
    convolution::Convolution,
    error::{ Error, HeResult, ShapeError },
    functional::{ Functional, uniform_liquid },
    grid::{ CGrid, GridShape, RGrid },
    interp::{ PairPotential, RadialFunction },
    policy::{ BoundaryPolicy, NormalizationPolicy, renormalize },
    timedep::{ HeliumPotential, Propagator, StaticPotential, WithField },
    units::{ AU_K, HELIUM_MASS, density_from_au },
    utils::Fft3,
    wavefunction::Wavefunction,
};

/// Round a frame velocity to the nearest value whose momentum `m v` is a
/// wavenumber of a periodic box of `n` points spaced by `step`.
pub fn commensurate_velocity(v: f64, n: usize, step: f64, mass: f64) -> f64 {
    let l = n as f64 * step;
    (l * mass * v / (2.0 * PI)).round() * 2.0 * PI / (l * mass)
}

/// A light species coupled to the liquid through a pair potential.
#[derive(Clone, Debug)]
pub struct Impurity {
    wf: Wavefunction,
    prop: Propagator,
    potential: PairPotential,
    pair: Convolution,
    kernel: RGrid,
    source: StaticPotential,
    rho: RGrid,
    backup: CGrid,
}

impl Impurity {
    /// Amplitude of the impurity.
    pub fn wavefunction(&self) -> &Wavefunction { &self.wf }

    /// Pair potential sampled on the grid, centred at the grid origin.
    pub fn kernel(&self) -> &RGrid { &self.kernel }

    pub fn potential(&self) -> &PairPotential { &self.potential }

    /// Analytic `∂V_pair/∂x_axis` sampled like [`kernel`][Self::kernel].
    pub fn kernel_gradient(&self, axis: usize) -> RGrid {
        self.potential.gradient_to_grid(self.kernel.shape(), [0.0; 3], axis)
    }

    /// Field `V_pair * ρ_He` the impurity moved in during the last step.
    pub fn field(&self) -> &RGrid { &self.source.field }
}

/// A complete run.
#[derive(Clone, Debug)]
pub struct Simulation {
    config: Config,
    shape: GridShape,
    fft: Fft3,
    rho0: f64,
    bulk: Option<BulkProperties>,
    helium: Wavefunction,
    helium_prop: Propagator,
    helium_source: HeliumPotential,
    external: Option<RGrid>,
    constraint: Option<RGrid>,
    backup: CGrid,
    normalization: NormalizationPolicy,
    boundary: BoundaryPolicy,
    impurity: Option<Impurity>,
    iter: usize,
    reference_norm: f64,
}

impl Simulation {
    /// Build every component described by `config`. The liquid starts as a
    /// uniform bulk at the configured density, with the configured noise and
    /// vortex, and the impurity (if any) as a Gaussian at the origin.
    pub fn new(config: Config) -> HeResult<Self> {
        config.validate()?;
        let shape = config.shape()?;
        let fft = Fft3::new(shape.dims());
        let bulk = match &config.liquid.bulk_tables {
            Some(path) => {
                let props = BulkProperties::load(path)?;
                info!("read bulk property tables from {}", path.display());
                Some(props)
            },
            None => None,
        };
        let functional = Functional::new(&shape, config.ot_parameters(), config.model);
        let rho0 = config.resolve_rho0(functional.bulk())?;
        let functional = functional.with_rho0(rho0);
        let helium_source = HeliumPotential::new(functional);
        let boundary = config.boundary.policy(&shape)?;
        let normalization
            = NormalizationPolicy::new(&config.normalization, &shape, rho0)?;

        let mut psi = uniform_liquid(&shape, rho0, boundary.boundary());
        if let Some(noise) = &config.thermal {
            noise.apply(&mut psi, &fft);
        }
        if let Some(vortex) = &config.vortex {
            vortex.imprint(&mut psi);
        }
        psi.set_momentum(config.frame_momentum(HELIUM_MASS));
        let constraint = config.vortex
            .and_then(|vortex| vortex.enforcing_potential(&shape, HELIUM_MASS));
        let helium = Wavefunction::new(psi, HELIUM_MASS);
        let reference_norm = helium.norm();
        let helium_prop = Propagator::new(&shape, boundary.boundary());

        let impurity = match &config.impurity {
            None => None,
            Some(imp) => {
                let potential = imp.potential.load()?;
                let kernel = potential.to_grid(&shape, [0.0; 3]);
                let w2 = 2.0 * imp.width * imp.width;
                let mut psi = CGrid::from_fn(&shape, &|x: f64, y: f64, z: f64| {
                    C64::from((-(x * x + y * y + z * z) / w2).exp())
                }).with_boundary(boundary.boundary());
                renormalize(&mut psi, imp.norm)?;
                Some(Impurity {
                    wf: Wavefunction::new(psi, imp.mass).with_norm_target(imp.norm),
                    prop: Propagator::new(&shape, boundary.boundary()),
                    potential,
                    pair: Convolution::with_kernel(&kernel),
                    kernel,
                    source: StaticPotential::new(RGrid::zeros(&shape)),
                    rho: RGrid::zeros(&shape),
                    backup: CGrid::zeros(&shape),
                })
            },
        };

        info!(
            "simulation on {shape}: rho0 = {:.6e} A^-3, mu0 = {:.6e} K, {} impurity",
            density_from_au(rho0),
            helium_source.mu0() * AU_K,
            if impurity.is_some() { "with" } else { "no" },
        );
        Ok(Self {
            fft,
            config,
            shape,
            rho0,
            bulk,
            helium,
            helium_prop,
            helium_source,
            external: None,
            constraint,
            backup: CGrid::zeros(&shape),
            normalization,
            boundary,
            impurity,
            iter: 0,
            reference_norm,
        })
    }

    /// Add a static external potential acting on the liquid.
    pub fn with_external(mut self, field: RGrid) -> HeResult<Self> {
        ShapeError::check(&self.shape, field.shape())?;
        self.helium_source.set_external(Some(field.clone()));
        self.external = Some(field);
        Ok(self)
    }

    /// Replace the liquid amplitude, keeping its frame and boundary.
    pub fn with_helium(mut self, psi: CGrid) -> HeResult<Self> {
        self.helium.replace(psi)?;
        self.reference_norm = self.helium.norm();
        Ok(self)
    }

    /// Replace the impurity amplitude, if there is an impurity.
    pub fn with_impurity_state(mut self, psi: CGrid) -> HeResult<Self> {
        if let Some(imp) = self.impurity.as_mut() {
            imp.wf.replace(psi)?;
        }
        Ok(self)
    }

    /// Continue from a liquid checkpoint written at iteration `iter`.
    pub fn restart_from<P>(self, path: P, iter: usize) -> HeResult<Self>
    where P: AsRef<Path>
    {
        let psi: CGrid = checkpoint::read_grid_checked(path.as_ref(), &self.shape)?;
        info!("restarting from {} at iteration {iter}", path.as_ref().display());
        let mut sim = self.with_helium(psi)?;
        sim.iter = iter;
        Ok(sim)
    }

    pub fn config(&self) -> &Config { &self.config }

    pub fn shape(&self) -> &GridShape { &self.shape }

    pub fn fft(&self) -> &Fft3 { &self.fft }

    /// Iterations completed so far.
    pub fn iteration(&self) -> usize { self.iter }

    /// Bulk density (atomic units).
    pub fn rho0(&self) -> f64 { self.rho0 }

    /// Bulk chemical potential the liquid is measured from.
    pub fn mu0(&self) -> f64 { self.helium_source.mu0() }

    pub fn helium(&self) -> &Wavefunction { &self.helium }

    pub fn impurity(&self) -> Option<&Impurity> { self.impurity.as_ref() }

    pub fn functional(&self) -> &Functional { self.helium_source.functional() }

    /// Static external potential on the liquid, if any.
    pub fn external(&self) -> Option<&RGrid> { self.external.as_ref() }

    /// Potential holding an enforced vortex line, if any. It acts on the
    /// liquid but is not counted as external energy.
    pub fn constraint(&self) -> Option<&RGrid> { self.constraint.as_ref() }

    /// Experimental bulk property tables, if configured.
    pub fn bulk_properties(&self) -> Option<&BulkProperties> { self.bulk.as_ref() }

    /// Complete potential seen by the liquid in the last step (external,
    /// impurity coupling, mean field and `-μ₀`).
    pub fn helium_potential(&self) -> &CGrid { self.helium_prop.last_potential() }

    pub fn normalization(&self) -> &NormalizationPolicy { &self.normalization }

    pub fn boundary(&self) -> &BoundaryPolicy { &self.boundary }

    /// Energy of the liquid according to the functional, plus the kinetic
    /// energy of the liquid.
    pub fn helium_energy(&mut self) -> HeResult<f64> {
        let kinetic = crate::diagnostics::kinetic_energy(&self.helium)?;
        let functional = self.helium_source.functional_mut().energy(self.helium.current())?;
        Ok(kinetic + functional)
    }

    /// Advance all species by one step.
    ///
    /// On error the amplitudes, the normalization state and the iteration
    /// count are those from before the call.
    pub fn step(&mut self) -> HeResult<()> {
        self.backup.assign(self.helium.current())?;
        if let Some(imp) = self.impurity.as_mut() {
            imp.backup.assign(imp.wf.current())?;
        }
        let normalization = self.normalization.clone();
        match self.advance() {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("step {} failed, restoring previous state: {err}", self.iter);
                self.helium.restore(&self.backup)?;
                if let Some(imp) = self.impurity.as_mut() {
                    imp.wf.restore(&imp.backup)?;
                }
                self.normalization = normalization;
                Err(err)
            },
        }
    }

    fn advance(&mut self) -> HeResult<()> {
        let iter = self.iter;
        let ts = self.config.time_step(iter);

        if let Some(imp) = self.impurity.as_mut() {
            let ts_imp = self.config.impurity_time_step(iter);
            self.helium.density(&mut imp.rho)?;
            imp.pair.convolve(&imp.rho, &mut imp.source.field)?;
            imp.prop.step(&mut imp.wf, &mut imp.source, ts_imp)?;
            if ts_imp.im != 0.0 {
                if let Some(target) = imp.wf.norm_target() {
                    renormalize(imp.wf.current_mut(), target)?;
                }
            }

            imp.wf.density(&mut imp.rho)?;
            let shape = self.shape;
            let ext = self.helium_source.external_mut()
                .get_or_insert_with(|| RGrid::zeros(&shape));
            imp.pair.convolve(&imp.rho, ext)?;
            if let Some(stat) = self.external.as_ref() {
                nd::Zip::from(ext.data_mut()).and(stat.data())
                    .par_for_each(|e, s| { *e += *s; });
            }
        }

        match self.constraint.as_ref() {
            Some(field) => {
                let mut source = WithField::new(&mut self.helium_source, field);
                self.helium_prop.step(&mut self.helium, &mut source, ts)?;
            },
            None => {
                self.helium_prop.step(&mut self.helium, &mut self.helium_source, ts)?;
            },
        }
        self.boundary.apply(self.helium.current_mut());
        self.normalization.apply(self.helium.current_mut(), iter, &self.fft)?;
        if ts.im != 0.0 {
            self.reference_norm = self.helium.norm();
        }
        self.iter += 1;
        debug!("completed iteration {}", self.iter);
        Ok(())
    }

    /// Run `iterations` steps, calling `between` after each one.
    pub fn run<F>(&mut self, iterations: usize, mut between: F) -> HeResult<()>
    where F: FnMut(&mut Self) -> HeResult<()>
    {
        for _ in 0..iterations {
            self.step()?;
            between(self)?;
        }
        Ok(())
    }

    /// Detect NaN/Inf values and, for norm-conserving runs, drift of the liquid
    /// norm by more than `tolerance` (relative) since the last dissipative step.
    pub fn check_health(&self, tolerance: f64) -> HeResult<()> {
        if self.helium.current().has_nan_or_inf() {
            return Err(Error::NanOrInf("helium amplitude"));
        }
        if let Some(imp) = self.impurity.as_ref() {
            if imp.wf.current().has_nan_or_inf() {
                return Err(Error::NanOrInf("impurity amplitude"));
            }
        }
        let conserving = matches!(
            self.normalization,
            NormalizationPolicy::Unconstrained
                | NormalizationPolicy::FixedParticleCount { .. }
        ) && !matches!(self.boundary, BoundaryPolicy::Absorbing(_));
        if conserving {
            let reference = match self.normalization {
                NormalizationPolicy::FixedParticleCount { atoms, .. } => atoms,
                _ => self.reference_norm,
            };
            let current = self.helium.norm();
            if (current - reference).abs() > tolerance * reference {
                return Err(Error::NormDrift { reference, current, tolerance });
            }
        }
        Ok(())
    }
}
