//! Observables computed between steps, and output of grid snapshots.
//!
//! Everything here only reads the state of a [`Simulation`]; the
//! [`Sampler`] keeps its own copy of the functional so that evaluating
//! energies does not disturb the propagation.

use std::{ f64::consts::TAU, path::{ Path, PathBuf } };
use ndarray as nd;
use tracing::info;
use crate::{
    checkpoint::{ self, checkpoint_name },
    convolution::Convolution,
    error::{ BulkError, Error, HeResult, ShapeError },
    functional::{ Functional, RegimeParams },
    grid::{ CGrid, RGrid },
    simulation::Simulation,
    units::{ AU_ANG, AU_K, AU_MPS, AU_VPM, e as ELEMENTARY_CHARGE, mps_to_au },
    vortex::winding_number,
    wavefunction::Wavefunction,
};

/// Stokes boundary coefficient for an electron bubble (slip).
pub const ELECTRON_STOKES_COEFFICIENT: f64 = 4.0;

/// Stokes boundary coefficient for a positive ion (stick).
pub const ION_STOKES_COEFFICIENT: f64 = 6.0;

/// Kinetic energy `∫ |(-i∇ - k₀) ψ|² / 2m` from central differences.
pub fn kinetic_energy(wf: &Wavefunction) -> HeResult<f64> {
    let psi = wf.current();
    let k0 = psi.momentum();
    let mut grad = CGrid::zeros(psi.shape());
    let mut total = 0.0;
    for (axis, k0a) in k0.into_iter().enumerate() {
        psi.gradient(axis, &mut grad)?;
        let s: f64
            = nd::Zip::from(grad.data()).and(psi.data())
            .par_map_collect(|g, p| (g - num_complex::Complex64::i() * k0a * p).norm_sqr())
            .sum();
        total += s;
    }
    Ok(total * psi.shape().dv() / (2.0 * wf.mass()))
}

/// `∫ V |ψ|²`.
pub fn potential_energy(wf: &Wavefunction, pot: &RGrid) -> HeResult<f64> {
    let psi = wf.current();
    ShapeError::check(psi.shape(), pot.shape())?;
    let s: f64
        = nd::Zip::from(psi.data()).and(pot.data())
        .par_map_collect(|p, v| p.norm_sqr() * v)
        .sum();
    Ok(s * psi.shape().dv())
}

/// Probability flux integrated over the box, per axis.
pub fn total_flux(wf: &Wavefunction) -> HeResult<[f64; 3]> {
    let psi = wf.current();
    let mut work = CGrid::zeros(psi.shape());
    let mut j = RGrid::zeros(psi.shape());
    let mut out = [0.0; 3];
    for (axis, o) in out.iter_mut().enumerate() {
        psi.flux(wf.mass(), axis, &mut work, &mut j)?;
        *o = j.integral();
    }
    Ok(out)
}

/// Circulation `∮ v·dl` (atomic units) of the liquid around the loop in the
/// mid-plane perpendicular to `axis`, `2π n / m` for `n` quanta.
pub fn circulation(wf: &Wavefunction, axis: usize) -> f64 {
    let psi = wf.current();
    let index = psi.shape().center()[axis];
    winding_number(psi, axis, index) * TAU / wf.mass()
}

/// The single grid axis carrying a nonzero frame velocity, with that
/// velocity.
pub fn frame_axis(velocity: [f64; 3]) -> Result<(usize, f64), Error> {
    let mut moving = velocity.iter().enumerate().filter(|(_, v)| **v != 0.0);
    match (moving.next(), moving.next()) {
        (Some((axis, v)), None) => Ok((axis, *v)),
        _ => Err(Error::NonAxisAlignedFrame(velocity)),
    }
}

/// Added mass of an object held fixed in liquid streaming past it:
/// `∫ J_axis / v`, in units of the liquid particle count.
pub fn added_mass(wf: &Wavefunction, velocity: [f64; 3]) -> HeResult<f64> {
    let (axis, v) = frame_axis(velocity)?;
    Ok(total_flux(wf)?[axis] / v)
}

/// Force along `axis` on an impurity from the liquid,
/// `-∫ ρ_imp (∂V_pair * ρ_He)`, where `dpair` holds the spectrum of
/// `∂V_pair/∂x_axis`.
pub fn drag_force(helium: &Wavefunction, impurity: &Wavefunction, dpair: &mut Convolution)
    -> HeResult<f64>
{
    let shape = *helium.current().shape();
    let mut rho = RGrid::zeros(&shape);
    let mut field = RGrid::zeros(&shape);
    helium.density(&mut rho)?;
    dpair.convolve(&rho, &mut field)?;
    Ok(-potential_energy(impurity, &field)?)
}

/// Force along an axis on a fixed external potential from the liquid,
/// `∫ ρ_He ∂V_ext/∂x_axis`, where `dext` is the sampled derivative.
pub fn external_drag_force(helium: &Wavefunction, dext: &RGrid) -> HeResult<f64> {
    potential_energy(helium, dext)
}

/// Mobility (m² V⁻¹ s⁻¹) of a carrier of unit charge moving at `velocity`
/// against a drag `force` (both atomic units).
pub fn mobility(velocity: f64, force: f64) -> f64 {
    (velocity * AU_MPS) / (-force * AU_VPM)
}

/// Stokes hydrodynamic radius (Å) for a given mobility (m² V⁻¹ s⁻¹).
pub fn stokes_radius(mobility: f64, regime: &RegimeParams, coefficient: f64) -> f64 {
    1e10 * ELEMENTARY_CHARGE
        / (coefficient * std::f64::consts::PI * mobility
            * regime.normal_fraction * regime.viscosity)
}

/// Transport quantities from a drag measurement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transport {
    /// Drag force (atomic units).
    pub force: f64,
    /// Field that would balance the drag (V/m).
    pub field: f64,
    /// m² V⁻¹ s⁻¹.
    pub mobility: f64,
    /// Å; `None` without regime data.
    pub stokes_radius: Option<f64>,
}

impl Transport {
    pub fn new(velocity: f64, force: f64, regime: Option<&RegimeParams>) -> Self {
        let mobility = mobility(velocity, force);
        Self {
            force,
            field: -force * AU_VPM,
            mobility,
            stokes_radius: regime.map(|r| {
                stokes_radius(mobility, r, ELECTRON_STOKES_COEFFICIENT)
            }),
        }
    }
}

/// One set of observables.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub iteration: usize,
    /// Number of liquid particles.
    pub atoms: f64,
    pub kinetic: f64,
    pub functional: f64,
    /// `∫ V_ext ρ_He`.
    pub external: f64,
    /// `∫ ρ_imp (V_pair * ρ_He)`.
    pub interaction: Option<f64>,
    pub impurity_kinetic: Option<f64>,
    /// Total energy relative to the same number of atoms in bulk.
    pub relative_energy: f64,
    /// `∫ J` of the liquid.
    pub flux: [f64; 3],
    /// Circulation quanta threading the mid-plane perpendicular to each axis.
    pub winding: [f64; 3],
    pub added_mass: Option<f64>,
    pub transport: Option<Transport>,
}

impl Sample {
    pub fn total_energy(&self) -> f64 {
        self.kinetic + self.functional + self.external
            + self.interaction.unwrap_or(0.0)
            + self.impurity_kinetic.unwrap_or(0.0)
    }
}

/// Computes a [`Sample`] every `every` iterations.
#[derive(Clone, Debug)]
pub struct Sampler {
    every: usize,
    functional: Functional,
    frame: Option<(usize, f64)>,
    pair: Option<Convolution>,
    dpair: Option<Convolution>,
    dext: Option<RGrid>,
    regime: Option<RegimeParams>,
}

impl Sampler {
    /// Prepare a sampler for `sim`. Transport quantities are computed when
    /// the frame moves along a single axis; the normal fraction entering the
    /// Stokes radius comes from the bulk tables when `sim` has them.
    pub fn new(sim: &Simulation, every: usize) -> HeResult<Self> {
        let velocity = sim.config().liquid.frame_velocity.map(mps_to_au);
        let frame = frame_axis(velocity).ok();
        let pair = sim.impurity().map(|imp| Convolution::with_kernel(imp.kernel()));
        let mut dpair = None;
        let mut dext = None;
        if let Some((axis, _)) = frame {
            if let Some(imp) = sim.impurity() {
                dpair = Some(Convolution::with_kernel(&imp.kernel_gradient(axis)));
            }
            if let Some(ext) = sim.external() {
                let mut d = RGrid::zeros(sim.shape());
                ext.gradient(axis, &mut d)?;
                dext = Some(d);
            }
        }
        let regime = match (sim.config().regime, sim.bulk_properties()) {
            (Some(regime), Some(props)) => {
                let params = regime.calibrated(props).map_err(BulkError::from)?;
                info!("normal fraction at {} K from bulk tables: {:.6e}",
                    params.temperature, params.normal_fraction);
                Some(params)
            },
            (Some(regime), None) => Some(regime.params()),
            (None, _) => None,
        };
        Ok(Self {
            every,
            functional: sim.functional().clone(),
            frame,
            pair,
            dpair,
            dext,
            regime,
        })
    }

    /// Transport parameters used for Stokes radii.
    pub fn regime(&self) -> Option<&RegimeParams> { self.regime.as_ref() }

    /// `true` if iteration `iter` should be sampled.
    pub fn is_due(&self, iter: usize) -> bool {
        self.every > 0 && iter % self.every == 0
    }

    /// Compute all observables of `sim`'s current state.
    pub fn sample(&mut self, sim: &Simulation) -> HeResult<Sample> {
        let helium = sim.helium();
        let shape = *sim.shape();
        let atoms = helium.norm();
        let kinetic = kinetic_energy(helium)?;
        let functional = self.functional.energy(helium.current())?;
        let external = match sim.external() {
            Some(ext) => potential_energy(helium, ext)?,
            None => 0.0,
        };
        let (interaction, impurity_kinetic) = match (sim.impurity(), self.pair.as_mut()) {
            (Some(imp), Some(pair)) => {
                let mut rho = RGrid::zeros(&shape);
                let mut field = RGrid::zeros(&shape);
                helium.density(&mut rho)?;
                pair.convolve(&rho, &mut field)?;
                (
                    Some(potential_energy(imp.wavefunction(), &field)?),
                    Some(kinetic_energy(imp.wavefunction())?),
                )
            },
            _ => (None, None),
        };
        let flux = total_flux(helium)?;
        let center = shape.center();
        let winding: [f64; 3]
            = std::array::from_fn(|axis| winding_number(helium.current(), axis, center[axis]));

        let eos = self.functional.bulk();
        let rho0 = sim.rho0();
        let bulk = eos.energy_per_particle(rho0) * atoms;

        let mut added_mass = None;
        let mut transport = None;
        if let Some((axis, v)) = self.frame {
            added_mass = Some(flux[axis] / v);
            let force = match (self.dpair.as_mut(), sim.impurity()) {
                (Some(dpair), Some(imp)) => {
                    Some(drag_force(helium, imp.wavefunction(), dpair)?)
                },
                _ => self.dext.as_ref()
                    .map(|d| external_drag_force(helium, d))
                    .transpose()?,
            };
            transport = force.map(|f| Transport::new(v, f, self.regime.as_ref()));
        }

        let sample = Sample {
            iteration: sim.iteration(),
            atoms,
            kinetic,
            functional,
            external,
            interaction,
            impurity_kinetic,
            relative_energy: 0.0,
            flux,
            winding,
            added_mass,
            transport,
        };
        let sample = Sample { relative_energy: sample.total_energy() - bulk, ..sample };
        info!(
            "iter {}: atoms = {:.6}, E - E_bulk = {:.6e} K, E/N = {:.6e} K",
            sample.iteration, sample.atoms,
            sample.relative_energy * AU_K,
            sample.total_energy() / sample.atoms * AU_K,
        );
        if sample.winding.iter().any(|w| w.abs() > 0.5) {
            info!("iter {}: circulation quanta = {:.3?}", sample.iteration, sample.winding);
        }
        if let Some(m) = sample.added_mass {
            info!("iter {}: added mass = {m:.6e}", sample.iteration);
        }
        if let Some(t) = sample.transport {
            info!(
                "iter {}: drag = {:.6e} au, field = {:.6e} V/m, mobility = {:.6e} cm^2/Vs",
                sample.iteration, t.force, t.field, 1e4 * t.mobility,
            );
            if let Some(r) = t.stokes_radius {
                info!("iter {}: Stokes radius = {r:.6e} A ({:.6e} bohr)",
                    sample.iteration, r / AU_ANG);
            }
        }
        Ok(sample)
    }
}

/// A field handed to a [`SnapshotSink`].
#[derive(Copy, Clone, Debug)]
pub enum SnapshotField<'a> {
    Real(&'a RGrid),
    Complex(&'a CGrid),
}

/// Destination of grid snapshots.
pub trait SnapshotSink {
    fn write(&mut self, name: &str, iter: usize, field: SnapshotField<'_>) -> HeResult<()>;
}

/// Writes each snapshot as a checkpoint file `<dir>/<name>-<iter>.grd`.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Sink writing into `dir`, which is created if missing.
    pub fn new<P>(dir: P) -> HeResult<Self>
    where P: AsRef<Path>
    {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|source| crate::error::CheckpointError::Io {
                path: dir.display().to_string(), source })?;
        Ok(Self { dir })
    }

    /// Path the snapshot `name` at `iter` is written to.
    pub fn path(&self, name: &str, iter: usize) -> PathBuf {
        self.dir.join(checkpoint_name(name, iter))
    }
}

impl SnapshotSink for DirectorySink {
    fn write(&mut self, name: &str, iter: usize, field: SnapshotField<'_>) -> HeResult<()> {
        let path = self.path(name, iter);
        match field {
            SnapshotField::Real(grid) => checkpoint::write_grid(&path, grid)?,
            SnapshotField::Complex(grid) => checkpoint::write_grid(&path, grid)?,
        }
        Ok(())
    }
}

/// Write the liquid density and amplitude under the names `helium` and
/// `helium-wf`, and the impurity's (if any) as `<impurity>` and
/// `<impurity>-wf`.
pub fn write_snapshots<S>(sim: &Simulation, impurity: &str, sink: &mut S) -> HeResult<()>
where S: SnapshotSink + ?Sized
{
    let iter = sim.iteration();
    let mut rho = RGrid::zeros(sim.shape());
    sim.helium().density(&mut rho)?;
    sink.write("helium", iter, SnapshotField::Real(&rho))?;
    sink.write("helium-wf", iter, SnapshotField::Complex(sim.helium().current()))?;
    if let Some(imp) = sim.impurity() {
        imp.wavefunction().density(&mut rho)?;
        sink.write(impurity, iter, SnapshotField::Real(&rho))?;
        sink.write(&format!("{impurity}-wf"), iter,
            SnapshotField::Complex(imp.wavefunction().current()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64 as C64;
    use std::f64::consts::PI;
    use crate::{
        functional::Regime,
        grid::GridShape,
    };

    #[derive(Default)]
    struct Recorder(Vec<(String, usize, bool)>);

    impl SnapshotSink for Recorder {
        fn write(&mut self, name: &str, iter: usize, field: SnapshotField<'_>) -> HeResult<()> {
            self.0.push((name.to_string(), iter, matches!(field, SnapshotField::Complex(_))));
            Ok(())
        }
    }

    fn plane_wave(n: usize, h: f64, m: usize) -> (CGrid, f64) {
        let shape = GridShape::new(n, n, n, h).unwrap();
        let k = 2.0 * PI * m as f64 / (n as f64 * h);
        (CGrid::from_fn(&shape, &|x: f64, _: f64, _: f64| C64::from_polar(1.0, k * x)), k)
    }

    #[test]
    fn plane_wave_kinetic_energy_and_flux() {
        let (psi, k) = plane_wave(16, 0.5, 1);
        let volume = psi.shape().len() as f64 * psi.shape().dv();
        let mass = 2.0;
        let wf = Wavefunction::new(psi, mass);
        // central differences see sin(kh)/h instead of k
        let keff = (k * 0.5).sin() / 0.5;
        let t = kinetic_energy(&wf).unwrap();
        assert_abs_diff_eq!(t, keff * keff / (2.0 * mass) * volume, epsilon = 1e-10);
        let j = total_flux(&wf).unwrap();
        assert_abs_diff_eq!(j[0], keff / mass * volume, epsilon = 1e-10);
        assert_abs_diff_eq!(j[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn frame_momentum_cancels_plane_wave() {
        let (mut psi, _) = plane_wave(16, 0.5, 1);
        let h = 0.5;
        let keff = (2.0 * PI / 8.0 * h).sin() / h;
        psi.set_momentum([keff, 0.0, 0.0]);
        let wf = Wavefunction::new(psi, 1.0);
        assert_abs_diff_eq!(kinetic_energy(&wf).unwrap(), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(total_flux(&wf).unwrap()[0], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn added_mass_needs_axis_aligned_frame() {
        let (psi, _) = plane_wave(8, 1.0, 1);
        let wf = Wavefunction::new(psi, 1.0);
        assert!(matches!(
            added_mass(&wf, [1.0, 1.0, 0.0]),
            Err(Error::NonAxisAlignedFrame(_)),
        ));
        assert!(matches!(added_mass(&wf, [0.0; 3]), Err(Error::NonAxisAlignedFrame(_))));
        let j = total_flux(&wf).unwrap()[0];
        assert_abs_diff_eq!(added_mass(&wf, [0.5, 0.0, 0.0]).unwrap(), 2.0 * j, epsilon = 1e-12);
        assert_eq!(frame_axis([0.0, 0.0, -3.0]).unwrap(), (2, -3.0));
    }

    #[test]
    fn potential_energy_of_uniform_density() {
        let shape = GridShape::new(4, 4, 4, 2.0).unwrap();
        let mut psi = CGrid::zeros(&shape);
        psi.fill(C64::new(0.0, 0.5));
        let wf = Wavefunction::new(psi, 1.0);
        let mut v = RGrid::zeros(&shape);
        v.fill(3.0);
        assert_abs_diff_eq!(potential_energy(&wf, &v).unwrap(), 0.75 * 64.0 * 8.0, epsilon = 1e-12);
    }

    #[test]
    fn drag_pushes_impurity_down_the_density_gradient() {
        let shape = GridShape::new(16, 16, 16, 1.0).unwrap();
        let gauss = |w: f64, x0: f64| CGrid::from_fn(&shape, &move |x: f64, y: f64, z: f64| {
            C64::from((-((x - x0).powi(2) + y * y + z * z) / (2.0 * w * w)).exp())
        });
        let kernel = RGrid::from_fn(&shape, &|x: f64, y: f64, z: f64| {
            (-(x * x + y * y + z * z) / 2.0).exp()
        });
        let mut dk = RGrid::zeros(&shape);
        kernel.gradient(0, &mut dk).unwrap();
        let mut dpair = Convolution::with_kernel(&dk);
        let helium = Wavefunction::new(gauss(1.5, 0.0), 1.0);

        let centred = Wavefunction::new(gauss(1.0, 0.0), 1.0);
        let f = drag_force(&helium, &centred, &mut dpair).unwrap();
        assert_abs_diff_eq!(f, 0.0, epsilon = 1e-10);

        // repulsive coupling pushes an off-centre impurity further out
        let shifted = Wavefunction::new(gauss(1.0, 1.0), 1.0);
        assert!(drag_force(&helium, &shifted, &mut dpair).unwrap() > 1e-3);
    }

    #[test]
    fn mobility_and_stokes_radius() {
        let v = mps_to_au(10.0);
        let force = -1e-9;
        let mu = mobility(v, force);
        assert_abs_diff_eq!(mu, 10.0 / (1e-9 * AU_VPM), epsilon = 1e-12 * mu);
        let regime = Regime::T1600mK.params();
        let r = stokes_radius(mu, &regime, ELECTRON_STOKES_COEFFICIENT);
        let expected = 1e10 * ELEMENTARY_CHARGE
            / (4.0 * PI * mu * regime.normal_fraction * regime.viscosity);
        assert_abs_diff_eq!(r, expected, epsilon = 1e-12 * expected);
        let t = Transport::new(v, force, Some(&regime));
        assert_eq!(t.mobility, mu);
        assert_eq!(t.stokes_radius, Some(r));
        assert!(Transport::new(v, force, None).stokes_radius.is_none());
    }

    #[test]
    fn recorder_receives_snapshots() {
        use crate::{ config::*, functional::Model, policy::Normalization, timedep::TimeMode };
        let config = Config {
            threads: 0,
            grid: GridConfig { nx: 8, ny: 8, nz: 8, step: 1.5 },
            time: TimeConfig { step: 1.0, impurity_step: None, iterations: 1, mode: TimeMode::Real },
            model: Model::default(),
            liquid: LiquidConfig::default(),
            boundary: BoundaryConfig::Periodic,
            normalization: Normalization::Unconstrained,
            impurity: None,
            vortex: None,
            thermal: None,
            regime: None,
            output: OutputConfig::default(),
            restart: false,
        };
        let mut sim = Simulation::new(config).unwrap();
        sim.step().unwrap();
        let mut rec = Recorder::default();
        write_snapshots(&sim, "el", &mut rec).unwrap();
        assert_eq!(rec.0, vec![
            ("helium".to_string(), 1, false),
            ("helium-wf".to_string(), 1, true),
        ]);
        let mut sampler = Sampler::new(&sim, 1).unwrap();
        assert!(sampler.is_due(4));
        let sample = sampler.sample(&sim).unwrap();
        let rho0 = sim.rho0();
        assert_abs_diff_eq!(sample.atoms, rho0 * sim.shape().len() as f64 * 1.5f64.powi(3),
            epsilon = 1e-9 * sample.atoms);
        // uniform bulk: energy equals the bulk energy of the same atoms
        assert_abs_diff_eq!(sample.relative_energy, 0.0, epsilon = 1e-9 * sample.functional.abs());
        assert!(sample.added_mass.is_none());
        assert_eq!(sample.winding, [0.0; 3]);
        assert!(sampler.regime().is_none());
    }

    #[test]
    fn circulation_counts_quanta() {
        use crate::vortex::Vortex;
        let shape = GridShape::new(12, 12, 12, 1.0).unwrap();
        let mut psi = CGrid::zeros(&shape);
        psi.fill(C64::from(1.0));
        Vortex::Line { axis: 1, quanta: 2 }.imprint(&mut psi);
        let mass = 4.0;
        let wf = Wavefunction::new(psi, mass);
        assert_abs_diff_eq!(circulation(&wf, 1), 2.0 * TAU / mass, epsilon = 1e-9);
        assert_abs_diff_eq!(circulation(&wf, 2), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn pair_interaction_is_stable_across_samples() {
        use crate::{ config::*, timedep::TimeMode };
        let toml = r#"
            regime = "T1600mK"
            [grid]
            nx = 16
            ny = 16
            nz = 16
            step = 1.5
            [time]
            step = 1.0
            iterations = 1
            mode = { kind = "real" }
            [impurity]
            width = 3.0
            potential = { kind = "bubble" }
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.time.mode, TimeMode::Real);
        let sim = Simulation::new(config).unwrap();
        let mut sampler = Sampler::new(&sim, 1).unwrap();
        let first = sampler.sample(&sim).unwrap();
        let second = sampler.sample(&sim).unwrap();
        assert_eq!(first.interaction, second.interaction);

        let imp = sim.impurity().unwrap();
        let mut rho = RGrid::zeros(sim.shape());
        let mut field = RGrid::zeros(sim.shape());
        sim.helium().density(&mut rho).unwrap();
        Convolution::with_kernel(imp.kernel()).convolve(&rho, &mut field).unwrap();
        let direct = potential_energy(imp.wavefunction(), &field).unwrap();
        let interaction = first.interaction.unwrap();
        assert!(interaction > 0.0);
        assert_abs_diff_eq!(interaction, direct, epsilon = 1e-12 * direct);
        // no bulk tables: the tabulated normal fraction is used
        assert_eq!(sampler.regime(), Some(&Regime::T1600mK.params()));
    }
}
