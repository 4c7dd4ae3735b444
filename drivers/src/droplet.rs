//! Ground state of a free helium droplet of a given number of atoms, found by
//! imaginary-time relaxation at fixed particle number.

use std::path::PathBuf;
use anyhow::{ Result, ensure };
use clap::Parser;
use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::{ Level, info };
use he4dft::{
    config::Config,
    diagnostics::{ DirectorySink, Sampler, write_snapshots },
    grid::{ CGrid, RGrid },
    interp::radial_profile,
    policy::Normalization,
    simulation::Simulation,
    timedep::TimeMode,
    units::{ AU_ANG, AU_K, density_from_au },
};

const DEFAULT_CONFIG: &str = r#"
[grid]
nx = 64
ny = 64
nz = 64
step = 2.0

[time]
step = 10.0
iterations = 2000

[output]
dir = "droplet"
every = 200
"#;

// surface thickness of the initial profile (Bohr)
const SURFACE: f64 = 2.0;

#[derive(Debug, Parser)]
#[command(about = "Imaginary-time ground state of a ⁴He droplet")]
struct Cli {
    /// Number of helium atoms.
    atoms: f64,

    /// TOML configuration replacing the built-in one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep moving the centre of mass to the origin for this many iterations.
    #[arg(long, default_value_t = 100)]
    recenter: usize,

    /// Log every step.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.atoms.is_finite() && self.atoms > 0.0,
            "the number of atoms must be finite and positive, not {}", self.atoms,
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();
    cli.validate()?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_toml_str(DEFAULT_CONFIG)?,
    };
    config.time.mode = TimeMode::Imaginary;
    config.normalization = Normalization::FixedParticleCount {
        atoms: cli.atoms,
        recenter_until: cli.recenter,
    };
    config.apply_threads();
    let iterations = config.time.iterations;
    let every = config.output.every;
    let mut sink = DirectorySink::new(&config.output.dir)?;

    let sim = Simulation::new(config)?;
    let rho0 = sim.rho0();
    let radius = (3.0 * cli.atoms / (4.0 * std::f64::consts::PI * rho0)).cbrt();
    info!("initial droplet radius {:.3} A", radius * AU_ANG);
    let start = CGrid::from_fn(sim.shape(), &|x: f64, y: f64, z: f64| {
        let r = (x * x + y * y + z * z).sqrt();
        C64::from((rho0 / (1.0 + ((r - radius) / SURFACE).exp())).sqrt())
    });
    let mut sim = sim.with_helium(start)?;

    let mut sampler = Sampler::new(&sim, every)?;
    sim.run(iterations, |sim| {
        sim.check_health(1e-6)?;
        if sampler.is_due(sim.iteration()) {
            let sample = sampler.sample(sim)?;
            info!("energy per atom {:.6} K",
                sample.total_energy() / sample.atoms * AU_K);
            write_snapshots(sim, "impurity", &mut sink)?;
        }
        Ok(())
    })?;

    let mut rho = RGrid::zeros(sim.shape());
    sim.helium().density(&mut rho)?;
    let profile: nd::Array1<f64> = radial_profile(&rho, 0).mapv(density_from_au);
    let [ci, _, _] = sim.shape().center();
    for (i, r) in profile.iter().enumerate().skip(ci) {
        info!("r = {:8.3} A: rho = {:.6e} A^-3",
            sim.shape().coord(0, i) * AU_ANG, r);
    }
    write_snapshots(&sim, "impurity", &mut sink)?;
    Ok(())
}
