//! An electron bubble in superfluid helium: the electron and the liquid are
//! propagated together, each in the field of the other.
//!
//! All settings come from a keyword parameter file (see
//! [`he4dft::config::ParamFile`]). With `restart = 1` the run starts from the
//! densities in `restart.grd` (liquid) and `el-restart.grd` (electron).

use std::path::PathBuf;
use anyhow::{ Context, Result };
use clap::Parser;
use num_complex::Complex64 as C64;
use tracing::{ Level, info };
use he4dft::{
    checkpoint::read_density_amplitude,
    config::{ BoundaryConfig, Config, ImpurityConfig },
    diagnostics::{ DirectorySink, Sampler, write_snapshots },
    grid::CGrid,
    policy::Normalization,
    simulation::Simulation,
    units::AU_K,
};

// initial radius of the cavity around the electron (Bohr)
const CAVITY_RADIUS: f64 = 1.0;

#[derive(Debug, Parser)]
#[command(about = "Electron bubble in superfluid helium")]
struct Cli {
    /// Keyword parameter file.
    paramfile: PathBuf,

    /// Log every step.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut config = Config::load(&cli.paramfile)
        .with_context(|| format!("cannot use {}", cli.paramfile.display()))?;
    config.boundary = BoundaryConfig::Neumann;
    config.normalization = Normalization::Unconstrained;
    config.impurity = Some(ImpurityConfig::electron());
    config.apply_threads();
    let iterations = config.time.iterations;
    let dump = config.output.every.max(1);
    let restart = config.restart;
    let mut sink = DirectorySink::new(&config.output.dir)?;

    let sim = Simulation::new(config)?;
    let mut sim = if restart {
        info!("restarting from stored densities");
        let helium = read_density_amplitude("restart.grd", sim.shape())?;
        let electron = read_density_amplitude("el-restart.grd", sim.shape())?;
        sim.with_helium(helium)?.with_impurity_state(electron)?
    } else {
        let amp0 = sim.rho0().sqrt();
        let start = CGrid::from_fn(sim.shape(), &|x: f64, y: f64, z: f64| {
            let r = (x * x + y * y + z * z).sqrt();
            C64::from(if r < CAVITY_RADIUS { 0.0 } else { amp0 })
        });
        sim.with_helium(start)?
    };

    let mut sampler = Sampler::new(&sim, dump)?;
    sim.run(iterations, |sim| {
        sim.check_health(1e-6)?;
        let l = sim.iteration() - 1;
        if l % dump == 0 || l == 1 || l + 1 == iterations {
            let sample = sampler.sample(sim)?;
            info!("energy relative to bulk {:.6} K, {:.6} atoms",
                sample.relative_energy * AU_K, sample.atoms);
            write_snapshots(sim, "el", &mut sink)?;
        }
        Ok(())
    })?;
    Ok(())
}
