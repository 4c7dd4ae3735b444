//! A bubble held in place by a static external potential while the liquid
//! streams past it.
//!
//! Without arguments the liquid is first relaxed around the bubble (ramping
//! from imaginary to real time), then propagated in real time. Given a
//! `bubble-<iter>.grd` checkpoint the run continues from that iteration.

use std::path::PathBuf;
use anyhow::{ Context, Result, bail };
use clap::Parser;
use tracing::{ Level, info };
use he4dft::{
    checkpoint::{ self, checkpoint_name, iteration_from_name },
    config::Config,
    diagnostics::Sampler,
    interp::{ BubblePotential, RadialFunction },
    simulation::{ Simulation, commensurate_velocity },
    units::{ AU_MPS, HELIUM_MASS, mps_to_au },
};

const DEFAULT_CONFIG: &str = r#"
[grid]
nx = 512
ny = 256
nz = 256
step = 2.0

[time]
step = 15.0
iterations = 30000
mode = { kind = "ramp", warmup = 26666 }

[liquid]
pressure = 0.0
frame_velocity = [60.0, 0.0, 0.0]

[boundary]
kind = "absorbing"
amplitude = 2.0
widths = [60.0, 25.0, 25.0]

[output]
every = 166
"#;

const PREFIX: &str = "bubble";

#[derive(Debug, Parser)]
#[command(about = "Electron-like bubble in flowing superfluid helium")]
struct Cli {
    /// Checkpoint `bubble-<iter>.grd` to continue from.
    checkpoint: Option<PathBuf>,

    /// TOML configuration replacing the built-in one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log every step.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_toml_str(DEFAULT_CONFIG)?,
    };
    config.apply_threads();

    let vx = mps_to_au(config.liquid.frame_velocity[0]);
    let vx = commensurate_velocity(vx, config.grid.nx, config.grid.step, HELIUM_MASS);
    config.liquid.frame_velocity[0] = vx * AU_MPS;
    info!("liquid velocity rounded to {:.6e} m/s", vx * AU_MPS);

    let iterations = config.time.iterations;
    let every = config.output.every;
    let outdir = config.output.dir.clone();
    std::fs::create_dir_all(&outdir)
        .with_context(|| format!("cannot create {}", outdir.display()))?;

    let mut sim = Simulation::new(config)?;
    let bubble = BubblePotential::electron_like();
    let external = bubble.to_grid_smoothed(sim.shape(), [0.0; 3], 2);
    sim = sim.with_external(external)?;

    if let Some(path) = &cli.checkpoint {
        let name = path.to_string_lossy();
        let Some(iter) = iteration_from_name(&name, PREFIX) else {
            bail!("{name} is not a {PREFIX}-<iter>.grd checkpoint");
        };
        sim = sim.restart_from(path, iter)?;
    }

    let mut sampler = Sampler::new(&sim, every)?;
    let start = sim.iteration();
    sim.run(iterations.saturating_sub(start), |sim| {
        sim.check_health(1e-6)?;
        let iter = sim.iteration();
        if sampler.is_due(iter) {
            sampler.sample(sim)?;
            let path = outdir.join(checkpoint_name(PREFIX, iter));
            checkpoint::write_grid(&path, sim.helium().current())?;
        }
        Ok(())
    })?;
    info!("done after {} iterations", sim.iteration());
    Ok(())
}
