//! Run configuration.
//!
//! Two input formats are understood:
//! - a structured TOML document deserialized directly into [`Config`];
//! - the legacy keyword parameter file ([`ParamFile`]), one `key = value`
//!   assignment per line, every key required.
//!
//! ```text
//! threads = 0
//! grid = 128 128 128
//! gstep = 1.0          # Bohr
//! timestep = 10.0      # fs
//! timestep_el = 0.1    # fs
//! iter = 100000
//! itermode = 1         # 0 = real time, 1 = imaginary time
//! dump = 1000
//! model = 1            # 1 = plain, +2 kinetic correlation, +4 backflow
//! rho0 = 0.0218360     # Å^-3
//! restart = 0
//! ```
//!
//! All quantities are stored in the units they were given in; accessor
//! methods convert to atomic units.

use std::{
    collections::HashMap,
    path::{ Path, PathBuf },
};
use num_complex::Complex64 as C64;
use regex::Regex;
use serde::{ Deserialize, Serialize };
use tracing::{ info, warn };
use crate::{
    error::{ AllocationError, ConfigError, HeResult },
    functional::{ BulkEos, Model, OtParameters, Regime },
    grid::GridShape,
    interp::{ BubblePotential, PairPotential, RadialTable },
    policy::{ AbsorbingShell, BoundaryPolicy, Normalization },
    thermal::ThermalNoise,
    timedep::TimeMode,
    units::{ AU_BAR, density_to_au, fs_to_au, mps_to_au },
    vortex::Vortex,
};

/// Grid dimensions and spacing (Bohr).
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub step: f64,
}

/// Time stepping. Steps are in femtoseconds.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeConfig {
    pub step: f64,
    /// Step of the impurity species; defaults to `step`.
    #[serde(default)]
    pub impurity_step: Option<f64>,
    pub iterations: usize,
    #[serde(default)]
    pub mode: TimeMode,
}

/// Bulk liquid state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiquidConfig {
    /// Reference bulk density (Å⁻³).
    #[serde(default)]
    pub rho0: Option<f64>,
    /// External pressure (bar); sets the bulk density through the equation
    /// of state instead of `rho0`.
    #[serde(default)]
    pub pressure: Option<f64>,
    /// Velocity of the moving frame (m/s).
    #[serde(default)]
    pub frame_velocity: [f64; 3],
    /// Cap on the backflow velocity field (m/s).
    #[serde(default)]
    pub velocity_cutoff: Option<f64>,
    /// TOML file of experimental bulk property tables; calibrates the normal
    /// fraction of the temperature regime.
    #[serde(default)]
    pub bulk_tables: Option<PathBuf>,
}

/// Boundary treatment; widths are in Bohr.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryConfig {
    #[default]
    Periodic,
    Neumann,
    Absorbing { amplitude: f64, widths: [f64; 3] },
}

impl BoundaryConfig {
    /// Runtime policy on `shape`.
    pub fn policy(&self, shape: &GridShape) -> Result<BoundaryPolicy, ConfigError> {
        match *self {
            Self::Periodic => Ok(BoundaryPolicy::Periodic),
            Self::Neumann => Ok(BoundaryPolicy::Neumann),
            Self::Absorbing { amplitude, widths } => {
                let shell = AbsorbingShell::from_widths(shape, amplitude, widths);
                shell.validate(shape)?;
                Ok(BoundaryPolicy::Absorbing(shell))
            },
        }
    }
}

/// Interaction between the impurity and one helium atom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PairPotentialConfig {
    /// Two-column radial table (Bohr, Hartree).
    Table { path: PathBuf },
    /// Exponential repulsion approximating the electron–helium interaction.
    Bubble,
}

impl PairPotentialConfig {
    pub fn load(&self) -> HeResult<PairPotential> {
        match self {
            Self::Table { path } => Ok(PairPotential::Table(RadialTable::load(path)?)),
            Self::Bubble => Ok(PairPotential::Bubble(BubblePotential::electron_like())),
        }
    }
}

/// A second, lighter species coupled to the liquid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImpurityConfig {
    /// Mass (atomic units).
    #[serde(default = "ImpurityConfig::default_mass")]
    pub mass: f64,
    /// Norm the impurity amplitude is held at.
    #[serde(default = "ImpurityConfig::default_norm")]
    pub norm: f64,
    /// Width of the initial Gaussian (Bohr).
    #[serde(default = "ImpurityConfig::default_width")]
    pub width: f64,
    pub potential: PairPotentialConfig,
}

impl ImpurityConfig {
    fn default_mass() -> f64 { 1.0 }

    fn default_norm() -> f64 { 1.0 }

    fn default_width() -> f64 { 14.5 }

    /// An electron with the analytic bubble interaction.
    pub fn electron() -> Self {
        Self {
            mass: Self::default_mass(),
            norm: Self::default_norm(),
            width: Self::default_width(),
            potential: PairPotentialConfig::Bubble,
        }
    }
}

/// Where and how often snapshots are written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "OutputConfig::default_dir")]
    pub dir: PathBuf,
    /// Snapshot interval in iterations; 0 disables snapshots.
    #[serde(default)]
    pub every: usize,
}

impl OutputConfig {
    fn default_dir() -> PathBuf { PathBuf::from(".") }
}

impl Default for OutputConfig {
    fn default() -> Self { Self { dir: Self::default_dir(), every: 0 } }
}

/// Complete, immutable description of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Worker threads; 0 uses every available core.
    #[serde(default)]
    pub threads: usize,
    pub grid: GridConfig,
    pub time: TimeConfig,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub liquid: LiquidConfig,
    #[serde(default)]
    pub boundary: BoundaryConfig,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default)]
    pub impurity: Option<ImpurityConfig>,
    /// Vortex placed in the initial liquid.
    #[serde(default)]
    pub vortex: Option<Vortex>,
    /// Noise added to the initial liquid.
    #[serde(default)]
    pub thermal: Option<ThermalNoise>,
    /// Temperature regime supplying transport parameters to the diagnostics.
    #[serde(default)]
    pub regime: Option<Regime>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub restart: bool,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|err| ConfigError::Toml(err.to_string()))
    }

    /// Read a configuration file: TOML if the extension is `.toml`, the
    /// keyword format otherwise.
    pub fn load<P>(path: P) -> HeResult<Self>
    where P: AsRef<Path>
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Read {
                path: path.display().to_string(), msg: err.to_string() })?;
        let config
            = if path.extension().is_some_and(|ext| ext == "toml") {
                Self::from_toml_str(&text)?
            } else {
                text.parse::<ParamFile>()?.into()
            };
        config.validate()?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check values that cannot be expressed in the types.
    pub fn validate(&self) -> HeResult<()> {
        let shape = self.shape()?;
        let positive = |key: &str, x: f64| {
            (x > 0.0 && x.is_finite()).then_some(())
                .ok_or_else(|| ConfigError::Malformed {
                    key: key.into(), value: x.to_string() })
        };
        positive("time.step", self.time.step)?;
        if let Some(dt) = self.time.impurity_step { positive("time.impurity_step", dt)?; }
        if let Some(rho0) = self.liquid.rho0 { positive("liquid.rho0", rho0)?; }
        if let Some(vc) = self.liquid.velocity_cutoff {
            positive("liquid.velocity_cutoff", vc)?;
        }
        if self.liquid.rho0.is_some() && self.liquid.pressure.is_some() {
            return Err(ConfigError::Inconsistent(
                "set either liquid.rho0 or liquid.pressure, not both".into()).into());
        }
        if self.boundary == BoundaryConfig::Neumann
            && self.liquid.frame_velocity.iter().any(|v| *v != 0.0)
        {
            return Err(ConfigError::Inconsistent(
                "a moving frame requires periodic transforms; \
                neumann boundaries cannot carry one".into()).into());
        }
        if let Some(imp) = &self.impurity {
            positive("impurity.mass", imp.mass)?;
            positive("impurity.norm", imp.norm)?;
            positive("impurity.width", imp.width)?;
        }
        if let Some(vortex) = &self.vortex { vortex.validate(&shape)?; }
        if let Some(noise) = &self.thermal { noise.validate()?; }
        self.boundary.policy(&shape)?;
        Ok(())
    }

    pub fn shape(&self) -> Result<GridShape, AllocationError> {
        GridShape::new(self.grid.nx, self.grid.ny, self.grid.nz, self.grid.step)
    }

    /// Helium time step (atomic units) for iteration `iter`.
    pub fn time_step(&self, iter: usize) -> C64 {
        self.time.mode.time_step(fs_to_au(self.time.step), iter)
    }

    /// Impurity time step (atomic units) for iteration `iter`.
    pub fn impurity_time_step(&self, iter: usize) -> C64 {
        let dt = self.time.impurity_step.unwrap_or(self.time.step);
        self.time.mode.time_step(fs_to_au(dt), iter)
    }

    /// Functional parameters with the configured density (if given
    /// explicitly) and velocity cutoff.
    pub fn ot_parameters(&self) -> OtParameters {
        let mut params = OtParameters::default();
        if let Some(rho0) = self.liquid.rho0 {
            params.rho0 = density_to_au(rho0);
        }
        params.velocity_cutoff = self.liquid.velocity_cutoff.map(mps_to_au);
        params
    }

    /// Bulk density (atomic units): explicit value, else the equilibrium
    /// density at the configured pressure, else the default.
    pub fn resolve_rho0(&self, eos: &BulkEos) -> HeResult<f64> {
        match (self.liquid.rho0, self.liquid.pressure) {
            (Some(rho0), _) => Ok(density_to_au(rho0)),
            (None, Some(p)) => Ok(eos.equilibrium_density(p / AU_BAR)?),
            (None, None) => Ok(OtParameters::default().rho0),
        }
    }

    /// Frame momentum `m v` (atomic units) for particles of mass `mass`.
    pub fn frame_momentum(&self, mass: f64) -> [f64; 3] {
        self.liquid.frame_velocity.map(|v| mass * mps_to_au(v))
    }

    /// Configure the global worker pool. Has no effect if the pool is
    /// already running.
    pub fn apply_threads(&self) {
        match rayon::ThreadPoolBuilder::new().num_threads(self.threads).build_global() {
            Ok(()) => {
                info!("using {} worker threads", rayon::current_num_threads());
            },
            Err(err) => {
                warn!("thread pool already initialized ({err}); keeping {} threads",
                    rayon::current_num_threads());
            },
        }
    }
}

/// Contents of a keyword parameter file, in its own units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParamFile {
    pub threads: usize,
    pub grid: (usize, usize, usize),
    /// Bohr.
    pub gstep: f64,
    /// Helium time step (fs).
    pub timestep: f64,
    /// Impurity time step (fs).
    pub timestep_el: f64,
    pub iter: usize,
    pub itermode: TimeMode,
    pub dump: usize,
    pub model: Model,
    /// Å⁻³.
    pub rho0: f64,
    pub restart: bool,
}

impl ParamFile {
    pub const KEYS: [&'static str; 11] = [
        "threads", "grid", "gstep", "timestep", "timestep_el", "iter",
        "itermode", "dump", "model", "rho0", "restart",
    ];
}

const ASSIGNMENT: &str = r"^\s*([A-Za-z_]+)\s*=\s*(.+?)\s*$";

// values of a parsed parameter file, by key
struct Assignments(HashMap<&'static str, String>);

impl Assignments {
    fn raw(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.0.get(key).map(|s| s.as_str()).ok_or(ConfigError::Missing(key))
    }

    // first whitespace-separated token; trailing text is ignored
    fn get<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where T: std::str::FromStr
    {
        let raw = self.raw(key)?;
        raw.split_whitespace().next()
            .and_then(|tok| tok.parse::<T>().ok())
            .ok_or_else(|| ConfigError::Malformed { key: key.into(), value: raw.into() })
    }

    fn get3(&self, key: &'static str) -> Result<(usize, usize, usize), ConfigError> {
        let raw = self.raw(key)?;
        let malformed = || ConfigError::Malformed { key: key.into(), value: raw.into() };
        let vals: Vec<usize>
            = raw.split_whitespace().take(3)
            .map(|tok| tok.parse::<usize>().map_err(|_| malformed()))
            .collect::<Result<_, _>>()?;
        match vals[..] {
            [a, b, c] => Ok((a, b, c)),
            _ => Err(malformed()),
        }
    }
}

impl std::str::FromStr for ParamFile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = Regex::new(ASSIGNMENT)?;
        let mut map: HashMap<&'static str, String> = HashMap::new();
        for (k, line) in s.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("");
            if line.trim().is_empty() { continue; }
            let caps = pattern.captures(line)
                .ok_or_else(|| ConfigError::Malformed {
                    key: format!("line {}", k + 1), value: line.trim().into() })?;
            let key = &caps[1];
            let key: &'static str = Self::KEYS.iter().copied()
                .find(|known| *known == key)
                .ok_or_else(|| ConfigError::Unknown(key.into()))?;
            if map.insert(key, caps[2].to_string()).is_some() {
                return Err(ConfigError::Malformed {
                    key: key.into(), value: "assigned more than once".into() });
            }
        }
        let a = Assignments(map);
        let itermode = match a.get::<u32>("itermode")? {
            0 => TimeMode::Real,
            1 => TimeMode::Imaginary,
            other => {
                return Err(ConfigError::Malformed {
                    key: "itermode".into(), value: other.to_string() });
            },
        };
        let restart = match a.get::<u32>("restart")? {
            0 => false,
            1 => true,
            other => {
                return Err(ConfigError::Malformed {
                    key: "restart".into(), value: other.to_string() });
            },
        };
        Ok(Self {
            threads: a.get("threads")?,
            grid: a.get3("grid")?,
            gstep: a.get("gstep")?,
            timestep: a.get("timestep")?,
            timestep_el: a.get("timestep_el")?,
            iter: a.get("iter")?,
            itermode,
            dump: a.get("dump")?,
            model: Model::from_bits(a.get("model")?)?,
            rho0: a.get("rho0")?,
            restart,
        })
    }
}

impl From<ParamFile> for Config {
    fn from(p: ParamFile) -> Self {
        let (nx, ny, nz) = p.grid;
        Self {
            threads: p.threads,
            grid: GridConfig { nx, ny, nz, step: p.gstep },
            time: TimeConfig {
                step: p.timestep,
                impurity_step: Some(p.timestep_el),
                iterations: p.iter,
                mode: p.itermode,
            },
            model: p.model,
            liquid: LiquidConfig { rho0: Some(p.rho0), ..LiquidConfig::default() },
            boundary: BoundaryConfig::default(),
            normalization: Normalization::default(),
            impurity: None,
            vortex: None,
            thermal: None,
            regime: None,
            output: OutputConfig { every: p.dump, ..OutputConfig::default() },
            restart: p.restart,
        }
    }
}
