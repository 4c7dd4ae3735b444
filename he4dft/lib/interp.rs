//! Spherically symmetric external potentials, either tabulated or analytic,
//! and their sampling onto 3-D grids.
//!
//! Tables are plain two-column text (`r V(r)`, both in atomic units) and are
//! evaluated with a local four-point Lagrange polynomial.
//!
//! ```
//! use he4dft::interp::{ RadialFunction, RadialTable };
//!
//! let text = "0 0\n1 1\n2 4\n3 9\n4 16\n";
//! let table: RadialTable = text.parse().unwrap();
//! assert!((table.value(2.5) - 6.25).abs() < 1e-12);
//! ```

use std::{ path::Path, str::FromStr };
use ndarray as nd;
use tracing::info;
use crate::{
    error::{ ConfigError, HeResult, LengthError },
    grid::{ GridShape, RGrid },
    units::{ AU_ANG, kelvin_to_au },
};

/// Value of the Lagrange polynomial through `(xs, ys)` at `x`.
///
/// `xs` must not repeat.
pub fn lagrange(xs: &[f64], ys: &[f64], x: f64) -> Result<f64, LengthError> {
    LengthError::check(xs, ys)?;
    Ok(lagrange_unchecked(xs, ys, x))
}

/// Derivative of the Lagrange polynomial through `(xs, ys)` at `x`.
pub fn dlagrange(xs: &[f64], ys: &[f64], x: f64) -> Result<f64, LengthError> {
    LengthError::check(xs, ys)?;
    Ok(dlagrange_unchecked(xs, ys, x))
}

fn lagrange_unchecked(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    xs.iter().zip(ys).enumerate()
        .map(|(j, (xj, yj))| {
            let inner: f64
                = xs.iter().enumerate()
                .filter(|(m, _)| *m != j)
                .map(|(_, xm)| (x - xm) / (xj - xm))
                .product();
            yj * inner
        })
        .sum()
}

fn dlagrange_unchecked(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    xs.iter().zip(ys).enumerate()
        .map(|(j, (xj, yj))| {
            let inner: f64
                = xs.iter().enumerate()
                .filter(|(i, _)| *i != j)
                .map(|(i, xi)| {
                    let p: f64
                        = xs.iter().enumerate()
                        .filter(|(m, _)| *m != j && *m != i)
                        .map(|(_, xm)| (x - xm) / (xj - xm))
                        .product();
                    p / (xj - xi)
                })
                .sum();
            yj * inner
        })
        .sum()
}

/// A function of the distance from some centre.
pub trait RadialFunction: Sync {
    fn value(&self, r: f64) -> f64;

    /// Radial derivative `dV/dr`.
    fn derivative(&self, r: f64) -> f64;

    /// Sample `∂V/∂x_axis` onto `shape`, centred at `center`.
    fn gradient_to_grid(&self, shape: &GridShape, center: [f64; 3], axis: usize)
        -> RGrid
    {
        let [cx, cy, cz] = center;
        RGrid::from_fn(shape, &|x: f64, y: f64, z: f64| {
            let d = [x - cx, y - cy, z - cz];
            let r = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
            if r == 0.0 { 0.0 } else { d[axis] / r * self.derivative(r) }
        })
    }

    /// Sample onto `shape` centred at `center`.
    fn to_grid(&self, shape: &GridShape, center: [f64; 3]) -> RGrid {
        let [cx, cy, cz] = center;
        RGrid::from_fn(shape, &|x: f64, y: f64, z: f64| {
            self.value(((x - cx).powi(2) + (y - cy).powi(2) + (z - cz).powi(2)).sqrt())
        })
    }

    /// Like [`to_grid`][Self::to_grid], but each grid value is the average of
    /// `sub`³ samples spread over its cell. Useful for steep repulsive cores
    /// that a single sample per point would alias.
    fn to_grid_smoothed(&self, shape: &GridShape, center: [f64; 3], sub: usize)
        -> RGrid
    {
        if sub <= 1 { return self.to_grid(shape, center); }
        let h = shape.step();
        let offsets: Vec<f64>
            = (0..sub)
            .map(|s| ((s as f64 + 0.5) / sub as f64 - 0.5) * h)
            .collect();
        let count = (sub * sub * sub) as f64;
        let [cx, cy, cz] = center;
        RGrid::from_fn(shape, &|x: f64, y: f64, z: f64| {
            let mut acc = 0.0;
            for dx in offsets.iter() {
                for dy in offsets.iter() {
                    for dz in offsets.iter() {
                        let r = ((x + dx - cx).powi(2)
                            + (y + dy - cy).powi(2)
                            + (z + dz - cz).powi(2)).sqrt();
                        acc += self.value(r);
                    }
                }
            }
            acc / count
        })
    }
}

/// Tabulated radial potential.
///
/// Queries below the first or above the last tabulated radius are clamped to
/// the end values.
#[derive(Clone, Debug, PartialEq)]
pub struct RadialTable {
    r: Vec<f64>,
    v: Vec<f64>,
}

impl RadialTable {
    /// Number of points used by the interpolating polynomial.
    pub const ORDER: usize = 4;

    /// Build from sample columns. Radii must be strictly increasing and at
    /// least [`ORDER`][Self::ORDER] points are required.
    pub fn new(r: Vec<f64>, v: Vec<f64>) -> Result<Self, ConfigError> {
        let bad = |value: String| ConfigError::Malformed {
            key: "radial table".into(), value };
        if r.len() != v.len() {
            return Err(bad(format!("{} radii but {} values", r.len(), v.len())));
        }
        if r.len() < Self::ORDER {
            return Err(bad(format!("{} points; need at least {}", r.len(), Self::ORDER)));
        }
        if r.iter().chain(v.iter()).any(|x| !x.is_finite()) {
            return Err(bad("non-finite entry".into()));
        }
        if r.windows(2).any(|w| w[1] <= w[0]) {
            return Err(bad("radii are not strictly increasing".into()));
        }
        Ok(Self { r, v })
    }

    /// Read a two-column text file.
    pub fn load<P>(path: P) -> HeResult<Self>
    where P: AsRef<Path>
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Read {
                path: path.display().to_string(), msg: err.to_string() })?;
        let table: Self = text.parse()?;
        info!(
            "read radial table {} ({} points, r in [{}, {}])",
            path.display(), table.r.len(), table.r[0], table.r[table.r.len() - 1],
        );
        Ok(table)
    }

    pub fn radii(&self) -> &[f64] { &self.r }

    pub fn values(&self) -> &[f64] { &self.v }

    // first index of the interpolation window for `r`
    fn window(&self, r: f64) -> usize {
        let i = self.r.partition_point(|rk| *rk <= r);
        i.saturating_sub(Self::ORDER / 2).min(self.r.len() - Self::ORDER)
    }
}

// windows are always ORDER points of the equal-length columns checked in `new`
impl RadialFunction for RadialTable {
    fn value(&self, r: f64) -> f64 {
        let n = self.r.len();
        let r = r.clamp(self.r[0], self.r[n - 1]);
        let w = self.window(r);
        lagrange_unchecked(&self.r[w..w + Self::ORDER], &self.v[w..w + Self::ORDER], r)
    }

    /// Zero outside the tabulated range.
    fn derivative(&self, r: f64) -> f64 {
        let n = self.r.len();
        if r < self.r[0] || r > self.r[n - 1] { return 0.0; }
        let w = self.window(r);
        dlagrange_unchecked(&self.r[w..w + Self::ORDER], &self.v[w..w + Self::ORDER], r)
    }
}

impl FromStr for RadialTable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut r: Vec<f64> = Vec::new();
        let mut v: Vec<f64> = Vec::new();
        for (k, line) in s.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() { continue; }
            let malformed = || ConfigError::Malformed {
                key: format!("radial table line {}", k + 1),
                value: line.to_string(),
            };
            let mut cols = line.split_whitespace()
                .map(|c| c.parse::<f64>().map_err(|_| malformed()));
            match (cols.next(), cols.next()) {
                (Some(rk), Some(vk)) => { r.push(rk?); v.push(vk?); },
                _ => { return Err(malformed()); },
            }
        }
        Self::new(r, v)
    }
}

/// Exponential-repulsion model of a bubble-forming impurity:
/// ```text
/// V(r) = A₀ exp(-A₁ r') - A₂/r'⁴ - A₃/r'⁶ - A₄/r'⁸ - A₅/r'¹⁰,
/// r' = max(r - r_add, r_min)
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BubblePotential {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub a4: f64,
    pub a5: f64,
    pub rmin: f64,
    pub radd: f64,
}

impl Default for BubblePotential {
    fn default() -> Self { Self::electron_like() }
}

impl BubblePotential {
    /// Pure exponential repulsion approximating the electron bubble.
    pub fn electron_like() -> Self {
        Self {
            a0: kelvin_to_au(3.8003e5),
            a1: 1.6245 * AU_ANG,
            a2: 0.0,
            a3: 0.0,
            a4: 0.0,
            a5: 0.0,
            rmin: 2.0,
            radd: 6.0,
        }
    }
}

impl RadialFunction for BubblePotential {
    fn value(&self, r: f64) -> f64 {
        let r = (r - self.radd).max(self.rmin);
        let r2 = r * r;
        let r4 = r2 * r2;
        self.a0 * (-self.a1 * r).exp()
            - self.a2 / r4
            - self.a3 / (r4 * r2)
            - self.a4 / (r4 * r4)
            - self.a5 / (r4 * r4 * r2)
    }

    /// Zero where the inner clamp applies.
    fn derivative(&self, r: f64) -> f64 {
        let rp = r - self.radd;
        if rp < self.rmin { return 0.0; }
        let r2 = rp * rp;
        let r5 = r2 * r2 * rp;
        -self.a0 * self.a1 * (-self.a1 * rp).exp()
            + 4.0 * self.a2 / r5
            + 6.0 * self.a3 / (r5 * r2)
            + 8.0 * self.a4 / (r5 * r2 * r2)
            + 10.0 * self.a5 / (r5 * r2 * r2 * r2)
    }
}

/// Impurity–helium pair interaction, tabulated or analytic.
#[derive(Clone, Debug, PartialEq)]
pub enum PairPotential {
    Table(RadialTable),
    Bubble(BubblePotential),
}

impl RadialFunction for PairPotential {
    fn value(&self, r: f64) -> f64 {
        match self {
            Self::Table(table) => table.value(r),
            Self::Bubble(bubble) => bubble.value(r),
        }
    }

    fn derivative(&self, r: f64) -> f64 {
        match self {
            Self::Table(table) => table.derivative(r),
            Self::Bubble(bubble) => bubble.derivative(r),
        }
    }
}

/// Values of a sampled grid along the `axis` line through the grid origin.
pub fn radial_profile(grid: &RGrid, axis: usize) -> nd::Array1<f64> {
    let [ci, cj, ck] = grid.shape().center();
    match axis {
        0 => grid.data().slice(nd::s![.., cj, ck]).to_owned(),
        1 => grid.data().slice(nd::s![ci, .., ck]).to_owned(),
        _ => grid.data().slice(nd::s![ci, cj, ..]).to_owned(),
    }
}
