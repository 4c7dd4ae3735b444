//! Dense three-dimensional grids and the handful of primitives the propagation
//! engine needs from them: sampling, reductions, finite differences, Fourier
//! shifts and spectral filtering.
//!
//! Grid point `(i, j, k)` sits at `((i - nx/2) h, (j - ny/2) h, (k - nz/2) h)`
//! for step `h`, so the origin is always an exact grid point.

use std::{ f64::consts::TAU, fmt };
use ndarray::{ self as nd, parallel::prelude::* };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use serde::{ Deserialize, Serialize };
use crate::{
    error::{ AllocationError, ShapeError },
    utils::{ Fft3, wavenumbers },
};

/// Dimensions and spacing of a grid.
///
/// Immutable once constructed; a different topology means a different grid.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridShape {
    nx: usize,
    ny: usize,
    nz: usize,
    step: f64,
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{} (step {})", self.nx, self.ny, self.nz, self.step)
    }
}

impl GridShape {
    /// Validate and create a new shape.
    pub fn new(nx: usize, ny: usize, nz: usize, step: f64)
        -> Result<Self, AllocationError>
    {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(AllocationError::ZeroDimension(nx, ny, nz));
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(AllocationError::BadStep(step));
        }
        nx.checked_mul(ny)
            .and_then(|nxy| nxy.checked_mul(nz))
            .and_then(|n| n.checked_mul(std::mem::size_of::<C64>()))
            .ok_or(AllocationError::Overflow(nx, ny, nz))?;
        Ok(Self { nx, ny, nz, step })
    }

    pub fn nx(&self) -> usize { self.nx }

    pub fn ny(&self) -> usize { self.ny }

    pub fn nz(&self) -> usize { self.nz }

    pub fn step(&self) -> f64 { self.step }

    pub fn dims(&self) -> (usize, usize, usize) { (self.nx, self.ny, self.nz) }

    /// Number of points along `axis`.
    pub fn n(&self, axis: usize) -> usize {
        match axis {
            0 => self.nx,
            1 => self.ny,
            _ => self.nz,
        }
    }

    /// Total number of grid points.
    pub fn len(&self) -> usize { self.nx * self.ny * self.nz }

    /// Always `false`; zero-sized grids cannot be constructed.
    pub fn is_empty(&self) -> bool { false }

    /// Volume element `h³`.
    pub fn dv(&self) -> f64 { self.step.powi(3) }

    /// Index of the origin.
    pub fn center(&self) -> [usize; 3] { [self.nx / 2, self.ny / 2, self.nz / 2] }

    /// Coordinate of index `i` along `axis`.
    pub fn coord(&self, axis: usize, i: usize) -> f64 {
        (i as f64 - (self.n(axis) / 2) as f64) * self.step
    }

    /// Cartesian position of a grid point.
    pub fn position(&self, (i, j, k): (usize, usize, usize)) -> [f64; 3] {
        [self.coord(0, i), self.coord(1, j), self.coord(2, k)]
    }
}

/// Boundary condition applied to finite differences and to the kinetic
/// propagator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    #[default]
    Periodic,
    /// Zero normal derivative at the box faces.
    Neumann,
}

impl Boundary {
    // neighbor indices of `i` along an axis of length `n`
    fn neighbors(&self, i: usize, n: usize) -> (usize, usize) {
        match self {
            Self::Periodic => ((i + n - 1) % n, (i + 1) % n),
            Self::Neumann => (i.saturating_sub(1), (i + 1).min(n - 1)),
        }
    }
}

/// Anything that can be sampled at a point `(x, y, z)` to fill a grid.
pub trait GridFunction<A>: Sync {
    fn eval(&self, x: f64, y: f64, z: f64) -> A;
}

impl<A, F> GridFunction<A> for F
where F: Fn(f64, f64, f64) -> A + Sync
{
    fn eval(&self, x: f64, y: f64, z: f64) -> A { self(x, y, z) }
}

/// A multiplicative gain applied in wavevector space by [`fft_filter`].
pub trait SpectralFilter: Sync {
    fn gain(&self, kx: f64, ky: f64, kz: f64) -> C64;
}

/// Translation by a fixed displacement, applied as the phase `exp(-i k·d)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Translation(pub [f64; 3]);

impl SpectralFilter for Translation {
    fn gain(&self, kx: f64, ky: f64, kz: f64) -> C64 {
        let [dx, dy, dz] = self.0;
        C64::cis(-(kx * dx + ky * dy + kz * dz))
    }
}

/// Sharp low-pass filter removing all wavevectors with `|k| > cutoff`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HighCut(pub f64);

impl SpectralFilter for HighCut {
    fn gain(&self, kx: f64, ky: f64, kz: f64) -> C64 {
        let k2 = kx * kx + ky * ky + kz * kz;
        if k2 > self.0 * self.0 { C64::zero() } else { C64::new(1.0, 0.0) }
    }
}

/// Element types storable in a [`Grid`] and usable in finite differences.
pub trait GridElem:
    Copy
    + Send
    + Sync
    + Zero
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<f64, Output = Self>
{ }

impl GridElem for f64 { }
impl GridElem for C64 { }

/// A dense three-dimensional grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<A> {
    data: nd::Array3<A>,
    shape: GridShape,
    boundary: Boundary,
    momentum: [f64; 3],
}

/// Real-valued grid.
pub type RGrid = Grid<f64>;

/// Complex-valued grid.
pub type CGrid = Grid<C64>;

impl<A: GridElem> Grid<A> {
    /// Allocate a zero-filled grid.
    pub fn zeros(shape: &GridShape) -> Self {
        Self {
            data: nd::Array3::zeros(shape.dims()),
            shape: *shape,
            boundary: Boundary::Periodic,
            momentum: [0.0; 3],
        }
    }

    /// Allocate a grid by sampling `f` at every grid point.
    pub fn from_fn<F>(shape: &GridShape, f: &F) -> Self
    where F: GridFunction<A> + ?Sized
    {
        let mut grid = Self::zeros(shape);
        grid.map_fn(f);
        grid
    }

    /// Wrap an existing array, which must have the dimensions of `shape`.
    pub fn from_array(shape: &GridShape, data: nd::Array3<A>)
        -> Result<Self, ShapeError>
    {
        let (nx, ny, nz) = data.dim();
        let got = GridShape { nx, ny, nz, step: shape.step };
        ShapeError::check(shape, &got)?;
        Ok(Self {
            data,
            shape: *shape,
            boundary: Boundary::Periodic,
            momentum: [0.0; 3],
        })
    }

    /// Overwrite every point with samples of `f`.
    pub fn map_fn<F>(&mut self, f: &F)
    where F: GridFunction<A> + ?Sized
    {
        let shape = self.shape;
        nd::Zip::indexed(&mut self.data)
            .par_for_each(|idx, v| {
                let [x, y, z] = shape.position(idx);
                *v = f.eval(x, y, z);
            });
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn shape(&self) -> &GridShape { &self.shape }

    pub fn boundary(&self) -> Boundary { self.boundary }

    pub fn set_boundary(&mut self, boundary: Boundary) { self.boundary = boundary; }

    /// Frame momentum `k₀` (atomic units).
    pub fn momentum(&self) -> [f64; 3] { self.momentum }

    pub fn set_momentum(&mut self, momentum: [f64; 3]) { self.momentum = momentum; }

    pub fn data(&self) -> &nd::Array3<A> { &self.data }

    pub fn data_mut(&mut self) -> &mut nd::Array3<A> { &mut self.data }

    pub fn into_data(self) -> nd::Array3<A> { self.data }

    /// Value at a grid index.
    pub fn at(&self, idx: [usize; 3]) -> A { self.data[idx] }

    /// Fill with a constant.
    pub fn fill(&mut self, a: A) { self.data.fill(a); }

    /// Copy values from another grid of the same shape.
    pub fn assign(&mut self, other: &Self) -> Result<(), ShapeError> {
        ShapeError::check(&self.shape, &other.shape)?;
        self.data.assign(&other.data);
        Ok(())
    }

    /// Multiply every point by a real constant.
    pub fn scale(&mut self, c: f64) {
        self.data.par_map_inplace(|v| { *v = *v * c; });
    }

    /// Central-difference derivative along `axis`, written to `out`.
    ///
    /// Neighbors wrap for periodic grids and are clamped at the faces for
    /// Neumann grids.
    pub fn gradient(&self, axis: usize, out: &mut Self) -> Result<(), ShapeError> {
        ShapeError::check(&self.shape, &out.shape)?;
        let n = self.shape.n(axis);
        let inv2h = 0.5 / self.shape.step();
        let bc = self.boundary;
        let src = &self.data;
        nd::Zip::indexed(&mut out.data)
            .par_for_each(|(i, j, k), o| {
                let mut lo = [i, j, k];
                let mut hi = [i, j, k];
                let (m, p) = bc.neighbors(lo[axis], n);
                lo[axis] = m;
                hi[axis] = p;
                *o = (src[hi] - src[lo]) * inv2h;
            });
        Ok(())
    }

    /// `true` if any element is NaN or infinite.
    pub fn has_nan_or_inf(&self) -> bool
    where A: FiniteCheck
    {
        self.data.par_iter().any(|v| !v.is_finite_elem())
    }
}

/// Elementwise finiteness test.
pub trait FiniteCheck {
    fn is_finite_elem(&self) -> bool;
}

impl FiniteCheck for f64 {
    fn is_finite_elem(&self) -> bool { self.is_finite() }
}

impl FiniteCheck for C64 {
    fn is_finite_elem(&self) -> bool { self.is_finite() }
}

impl RGrid {
    /// Plain sum of all values.
    pub fn sum(&self) -> f64 { self.data.par_iter().sum() }

    /// Integral over the box, `Σ f h³`.
    pub fn integral(&self) -> f64 { self.sum() * self.shape.dv() }

    /// Maximum value.
    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// First moments `∫ x f / ∫ f`; `None` if `∫ f` vanishes.
    pub fn centroid(&self) -> Option<[f64; 3]> {
        let total = self.sum();
        (total.abs() > f64::MIN_POSITIVE).then(|| {
            let mut m = [0.0; 3];
            for (idx, v) in self.data.indexed_iter() {
                let r = self.shape.position(idx);
                m.iter_mut().zip(r).for_each(|(mk, rk)| { *mk += rk * v; });
            }
            m.map(|mk| mk / total)
        })
    }

    /// Divergence of the vector field `(fx, fy, fz)` using this grid's
    /// boundary, written into `self`.
    pub fn divergence(&mut self, field: [&RGrid; 3], work: &mut RGrid)
        -> Result<(), ShapeError>
    {
        self.fill(0.0);
        for (axis, f) in field.into_iter().enumerate() {
            let mut fc = f.clone();
            fc.set_boundary(self.boundary);
            fc.gradient(axis, work)?;
            nd::Zip::from(&mut self.data).and(&work.data)
                .par_for_each(|d, w| { *d += *w; });
        }
        Ok(())
    }

    /// Promote to a complex grid with zero imaginary part.
    pub fn to_complex(&self) -> CGrid {
        CGrid {
            data: self.data.mapv(C64::from),
            shape: self.shape,
            boundary: self.boundary,
            momentum: self.momentum,
        }
    }
}

impl CGrid {
    /// Integral over the box, `Σ f h³`.
    pub fn integral(&self) -> C64 {
        self.data.par_iter().copied().reduce(C64::zero, |a, b| a + b)
            * self.shape.dv()
    }

    /// `|ψ|²` written into `out`.
    pub fn density(&self, out: &mut RGrid) -> Result<(), ShapeError> {
        ShapeError::check(&self.shape, &out.shape)?;
        nd::Zip::from(&mut out.data).and(&self.data)
            .par_for_each(|r, p| { *r = p.norm_sqr(); });
        Ok(())
    }

    /// `∫ |ψ|²`.
    pub fn norm(&self) -> f64 {
        self.data.par_iter().map(|p| p.norm_sqr()).sum::<f64>() * self.shape.dv()
    }

    /// Probability flux along `axis` for particles of mass `mass`,
    /// `(Im(ψ* ∂ψ) - k₀ |ψ|²) / m`.
    pub fn flux(&self, mass: f64, axis: usize, work: &mut CGrid, out: &mut RGrid)
        -> Result<(), ShapeError>
    {
        ShapeError::check(&self.shape, &out.shape)?;
        self.gradient(axis, work)?;
        let k0 = self.momentum[axis];
        nd::Zip::from(&mut out.data).and(&self.data).and(&work.data)
            .par_for_each(|j, p, dp| {
                *j = ((p.conj() * dp).im - k0 * p.norm_sqr()) / mass;
            });
        Ok(())
    }

    /// Real part.
    pub fn real(&self, out: &mut RGrid) -> Result<(), ShapeError> {
        ShapeError::check(&self.shape, &out.shape)?;
        nd::Zip::from(&mut out.data).and(&self.data)
            .par_for_each(|r, c| { *r = c.re; });
        Ok(())
    }
}

/// Apply `filter` to `grid` in wavevector space.
///
/// *Panics if `fft` was planned for a different shape.*
pub fn fft_filter<F>(grid: &mut CGrid, filter: &F, fft: &Fft3)
where F: SpectralFilter + ?Sized
{
    let shape = grid.shape;
    let kx = wavenumbers(shape.nx(), shape.step());
    let ky = wavenumbers(shape.ny(), shape.step());
    let kz = wavenumbers(shape.nz(), shape.step());
    fft.forward(&mut grid.data);
    nd::Zip::indexed(&mut grid.data)
        .par_for_each(|(i, j, k), v| {
            *v *= filter.gain(kx[i], ky[j], kz[k]);
        });
    fft.inverse(&mut grid.data);
}

/// Translate the contents of `grid` by `d` (periodic images wrap around).
pub fn fourier_shift(grid: &mut CGrid, d: [f64; 3], fft: &Fft3) {
    fft_filter(grid, &Translation(d), fft);
}

/// Phase `exp(2πi m c / n)` for frequency index `m` of an `n`-point axis whose
/// origin sits at index `c`.
pub(crate) fn origin_phase(m: usize, n: usize) -> C64 {
    C64::cis(TAU * (m * (n / 2)) as f64 / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn shape() -> GridShape { GridShape::new(16, 16, 16, 0.5).unwrap() }

    #[test]
    fn shape_validation() {
        assert!(matches!(
            GridShape::new(0, 4, 4, 1.0),
            Err(AllocationError::ZeroDimension(0, 4, 4))
        ));
        assert!(matches!(
            GridShape::new(4, 4, 4, -1.0),
            Err(AllocationError::BadStep(_))
        ));
        assert!(matches!(
            GridShape::new(usize::MAX, 4, 4, 1.0),
            Err(AllocationError::Overflow(..))
        ));
        let s = GridShape::new(8, 6, 4, 0.25).unwrap();
        assert_eq!(s.center(), [4, 3, 2]);
        assert_eq!(s.position((4, 3, 2)), [0.0, 0.0, 0.0]);
        assert_eq!(s.coord(0, 0), -1.0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let a = RGrid::zeros(&shape());
        let mut b = RGrid::zeros(&GridShape::new(8, 8, 8, 0.5).unwrap());
        assert!(b.assign(&a).is_err());
        assert!(a.gradient(0, &mut b).is_err());
    }

    #[test]
    fn gradient_of_periodic_sine() {
        let s = GridShape::new(64, 4, 4, 0.1).unwrap();
        let len = 64.0 * 0.1;
        let q = TAU / len;
        let f = RGrid::from_fn(&s, &|x: f64, _: f64, _: f64| (q * x).sin());
        let mut df = RGrid::zeros(&s);
        f.gradient(0, &mut df).unwrap();
        for (idx, v) in df.data().indexed_iter() {
            let x = s.position(idx)[0];
            assert_abs_diff_eq!(*v, q * (q * x).cos(), epsilon = 2e-2);
        }
    }

    #[test]
    fn neumann_gradient_vanishes_on_constant() {
        let s = shape();
        let f = RGrid::from_fn(&s, &|_: f64, _: f64, _: f64| 3.0)
            .with_boundary(Boundary::Neumann);
        let mut df = RGrid::zeros(&s);
        f.gradient(2, &mut df).unwrap();
        assert!(df.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn fourier_shift_moves_gaussian() {
        let s = shape();
        let fft = Fft3::new(s.dims());
        let mut g = CGrid::from_fn(&s, &|x: f64, y: f64, z: f64| {
            C64::from((-(x * x + y * y + z * z)).exp())
        });
        fourier_shift(&mut g, [1.0, 0.0, -0.5], &fft);
        let mut rho = RGrid::zeros(&s);
        g.density(&mut rho).unwrap();
        let c = rho.centroid().unwrap();
        assert_abs_diff_eq!(c[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c[2], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn high_cut_removes_short_wavelengths() {
        let s = GridShape::new(32, 2, 2, 0.5).unwrap();
        let fft = Fft3::new(s.dims());
        let q_lo = TAU / 16.0;
        let q_hi = 8.0 * q_lo;
        let mut g = CGrid::from_fn(&s, &|x: f64, _: f64, _: f64| {
            C64::from((q_lo * x).cos() + (q_hi * x).cos())
        });
        fft_filter(&mut g, &HighCut(2.0 * q_lo), &fft);
        for (idx, v) in g.data().indexed_iter() {
            let x = s.position(idx)[0];
            assert_abs_diff_eq!(v.re, (q_lo * x).cos(), epsilon = 1e-10);
        }
    }

    #[test]
    fn norm_and_flux_of_plane_wave() {
        let s = GridShape::new(32, 4, 4, 0.25).unwrap();
        let q = TAU / (32.0 * 0.25);
        let psi = CGrid::from_fn(&s, &|x: f64, _: f64, _: f64| C64::cis(q * x));
        let volume = s.len() as f64 * s.dv();
        assert_abs_diff_eq!(psi.norm(), volume, epsilon = 1e-10);
        let mut work = CGrid::zeros(&s);
        let mut j = RGrid::zeros(&s);
        psi.flux(2.0, 0, &mut work, &mut j).unwrap();
        // central differences see sin(q h) / h instead of q
        let expected = (q * 0.25).sin() / 0.25 / 2.0;
        assert!(j.data().iter().all(|v| (v - expected).abs() < 1e-12));
    }
}
