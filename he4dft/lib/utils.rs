//! Miscellaneous tools: FFT plans over three-dimensional arrays and the
//! accompanying frequency-space coordinates.

use std::{ f64::consts::TAU, sync::Arc };
use ndarray::{ self as nd, Ix3 };
use num_complex::Complex64 as C64;
use rustfft as fft;

/// Generate an array of frequency-space coordinates to accompany a FFT of `n`
/// points for sampling interval `dx`.
pub fn fft_freq(n: usize, dx: f64) -> nd::Array1<f64> {
    let m = if n % 2 == 0 { n / 2 } else { (n + 1) / 2 };
    (0..n)
        .map(|i| {
            if i < m {
                i as f64 / (n as f64 * dx)
            } else {
                -((n - i) as f64) / (n as f64 * dx)
            }
        })
        .collect()
}

/// Angular wavenumbers (`2π` times [`fft_freq`]) for `n` points spaced by
/// `dx`.
pub fn wavenumbers(n: usize, dx: f64) -> nd::Array1<f64> {
    fft_freq(n, dx).mapv(|f| TAU * f)
}

/// Forward and inverse complex-to-complex transform plans for a fixed
/// three-dimensional array shape.
///
/// Transforms are applied one axis at a time; the lanes along each axis are
/// processed in parallel. The inverse transform is normalized, so that
/// `inverse(forward(x)) == x` up to round-off.
#[derive(Clone)]
pub struct Fft3 {
    dims: (usize, usize, usize),
    forward: [Arc<dyn fft::Fft<f64>>; 3],
    inverse: [Arc<dyn fft::Fft<f64>>; 3],
}

impl std::fmt::Debug for Fft3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft3").field("dims", &self.dims).finish()
    }
}

impl Fft3 {
    /// Plan transforms for arrays of shape `dims`.
    pub fn new(dims: (usize, usize, usize)) -> Self {
        let mut planner = fft::FftPlanner::new();
        let (nx, ny, nz) = dims;
        let forward = [
            planner.plan_fft_forward(nx),
            planner.plan_fft_forward(ny),
            planner.plan_fft_forward(nz),
        ];
        let inverse = [
            planner.plan_fft_inverse(nx),
            planner.plan_fft_inverse(ny),
            planner.plan_fft_inverse(nz),
        ];
        Self { dims, forward, inverse }
    }

    /// Array shape these plans were made for.
    pub fn dims(&self) -> (usize, usize, usize) { self.dims }

    fn process<S>(plans: &[Arc<dyn fft::Fft<f64>>; 3], x: &mut nd::ArrayBase<S, Ix3>)
    where S: nd::DataMut<Elem = C64>
    {
        for (axis, plan) in plans.iter().enumerate() {
            if plan.len() < 2 { continue; }
            nd::Zip::from(x.lanes_mut(nd::Axis(axis)))
                .par_for_each(|mut lane| {
                    if let Some(buf) = lane.as_slice_mut() {
                        plan.process(buf);
                    } else {
                        let mut buf: Vec<C64> = lane.iter().copied().collect();
                        plan.process(&mut buf);
                        lane.iter_mut().zip(buf)
                            .for_each(|(xk, bk)| { *xk = bk; });
                    }
                });
        }
    }

    /// Perform the forward transform in place.
    ///
    /// *Panics if `x` does not have the planned shape.*
    pub fn forward<S>(&self, x: &mut nd::ArrayBase<S, Ix3>)
    where S: nd::DataMut<Elem = C64>
    {
        assert_eq!(x.dim(), self.dims, "Fft3::forward: shape mismatch");
        Self::process(&self.forward, x);
    }

    /// Perform the normalized inverse transform in place.
    ///
    /// *Panics if `x` does not have the planned shape.*
    pub fn inverse<S>(&self, x: &mut nd::ArrayBase<S, Ix3>)
    where S: nd::DataMut<Elem = C64>
    {
        assert_eq!(x.dim(), self.dims, "Fft3::inverse: shape mismatch");
        Self::process(&self.inverse, x);
        let n = (self.dims.0 * self.dims.1 * self.dims.2) as f64;
        x.par_map_inplace(|xk| { *xk /= n; });
    }
}
