//! Spectral evaluation of `(f * g)(r) = ∫ f(r') g(r - r') dr'` for pairs of
//! real grids.
//!
//! Operand spectra are cached between calls: a static kernel is transformed
//! once and every later evaluation only transforms the density it is combined
//! with. Each cached spectrum remembers the [`GridShape`] it was computed on,
//! and any attempt to combine spectra with a grid of a different topology is
//! rejected instead of silently producing garbage.

use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::debug;
use crate::{
    error::ConvolutionError,
    grid::{ GridShape, RGrid, origin_phase },
    utils::Fft3,
};

#[derive(Clone, Debug)]
struct Spectrum {
    shape: GridShape,
    data: nd::Array3<C64>,
}

/// Two-slot convolution evaluator with cached operand spectra.
#[derive(Clone, Debug)]
pub struct Convolution {
    fft: Fft3,
    slots: [Option<Spectrum>; 2],
}

impl Convolution {
    /// Create an evaluator with both slots empty.
    pub fn new(shape: &GridShape) -> Self {
        Self { fft: Fft3::new(shape.dims()), slots: [None, None] }
    }

    /// Create an evaluator with `kernel` already prepared in the first slot.
    pub fn with_kernel(kernel: &RGrid) -> Self {
        let mut conv = Self::new(kernel.shape());
        conv.prepare(Some(kernel), None);
        conv
    }

    fn transform(&mut self, grid: &RGrid) -> Spectrum {
        if self.fft.dims() != grid.shape().dims() {
            debug!("replanning convolution transforms for {}", grid.shape());
            self.fft = Fft3::new(grid.shape().dims());
        }
        let mut data = grid.data().mapv(C64::from);
        self.fft.forward(&mut data);
        Spectrum { shape: *grid.shape(), data }
    }

    /// Transform the supplied operands into their slots. `None` keeps whatever
    /// is currently cached in that slot.
    pub fn prepare(&mut self, first: Option<&RGrid>, second: Option<&RGrid>) {
        if let Some(f) = first {
            self.slots[0] = Some(self.transform(f));
        }
        if let Some(g) = second {
            self.slots[1] = Some(self.transform(g));
        }
    }

    /// `true` if slot `slot` holds a spectrum.
    pub fn is_prepared(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.is_some())
    }

    /// Drop both cached spectra.
    pub fn invalidate(&mut self) {
        self.slots = [None, None];
    }

    /// Combine the cached spectra and write the real-space convolution to
    /// `out`.
    ///
    /// The result is sampled on the same centred coordinates as the operands:
    /// a kernel centred on the origin convolved with a density yields a field
    /// aligned with that density.
    pub fn evaluate(&self, out: &mut RGrid) -> Result<(), ConvolutionError> {
        let a = self.slots[0].as_ref().ok_or(ConvolutionError::Unprepared(0))?;
        let b = self.slots[1].as_ref().ok_or(ConvolutionError::Unprepared(1))?;
        if a.shape != b.shape {
            return Err(ConvolutionError::Stale { cached: a.shape, requested: b.shape });
        }
        if a.shape != *out.shape() {
            return Err(ConvolutionError::Stale { cached: a.shape, requested: *out.shape() });
        }
        let (nx, ny, nz) = a.shape.dims();
        let mut prod: nd::Array3<C64> = nd::Array3::zeros((nx, ny, nz));
        nd::Zip::indexed(&mut prod).and(&a.data).and(&b.data)
            .par_for_each(|(i, j, k), p, fa, fb| {
                *p = fa * fb
                    * origin_phase(i, nx)
                    * origin_phase(j, ny)
                    * origin_phase(k, nz);
            });
        self.fft.inverse(&mut prod);
        let dv = a.shape.dv();
        nd::Zip::from(out.data_mut()).and(&prod)
            .par_for_each(|o, p| { *o = p.re * dv; });
        Ok(())
    }

    /// Re-prepare the second slot with `density` and evaluate against the
    /// cached first slot.
    pub fn convolve(&mut self, density: &RGrid, out: &mut RGrid)
        -> Result<(), ConvolutionError>
    {
        if !self.is_prepared(0) {
            return Err(ConvolutionError::Unprepared(0));
        }
        self.prepare(None, Some(density));
        self.evaluate(out)
    }
}
