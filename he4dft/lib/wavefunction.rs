//! A propagated amplitude field together with the scratch copy the
//! predictor–corrector integrator writes its prediction into.

use crate::{
    error::{ HeResult, ShapeError },
    grid::{ Boundary, CGrid, RGrid },
};

/// Amplitude of one species.
///
/// `current` is the state of record. `future` belongs to the integrator: it is
/// written by the predict phase and read by the correct phase, and nothing
/// else modifies it.
#[derive(Clone, Debug)]
pub struct Wavefunction {
    current: CGrid,
    future: CGrid,
    mass: f64,
    norm_target: Option<f64>,
    pub(crate) predicted: bool,
}

impl Wavefunction {
    /// Wrap an initial amplitude for particles of mass `mass`.
    pub fn new(psi: CGrid, mass: f64) -> Self {
        let future = psi.clone();
        Self { current: psi, future, mass, norm_target: None, predicted: false }
    }

    /// Set the norm this species is returned to by
    /// [`renormalize`][crate::policy::renormalize].
    pub fn with_norm_target(mut self, norm: f64) -> Self {
        self.norm_target = Some(norm);
        self
    }

    pub fn current(&self) -> &CGrid { &self.current }

    pub(crate) fn current_mut(&mut self) -> &mut CGrid { &mut self.current }

    pub fn future(&self) -> &CGrid { &self.future }

    pub(crate) fn split_mut(&mut self) -> (&mut CGrid, &mut CGrid) {
        (&mut self.current, &mut self.future)
    }

    pub fn mass(&self) -> f64 { self.mass }

    pub fn norm_target(&self) -> Option<f64> { self.norm_target }

    pub fn boundary(&self) -> Boundary { self.current.boundary() }

    /// `true` between a predict phase and its matching correct phase.
    pub fn is_predicted(&self) -> bool { self.predicted }

    /// `∫ |ψ|²` of the current amplitude.
    pub fn norm(&self) -> f64 { self.current.norm() }

    /// Density of the current amplitude.
    pub fn density(&self, out: &mut RGrid) -> Result<(), ShapeError> {
        self.current.density(out)
    }

    /// Replace the current amplitude (e.g. from a checkpoint), keeping the
    /// frame momentum and boundary of the old one.
    pub fn replace(&mut self, psi: CGrid) -> HeResult<()> {
        ShapeError::check(self.current.shape(), psi.shape())?;
        let momentum = self.current.momentum();
        let boundary = self.current.boundary();
        self.current = psi.with_boundary(boundary);
        self.current.set_momentum(momentum);
        self.future.assign(&self.current)?;
        self.predicted = false;
        Ok(())
    }

    /// Overwrite the current amplitude with an earlier copy of it, dropping
    /// any pending prediction.
    pub(crate) fn restore(&mut self, psi: &CGrid) -> Result<(), ShapeError> {
        self.current.assign(psi)?;
        self.predicted = false;
        Ok(())
    }

    /// Set the frame momentum of both amplitude buffers.
    pub fn set_momentum(&mut self, k0: [f64; 3]) {
        self.current.set_momentum(k0);
        self.future.set_momentum(k0);
    }

    /// Set the boundary condition of both amplitude buffers.
    pub fn set_boundary(&mut self, boundary: Boundary) {
        self.current.set_boundary(boundary);
        self.future.set_boundary(boundary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64 as C64;
    use crate::grid::GridShape;

    #[test]
    fn replace_keeps_frame_and_boundary() {
        let s = GridShape::new(4, 4, 4, 1.0).unwrap();
        let mut wf = Wavefunction::new(CGrid::zeros(&s), 2.0).with_norm_target(1.0);
        wf.set_momentum([0.0, 0.0, 0.5]);
        wf.set_boundary(Boundary::Neumann);
        let mut fresh = CGrid::zeros(&s);
        fresh.fill(C64::new(0.5, 0.0));
        wf.replace(fresh).unwrap();
        assert_eq!(wf.current().momentum(), [0.0, 0.0, 0.5]);
        assert_eq!(wf.boundary(), Boundary::Neumann);
        assert_eq!(wf.future().at([1, 2, 3]), C64::new(0.5, 0.0));
        assert_eq!(wf.norm_target(), Some(1.0));
        let wrong = CGrid::zeros(&GridShape::new(8, 4, 4, 1.0).unwrap());
        assert!(wf.replace(wrong).is_err());
    }
}
