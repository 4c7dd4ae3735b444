//! Rules applied to an amplitude after every corrected step: how its overall
//! scale is fixed ([`NormalizationPolicy`]) and what happens at the edges of the
//! box ([`BoundaryPolicy`]).

use ndarray as nd;
use num_complex::Complex64 as C64;
use serde::{ Deserialize, Serialize };
use tracing::{ debug, info };
use crate::{
    error::{ ConfigError, Error, HeResult },
    grid::{ Boundary, CGrid, GridShape, RGrid, fourier_shift },
    utils::Fft3,
};

/// How the amplitude is rescaled after each step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
    /// Rescale so that the density at `reference` equals the bulk density.
    /// Defaults to the point `(nx/4, ny/4, nz/4)`.
    BulkPinned {
        #[serde(default)]
        reference: Option<[usize; 3]>,
    },
    /// Rescale to a fixed number of particles. While the iteration index is
    /// below `recenter_until` the centre of mass is also moved back to the
    /// origin.
    FixedParticleCount {
        atoms: f64,
        #[serde(default)]
        recenter_until: usize,
    },
    /// Leave the amplitude alone.
    #[default]
    Unconstrained,
}

/// Recentring phase of [`Normalization::FixedParticleCount`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recentring {
    Active,
    Released,
}

/// Runtime form of a [`Normalization`], bound to a grid and a bulk density.
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizationPolicy {
    BulkPinned { reference: [usize; 3], rho0: f64 },
    FixedParticleCount { atoms: f64, recenter_until: usize, state: Recentring },
    Unconstrained,
}

impl NormalizationPolicy {
    /// Resolve defaults and check the configuration against `shape`.
    pub fn new(norm: &Normalization, shape: &GridShape, rho0: f64) -> HeResult<Self> {
        match norm {
            Normalization::BulkPinned { reference } => {
                let reference = reference.unwrap_or_else(|| {
                    let (nx, ny, nz) = shape.dims();
                    [nx / 4, ny / 4, nz / 4]
                });
                let (nx, ny, nz) = shape.dims();
                if reference[0] >= nx || reference[1] >= ny || reference[2] >= nz {
                    return Err(ConfigError::Inconsistent(format!(
                        "normalization reference {reference:?} lies outside {shape}"
                    )).into());
                }
                if !(rho0 > 0.0) {
                    return Err(ConfigError::Malformed {
                        key: "rho0".into(), value: rho0.to_string() }.into());
                }
                Ok(Self::BulkPinned { reference, rho0 })
            },
            Normalization::FixedParticleCount { atoms, recenter_until } => {
                if !(*atoms > 0.0) {
                    return Err(ConfigError::Malformed {
                        key: "atoms".into(), value: atoms.to_string() }.into());
                }
                let state = if *recenter_until > 0 {
                    Recentring::Active
                } else {
                    Recentring::Released
                };
                Ok(Self::FixedParticleCount {
                    atoms: *atoms, recenter_until: *recenter_until, state })
            },
            Normalization::Unconstrained => Ok(Self::Unconstrained),
        }
    }

    /// Current recentring phase, if this is a fixed-count policy.
    pub fn recentring(&self) -> Option<Recentring> {
        match self {
            Self::FixedParticleCount { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Apply the policy to `psi` after step `iter`.
    pub fn apply(&mut self, psi: &mut CGrid, iter: usize, fft: &Fft3) -> HeResult<()> {
        match self {
            Self::BulkPinned { reference, rho0 } => {
                let rho_ref = psi.at(*reference).norm_sqr();
                if rho_ref <= f64::MIN_POSITIVE {
                    return Err(Error::Degenerate("zero density at the reference point"));
                }
                psi.scale((*rho0 / rho_ref).sqrt());
            },
            Self::FixedParticleCount { atoms, recenter_until, state } => {
                if *state == Recentring::Active {
                    if iter < *recenter_until {
                        recenter(psi, fft)?;
                    } else {
                        *state = Recentring::Released;
                        info!("releasing centre of mass at iteration {iter}");
                    }
                }
                renormalize(psi, *atoms)?;
            },
            Self::Unconstrained => { },
        }
        Ok(())
    }
}

/// Shift `psi` so that the centre of its density sits at the origin.
pub fn recenter(psi: &mut CGrid, fft: &Fft3) -> HeResult<()> {
    let mut rho = RGrid::zeros(psi.shape());
    psi.density(&mut rho)?;
    let com = rho.centroid()
        .ok_or(Error::Degenerate("cannot recentre a vanishing amplitude"))?;
    debug!("recentring by {com:?}");
    fourier_shift(psi, com.map(|c| -c), fft);
    Ok(())
}

/// Rescale `psi` so that `∫|ψ|² = target`.
pub fn renormalize(psi: &mut CGrid, target: f64) -> HeResult<()> {
    let norm = psi.norm();
    if norm <= f64::MIN_POSITIVE {
        return Err(Error::Degenerate("cannot renormalize a vanishing amplitude"));
    }
    psi.scale((target / norm).sqrt());
    Ok(())
}

/// Damping shell near the faces of the box.
///
/// Each axis carries lower and upper index bounds; a point outside them has a
/// penetration depth that rises linearly from 0 at the bound to 1 at the face.
/// Depths are summed over axes and clamped to 1, and the amplitude there is
/// multiplied by `exp(-amplitude * depth)` after every step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbsorbingShell {
    pub amplitude: f64,
    pub lower: [usize; 3],
    pub upper: [usize; 3],
}

impl AbsorbingShell {
    /// Shell of the given physical widths along each axis.
    pub fn from_widths(shape: &GridShape, amplitude: f64, widths: [f64; 3]) -> Self {
        let mut lower = [0; 3];
        let mut upper = [0; 3];
        for axis in 0..3 {
            let n = shape.n(axis);
            let w = ((widths[axis] / shape.step()) as usize).min(n / 2);
            lower[axis] = w;
            upper[axis] = n - w;
        }
        Self { amplitude, lower, upper }
    }

    /// Check the bounds against `shape`.
    pub fn validate(&self, shape: &GridShape) -> Result<(), ConfigError> {
        for axis in 0..3 {
            if self.lower[axis] > self.upper[axis] || self.upper[axis] > shape.n(axis) {
                return Err(ConfigError::Inconsistent(format!(
                    "absorbing bounds {:?}..{:?} do not fit {shape}",
                    self.lower, self.upper,
                )));
            }
        }
        if !(self.amplitude >= 0.0) {
            return Err(ConfigError::Malformed {
                key: "amplitude".into(), value: self.amplitude.to_string() });
        }
        Ok(())
    }

    /// Penetration depth at a grid index.
    pub fn depth(&self, shape: &GridShape, idx: [usize; 3]) -> f64 {
        let total: f64
            = (0..3).map(|axis| {
                let i = idx[axis];
                let n = shape.n(axis);
                let (lo, hi) = (self.lower[axis], self.upper[axis]);
                if i < lo {
                    (lo - i) as f64 / lo as f64
                } else if i >= hi && hi < n {
                    (i + 1 - hi) as f64 / (n - hi) as f64
                } else {
                    0.0
                }
            })
            .sum();
        total.min(1.0)
    }

    /// Damp `psi` inside the shell.
    pub fn apply(&self, psi: &mut CGrid) {
        let shape = *psi.shape();
        let amp = self.amplitude;
        nd::Zip::indexed(psi.data_mut())
            .par_for_each(|(i, j, k), p| {
                let f = self.depth(&shape, [i, j, k]);
                if f > 0.0 { *p *= C64::from((-amp * f).exp()); }
            });
    }
}

/// Boundary treatment of the propagated amplitude.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryPolicy {
    #[default]
    Periodic,
    Neumann,
    /// Periodic transforms with a damping shell at the faces.
    Absorbing(AbsorbingShell),
}

impl BoundaryPolicy {
    /// Boundary condition used by finite differences and the propagator.
    pub fn boundary(&self) -> Boundary {
        match self {
            Self::Neumann => Boundary::Neumann,
            Self::Periodic | Self::Absorbing(_) => Boundary::Periodic,
        }
    }

    /// Apply any post-step boundary action to `psi`.
    pub fn apply(&self, psi: &mut CGrid) {
        if let Self::Absorbing(shell) = self {
            shell.apply(psi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn shape() -> GridShape { GridShape::new(16, 16, 16, 0.5).unwrap() }

    fn gaussian(shape: &GridShape, x0: [f64; 3]) -> CGrid {
        CGrid::from_fn(shape, &|x: f64, y: f64, z: f64| {
            let r2 = (x - x0[0]).powi(2) + (y - x0[1]).powi(2) + (z - x0[2]).powi(2);
            C64::from((-r2 / 2.0).exp())
        })
    }

    #[test]
    fn bulk_pinned_sets_reference_density() {
        let s = shape();
        let fft = Fft3::new(s.dims());
        let mut policy = NormalizationPolicy::new(
            &Normalization::BulkPinned { reference: None }, &s, 0.02).unwrap();
        assert_eq!(policy, NormalizationPolicy::BulkPinned { reference: [4, 4, 4], rho0: 0.02 });
        let mut psi = gaussian(&s, [0.0; 3]);
        policy.apply(&mut psi, 0, &fft).unwrap();
        assert_abs_diff_eq!(psi.at([4, 4, 4]).norm_sqr(), 0.02, epsilon = 1e-14);
    }

    #[test]
    fn bulk_pinned_rejects_bad_reference_and_zero_density() {
        let s = shape();
        assert!(NormalizationPolicy::new(
            &Normalization::BulkPinned { reference: Some([16, 0, 0]) }, &s, 0.02).is_err());
        let fft = Fft3::new(s.dims());
        let mut policy = NormalizationPolicy::new(
            &Normalization::BulkPinned { reference: None }, &s, 0.02).unwrap();
        let mut psi = CGrid::zeros(&s);
        assert!(matches!(policy.apply(&mut psi, 0, &fft), Err(Error::Degenerate(_))));
    }

    #[test]
    fn fixed_count_recentres_then_releases() {
        let s = GridShape::new(32, 32, 32, 0.5).unwrap();
        let fft = Fft3::new(s.dims());
        let mut policy = NormalizationPolicy::new(
            &Normalization::FixedParticleCount { atoms: 50.0, recenter_until: 2 },
            &s, 0.02,
        ).unwrap();
        assert_eq!(policy.recentring(), Some(Recentring::Active));
        let mut psi = gaussian(&s, [1.0, -0.5, 0.5]);
        policy.apply(&mut psi, 0, &fft).unwrap();
        assert_abs_diff_eq!(psi.norm(), 50.0, epsilon = 1e-10);
        let mut rho = RGrid::zeros(&s);
        psi.density(&mut rho).unwrap();
        for c in rho.centroid().unwrap() {
            assert_abs_diff_eq!(c, 0.0, epsilon = 1e-6);
        }
        policy.apply(&mut psi, 1, &fft).unwrap();
        assert_eq!(policy.recentring(), Some(Recentring::Active));
        fourier_shift(&mut psi, [1.0, 0.0, 0.0], &fft);
        policy.apply(&mut psi, 2, &fft).unwrap();
        assert_eq!(policy.recentring(), Some(Recentring::Released));
        psi.density(&mut rho).unwrap();
        assert_abs_diff_eq!(rho.centroid().unwrap()[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(psi.norm(), 50.0, epsilon = 1e-10);
    }

    #[test]
    fn unconstrained_leaves_amplitude_alone() {
        let s = shape();
        let fft = Fft3::new(s.dims());
        let mut policy = NormalizationPolicy::new(&Normalization::Unconstrained, &s, 0.0).unwrap();
        let mut psi = gaussian(&s, [0.0; 3]);
        let before = psi.clone();
        policy.apply(&mut psi, 0, &fft).unwrap();
        assert_eq!(psi, before);
    }

    #[test]
    fn absorbing_shell_damps_only_the_shell() {
        let s = shape();
        let shell = AbsorbingShell::from_widths(&s, 2.0, [1.0, 1.0, 1.0]);
        assert_eq!(shell.lower, [2, 2, 2]);
        assert_eq!(shell.upper, [14, 14, 14]);
        shell.validate(&s).unwrap();
        let mut psi = CGrid::zeros(&s);
        psi.fill(C64::new(1.0, 0.0));
        let policy = BoundaryPolicy::Absorbing(shell.clone());
        assert_eq!(policy.boundary(), Boundary::Periodic);
        policy.apply(&mut psi);
        assert_eq!(psi.at([8, 8, 8]), C64::new(1.0, 0.0));
        assert_eq!(psi.at([2, 13, 8]), C64::new(1.0, 0.0));
        let edge = psi.at([0, 8, 8]).re;
        let inner = psi.at([1, 8, 8]).re;
        assert_abs_diff_eq!(edge, (-2.0_f64).exp(), epsilon = 1e-14);
        assert_abs_diff_eq!(inner, (-1.0_f64).exp(), epsilon = 1e-14);
        assert_abs_diff_eq!(psi.at([15, 8, 8]).re, (-2.0_f64).exp(), epsilon = 1e-14);
        // depths are summed and clamped
        assert_abs_diff_eq!(psi.at([1, 1, 8]).re, (-2.0_f64).exp(), epsilon = 1e-14);
        assert_abs_diff_eq!(psi.at([0, 0, 0]).re, (-2.0_f64).exp(), epsilon = 1e-14);
    }

    #[test]
    fn absorbing_shell_validation() {
        let s = shape();
        let bad = AbsorbingShell { amplitude: 1.0, lower: [10, 0, 0], upper: [5, 16, 16] };
        assert!(bad.validate(&s).is_err());
        let neg = AbsorbingShell { amplitude: -1.0, lower: [0; 3], upper: [16; 3] };
        assert!(neg.validate(&s).is_err());
    }
}
