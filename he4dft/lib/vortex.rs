//! Quantized vortices in the liquid.
//!
//! A vortex is either imprinted on an amplitude as a phase winding (straight
//! lines and rings through the origin), or held in place by the centrifugal
//! potential `n²/(2 m r²)` around a straight line while the phase is left
//! free to develop. [`winding_number`] counts the circulation quanta
//! threading a plane of the grid.

use std::f64::consts::TAU;
use ndarray as nd;
use num_complex::Complex64 as C64;
use serde::{ Deserialize, Serialize };
use crate::{
    error::ConfigError,
    grid::{ CGrid, GridShape, RGrid },
};

// the two grid axes transverse to `axis`, in right-handed order
fn transverse(axis: usize) -> (usize, usize) { ((axis + 1) % 3, (axis + 2) % 3) }

fn default_quanta() -> i32 { 1 }

/// A vortex placed in the initial state of a run.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Vortex {
    /// Straight line through the origin along `axis`, imprinted as the phase
    /// `exp(i n φ)`; the amplitude on the line itself is zeroed.
    Line {
        axis: usize,
        #[serde(default = "default_quanta")]
        quanta: i32,
    },
    /// Straight line through the origin along `axis`, held by the enforcing
    /// potential alone.
    Enforced {
        axis: usize,
        #[serde(default = "default_quanta")]
        quanta: i32,
    },
    /// Singly quantized ring of `radius` (Bohr) around `axis`, centred at the
    /// origin.
    Ring { axis: usize, radius: f64 },
}

impl Vortex {
    pub fn axis(&self) -> usize {
        match *self {
            Self::Line { axis, .. } | Self::Enforced { axis, .. } | Self::Ring { axis, .. }
                => axis,
        }
    }

    /// Check the vortex fits on `shape`.
    pub fn validate(&self, shape: &GridShape) -> Result<(), ConfigError> {
        let axis = self.axis();
        if axis > 2 {
            return Err(ConfigError::Malformed {
                key: "vortex.axis".into(), value: axis.to_string() });
        }
        match *self {
            Self::Line { quanta, .. } | Self::Enforced { quanta, .. } if quanta == 0 => {
                Err(ConfigError::Malformed {
                    key: "vortex.quanta".into(), value: quanta.to_string() })
            },
            Self::Ring { radius, .. } => {
                let (a, b) = transverse(axis);
                let half = 0.5 * shape.step() * shape.n(a).min(shape.n(b)) as f64;
                if radius > 0.0 && radius < half {
                    Ok(())
                } else {
                    Err(ConfigError::Inconsistent(format!(
                        "vortex ring radius {radius} does not fit in {shape}")))
                }
            },
            _ => Ok(()),
        }
    }

    /// Multiply `psi` by the vortex profile. Enforced lines leave `psi`
    /// untouched.
    pub fn imprint(&self, psi: &mut CGrid) {
        let shape = *psi.shape();
        let h = shape.step();
        match *self {
            Self::Line { axis, quanta } => {
                let (a, b) = transverse(axis);
                nd::Zip::indexed(psi.data_mut())
                    .par_for_each(|idx, v| {
                        let p = shape.position(idx);
                        let (u, w) = (p[a], p[b]);
                        if u.hypot(w) < 1e-6 * h {
                            *v = C64::from(0.0);
                        } else {
                            *v *= C64::cis(quanta as f64 * w.atan2(u));
                        }
                    });
            },
            Self::Enforced { .. } => { },
            Self::Ring { axis, radius } => {
                let (a, b) = transverse(axis);
                nd::Zip::indexed(psi.data_mut())
                    .par_for_each(|idx, v| {
                        let p = shape.position(idx);
                        let xs = p[a].hypot(p[b]) - radius;
                        let ys = p[axis];
                        let d = xs.hypot(ys);
                        *v *= (1.0 - (-d).exp()) * C64::cis(ys.atan2(xs));
                    });
            },
        }
    }

    /// Potential `n²/(2 m r²)` around an enforced line for particles of mass
    /// `mass`, with `r` clamped below at one grid step. `None` for imprinted
    /// vortices.
    pub fn enforcing_potential(&self, shape: &GridShape, mass: f64) -> Option<RGrid> {
        let Self::Enforced { axis, quanta } = *self else { return None; };
        let (a, b) = transverse(axis);
        let n2 = (quanta as f64).powi(2);
        let r2_min = shape.step().powi(2);
        let coords = [a, b];
        Some(RGrid::from_fn(shape, &|x: f64, y: f64, z: f64| {
            let p = [x, y, z];
            let r2 = coords.iter().map(|k| p[*k] * p[*k]).sum::<f64>().max(r2_min);
            n2 / (2.0 * mass * r2)
        }))
    }
}

/// Number of times the phase of `psi` winds around the square loop one point
/// in from the edges of the plane `index` perpendicular to `axis`, counted
/// positive for right-handed circulation about `axis`.
///
/// Planes narrower than three points in either direction hold no loop and
/// give zero.
pub fn winding_number(psi: &CGrid, axis: usize, index: usize) -> f64 {
    let shape = psi.shape();
    let (a, b) = transverse(axis);
    let (na, nb) = (shape.n(a), shape.n(b));
    if na < 3 || nb < 3 { return 0.0; }
    let (lo_a, hi_a, lo_b, hi_b) = (1, na - 2, 1, nb - 2);
    let mut path: Vec<(usize, usize)> = Vec::with_capacity(2 * (na + nb));
    path.extend((lo_a..hi_a).map(|i| (i, lo_b)));
    path.extend((lo_b..hi_b).map(|j| (hi_a, j)));
    path.extend((lo_a + 1..=hi_a).rev().map(|i| (i, hi_b)));
    path.extend((lo_b + 1..=hi_b).rev().map(|j| (lo_a, j)));
    let at = |(i, j): (usize, usize)| {
        let mut idx = [0; 3];
        idx[axis] = index;
        idx[a] = i;
        idx[b] = j;
        psi.at(idx)
    };
    let total: f64
        = path.iter().zip(path.iter().cycle().skip(1))
        .map(|(p, q)| (at(*q) * at(*p).conj()).arg())
        .sum();
    total / TAU
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn uniform(n: usize, step: f64) -> CGrid {
        let shape = GridShape::new(n, n, n, step).unwrap();
        let mut psi = CGrid::zeros(&shape);
        psi.fill(C64::from(1.0));
        psi
    }

    #[test]
    fn imprinted_line_winds_once_per_quantum() {
        for quanta in [1, 2, -1] {
            let mut psi = uniform(16, 1.0);
            let vortex = Vortex::Line { axis: 2, quanta };
            vortex.validate(psi.shape()).unwrap();
            vortex.imprint(&mut psi);
            let c = psi.shape().center();
            assert_eq!(psi.at(c), C64::from(0.0));
            assert_abs_diff_eq!(psi.at([c[0] + 3, c[1] + 1, 0]).norm(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(winding_number(&psi, 2, 5), quanta as f64, epsilon = 1e-9);
            // the line does not thread planes parallel to it away from the origin
            assert_abs_diff_eq!(winding_number(&psi, 0, 0), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn winding_is_right_handed_on_every_axis() {
        for axis in 0..3 {
            let mut psi = uniform(12, 0.5);
            Vortex::Line { axis, quanta: 1 }.imprint(&mut psi);
            assert_abs_diff_eq!(winding_number(&psi, axis, 2), 1.0, epsilon = 1e-9);
        }
        let plain = uniform(8, 1.0);
        assert_eq!(winding_number(&plain, 1, 4), 0.0);
    }

    #[test]
    fn ring_core_is_empty() {
        let mut psi = uniform(16, 1.0);
        let ring = Vortex::Ring { axis: 2, radius: 4.0 };
        ring.validate(psi.shape()).unwrap();
        ring.imprint(&mut psi);
        let c = psi.shape().center();
        assert_abs_diff_eq!(psi.at([c[0] + 4, c[1], c[2]]).norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(psi.at([c[0], c[1] - 4, c[2]]).norm(), 0.0, epsilon = 1e-12);
        // the phase jumps by π through the disc bounded by the ring
        let inside = psi.at(c);
        assert!(inside.re < -0.9);
        assert_abs_diff_eq!(inside.im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn enforcing_potential_is_centrifugal() {
        let shape = GridShape::new(16, 16, 16, 0.5).unwrap();
        let vortex = Vortex::Enforced { axis: 0, quanta: 2 };
        let mass = 3.0;
        let v = vortex.enforcing_potential(&shape, mass).unwrap();
        let c = shape.center();
        let r = shape.coord(1, c[1] + 4);
        assert_abs_diff_eq!(v.at([3, c[1] + 4, c[2]]), 4.0 / (2.0 * mass * r * r), epsilon = 1e-12);
        assert_abs_diff_eq!(v.at([3, c[1], c[2]]), 4.0 / (2.0 * mass * 0.25), epsilon = 1e-12);
        let mut psi = CGrid::zeros(&shape);
        psi.fill(C64::from(1.0));
        vortex.imprint(&mut psi);
        assert!(psi.data().iter().all(|p| *p == C64::from(1.0)));
        assert!(Vortex::Line { axis: 0, quanta: 1 }.enforcing_potential(&shape, mass).is_none());
    }

    #[test]
    fn bad_vortices_are_rejected() {
        let shape = GridShape::new(8, 8, 8, 1.0).unwrap();
        assert!(Vortex::Line { axis: 3, quanta: 1 }.validate(&shape).is_err());
        assert!(Vortex::Enforced { axis: 1, quanta: 0 }.validate(&shape).is_err());
        assert!(Vortex::Ring { axis: 2, radius: 4.5 }.validate(&shape).is_err());
        assert!(Vortex::Ring { axis: 2, radius: 3.0 }.validate(&shape).is_ok());
    }
}
