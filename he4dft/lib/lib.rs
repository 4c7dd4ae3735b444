//! Real- and imaginary-time propagation of superfluid ⁴He in the Orsay-Trento
//! density functional, on uniform three-dimensional grids.
//!
//! Provides:
//! - Grids of real and complex values with spectral convolution, gradients
//!   and Fourier-space filters
//! - The Orsay-Trento functional (with optional kinetic-correlation and
//!   backflow terms) and its bulk equation of state
//! - A self-consistent predictor-corrector split-step integrator over
//!   real, imaginary or ramped complex time
//! - Normalization and boundary policies (bulk-pinned or fixed-count
//!   normalization; periodic, reflecting or absorbing edges)
//! - Tabulated bulk properties of the liquid evaluated from B-splines
//! - Coupling of the liquid to a quantum impurity through a radial pair
//!   potential, and the added mass, drag and mobility of such an impurity
//! - Quantized vortex lines and rings, imprinted or held by a centrifugal
//!   potential, and seeded long-wavelength thermal noise in initial states
//! - Configuration from TOML or keyword files, and compressed checkpoints
//!
//! See [`docs`] for theoretical background.

pub mod error;
pub mod units;
pub mod utils;
pub mod grid;
pub mod convolution;
pub mod bulk;
pub mod functional;
pub mod policy;
pub mod wavefunction;
pub mod timedep;
pub mod interp;
pub mod vortex;
pub mod thermal;
pub mod config;
pub mod checkpoint;
pub mod simulation;
pub mod diagnostics;

pub mod docs;
