//! Noisy initial states for finite-temperature runs.
//!
//! Independent uniform noise is added to the real and imaginary parts of the
//! amplitude at every point, and everything above a wavenumber cutoff is then
//! removed, which leaves a random field of long-wavelength phonons on top of
//! the starting liquid.

use rand::{ Rng, SeedableRng, rngs::StdRng };
use serde::{ Deserialize, Serialize };
use tracing::info;
use crate::{
    error::ConfigError,
    grid::{ CGrid, HighCut, fft_filter },
    utils::Fft3,
};

/// Random perturbation of the initial amplitude.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThermalNoise {
    /// Half-width of the uniform noise on each of the real and imaginary
    /// parts (atomic units).
    pub amplitude: f64,
    /// Largest wavenumber kept (Bohr⁻¹).
    pub cutoff: f64,
    /// Seed of the random sequence; equal seeds give equal states.
    #[serde(default)]
    pub seed: u64,
}

impl ThermalNoise {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.amplitude >= 0.0 && self.amplitude.is_finite()) {
            return Err(ConfigError::Malformed {
                key: "thermal.amplitude".into(), value: self.amplitude.to_string() });
        }
        if !(self.cutoff > 0.0) {
            return Err(ConfigError::Malformed {
                key: "thermal.cutoff".into(), value: self.cutoff.to_string() });
        }
        Ok(())
    }

    /// Add the noise to `psi` and filter the result.
    ///
    /// *Panics if `fft` was planned for a different shape.*
    pub fn apply(&self, psi: &mut CGrid, fft: &Fft3) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let a = self.amplitude;
        for v in psi.data_mut().iter_mut() {
            let re: f64 = rng.gen_range(-a..=a);
            let im: f64 = rng.gen_range(-a..=a);
            v.re += re;
            v.im += im;
        }
        fft_filter(psi, &HighCut(self.cutoff), fft);
        info!("thermal noise of amplitude {a:.3e} below k = {:.3e}", self.cutoff);
    }
}
