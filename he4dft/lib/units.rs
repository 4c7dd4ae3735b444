#![allow(non_upper_case_globals)]

//! Conversion constants between Hartree atomic units, in which everything in
//! this crate is computed (ħ = mₑ = a₀ = Eₕ = 1), and the laboratory units in
//! which helium data are usually quoted.
//!
//! Concrete physical constants are taken from NIST.

/// reduced Planck constant (kg m^2 s^-1)
pub const hbar: f64 = 6.62607015e-34 / 2.0 / std::f64::consts::PI;
//                +/- 0 (exact)

/// Boltzmann's constant (J K^-1)
pub const kB: f64 = 1.380649e-23;
//              +/- 0 (exact)

/// elementary charge (C)
pub const e: f64 = 1.602176634e-19;
//             +/- 0 (exact)

/// electron mass (kg)
pub const me: f64 = 9.1093837015e-31;
//              +/- 0.0000000028e-31

/// unified atomic mass unit (kg)
pub const mu: f64 = 1.66053906660e-27;
//              +/- 0.00000000050e-27

/// Bohr radius (m)
pub const a0: f64 = 5.29177210903e-11;
//              +/- 0.00000000080e-11

/// Hartree energy (J)
pub const Eh: f64 = 4.3597447222071e-18;
//              +/- 0.0000000000085e-18

/// One atomic unit of length in Ångström.
pub const AU_ANG: f64 = a0 * 1e10;

/// One atomic unit of energy in Kelvin.
pub const AU_K: f64 = Eh / kB;

/// One atomic unit of time in femtoseconds.
pub const AU_FS: f64 = hbar / Eh * 1e15;

/// One atomic unit of mass in unified atomic mass units.
pub const AU_AMU: f64 = me / mu;

/// One atomic unit of velocity in m/s.
pub const AU_MPS: f64 = a0 * Eh / hbar;

/// One atomic unit of electric field in V/m.
pub const AU_VPM: f64 = Eh / (e * a0);

/// One atomic unit of pressure in Pa.
pub const AU_PA: f64 = Eh / (a0 * a0 * a0);

/// One atomic unit of pressure in bar.
pub const AU_BAR: f64 = AU_PA / 1e5;

/// Mass of a ⁴He atom in atomic units.
pub const HELIUM_MASS: f64 = 4.002602 / AU_AMU;

/// Convert a time in femtoseconds to atomic units.
pub fn fs_to_au(t: f64) -> f64 { t / AU_FS }

/// Convert an energy in Kelvin to atomic units.
pub fn kelvin_to_au(en: f64) -> f64 { en / AU_K }

/// Convert a length in Ångström to atomic units.
pub fn ang_to_au(x: f64) -> f64 { x / AU_ANG }

/// Convert a number density in Å⁻³ to atomic units.
pub fn density_to_au(rho: f64) -> f64 { rho * AU_ANG.powi(3) }

/// Convert a number density in atomic units to Å⁻³.
pub fn density_from_au(rho: f64) -> f64 { rho / AU_ANG.powi(3) }

/// Convert a velocity in m/s to atomic units.
pub fn mps_to_au(v: f64) -> f64 { v / AU_MPS }
