//! Tabulated experimental properties of bulk superfluid helium at saturated
//! vapor pressure (enthalpy, entropy, elementary excitation dispersion,
//! superfluid fraction), evaluated from cubic B-spline knot/coefficient tables.
//!
//! Tables are data, loaded from TOML:
//!
//! ```toml
//! [enthalpy]
//! knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 3.0, 3.0, 3.0]
//! coeffs = [0.0, 0.3333, 1.0, 2.0, 2.6667, 3.0]
//! ```
//!
//! Everything in this module is in laboratory units (K, J/mol, J/(K g), Å⁻¹),
//! not atomic units.
//!
//! A query outside the valid knot range returns [`SENTINEL`] with zeroed
//! derivatives and logs a warning; use [`SplineValue::checked`] to turn that
//! into a [`DomainError`].

use std::path::Path;
use serde::{ Deserialize, Serialize };
use tracing::warn;
use crate::error::{ BulkError, ConfigError, DomainError, HeResult };

/// Value returned in place of a physical result for out-of-range queries.
pub const SENTINEL: f64 = 1e99;

/// Lambda-point temperature (K); the superfluid fraction vanishes at and above
/// it.
pub const LAMBDA_TEMPERATURE: f64 = 2.1768;

// the published superfluid-fraction table tends to this value at 0 K instead
// of 1
const SUPERFLUID_ZERO_LIMIT: f64 = 1.451275e-1;

#[derive(Clone, Debug, Deserialize)]
struct RawKnotTable {
    knots: Vec<f64>,
    coeffs: Vec<f64>,
}

/// Cubic B-spline knot and coefficient arrays.
///
/// Valid tables have at least eight nondecreasing, finite knots and exactly
/// four fewer coefficients than knots. The spline is defined on
/// `[knots[3], knots[n - 4]]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawKnotTable")]
pub struct KnotTable {
    knots: Vec<f64>,
    coeffs: Vec<f64>,
}

impl TryFrom<RawKnotTable> for KnotTable {
    type Error = BulkError;

    fn try_from(raw: RawKnotTable) -> Result<Self, Self::Error> {
        Self::new(raw.knots, raw.coeffs)
    }
}

/// Spline value with its first and second derivatives.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SplineValue {
    pub value: f64,
    pub first: f64,
    pub second: f64,
    query: f64,
    domain: (f64, f64),
}

impl SplineValue {
    /// `true` if this is the out-of-domain sentinel.
    pub fn is_sentinel(&self) -> bool { self.value == SENTINEL }

    /// Convert the sentinel into a [`DomainError`].
    pub fn checked(self) -> Result<Self, DomainError> {
        if self.is_sentinel() {
            Err(DomainError { x: self.query, lo: self.domain.0, hi: self.domain.1 })
        } else {
            Ok(self)
        }
    }
}

impl KnotTable {
    /// Validate and create a new table.
    pub fn new(knots: Vec<f64>, coeffs: Vec<f64>) -> Result<Self, BulkError> {
        if knots.len() < 8 {
            return Err(BulkError::BadTable(
                format!("need at least 8 knots; got {}", knots.len())));
        }
        if coeffs.len() + 4 != knots.len() {
            return Err(BulkError::BadTable(
                format!(
                    "expected {} coefficients for {} knots; got {}",
                    knots.len() - 4, knots.len(), coeffs.len(),
                )
            ));
        }
        if knots.iter().chain(&coeffs).any(|v| !v.is_finite()) {
            return Err(BulkError::BadTable("non-finite entry".into()));
        }
        if knots.windows(2).any(|w| w[1] < w[0]) {
            return Err(BulkError::BadTable("knots must be nondecreasing".into()));
        }
        let n = knots.len();
        if knots[n - 4] <= knots[3] {
            return Err(BulkError::BadTable("empty spline domain".into()));
        }
        Ok(Self { knots, coeffs })
    }

    pub fn knots(&self) -> &[f64] { &self.knots }

    pub fn coeffs(&self) -> &[f64] { &self.coeffs }

    /// Valid query range `[knots[3], knots[n - 4]]`.
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[3], self.knots[self.knots.len() - 4])
    }

    /// Evaluate the spline and its first two derivatives at `x`.
    pub fn eval(&self, x: f64) -> SplineValue {
        let domain = self.domain();
        if !(domain.0..=domain.1).contains(&x) {
            warn!("spline query {x} outside valid range [{}, {}]", domain.0, domain.1);
            return SplineValue {
                value: SENTINEL, first: 0.0, second: 0.0, query: x, domain };
        }
        let k = &self.knots;
        let c = &self.coeffs;

        // bracket x in [k[j + 3], k[j + 4]]
        let mut lo: isize = -1;
        let mut hi: isize = k.len() as isize - 8;
        while hi - lo > 1 {
            let mid = (lo + hi).div_euclid(2);
            if x >= k[(mid + 4) as usize] { lo = mid; } else { hi = mid; }
        }
        let j = hi as usize;

        let (k1, k2, k3, k4, k5, k6)
            = (k[j + 1], k[j + 2], k[j + 3], k[j + 4], k[j + 5], k[j + 6]);
        let e2 = x - k2;
        let e3 = x - k3;
        let e4 = k4 - x;
        let e5 = k5 - x;

        // first level
        let c11 = ((x - k1) * c[j + 1] + e4 * c[j]) / (k4 - k1);
        let cd11 = (c[j + 1] - c[j]) / (k4 - k1);
        let c21 = (e2 * c[j + 2] + e5 * c[j + 1]) / (k5 - k2);
        let cd21 = (c[j + 2] - c[j + 1]) / (k5 - k2);
        let c31 = (e3 * c[j + 3] + (k6 - x) * c[j + 2]) / (k6 - k3);
        let cd31 = (c[j + 3] - c[j + 2]) / (k6 - k3);

        // second level
        let c12 = (e2 * c21 + e4 * c11) / (k4 - k2);
        let cd12 = (c21 + e2 * cd21 - c11 + e4 * cd11) / (k4 - k2);
        let cdd12 = 2.0 * (cd21 - cd11) / (k4 - k2);
        let c22 = (e3 * c31 + e5 * c21) / (k5 - k3);
        let cd22 = (c31 + e3 * cd31 - c21 + e5 * cd21) / (k5 - k3);
        let cdd22 = 2.0 * (cd31 - cd21) / (k5 - k3);

        let value = (e3 * c22 + e4 * c12) / (k4 - k3);
        let first = (e3 * cd22 + c22 + e4 * cd12 - c12) / (k4 - k3);
        let second
            = (e3 * cdd22 + 2.0 * cd22 + e4 * cdd12 - 2.0 * cd12) / (k4 - k3);
        SplineValue { value, first, second, query: x, domain }
    }
}

/// Scan `[lo, hi]` upward in increments of `step` for the first point
/// satisfying `hit`.
fn scan<F>(target: f64, (lo, hi): (f64, f64), step: f64, hit: F)
    -> Result<f64, BulkError>
where F: Fn(f64) -> bool
{
    BulkError::check_step(step)?;
    let mut i: usize = 0;
    loop {
        let t = lo + i as f64 * step;
        if t > hi { break; }
        if hit(t) { return Ok(t); }
        i += 1;
    }
    Err(BulkError::NoCrossing { target, lo, hi })
}

/// The full set of experimental bulk property tables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkProperties {
    /// Enthalpy (J/mol) versus temperature (K).
    pub enthalpy: KnotTable,
    /// Entropy (J/(K g)) versus temperature (K).
    pub entropy: KnotTable,
    /// Excitation energy (K) versus wavevector (Å⁻¹).
    pub dispersion: KnotTable,
    /// Raw superfluid fraction versus temperature (K).
    pub superfluid_fraction: KnotTable,
}

impl BulkProperties {
    /// Parse a set of tables from a TOML document.
    pub fn from_toml_str(s: &str) -> HeResult<Self> {
        toml::from_str(s)
            .map_err(|e| ConfigError::Toml(e.to_string()).into())
    }

    /// Read a set of tables from a TOML file.
    pub fn load<P>(path: P) -> HeResult<Self>
    where P: AsRef<Path>
    {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                msg: e.to_string(),
            })?;
        Self::from_toml_str(&s)
    }

    /// Enthalpy at temperature `t`.
    pub fn enthalpy(&self, t: f64) -> SplineValue { self.enthalpy.eval(t) }

    /// Entropy at temperature `t`.
    pub fn entropy(&self, t: f64) -> SplineValue { self.entropy.eval(t) }

    /// Excitation energy at wavevector `k`.
    ///
    /// The table does not reach `k = 0`; below its first valid knot the
    /// dispersion is interpolated linearly to zero.
    pub fn dispersion(&self, k: f64) -> f64 {
        let (k_lo, _) = self.dispersion.domain();
        if k < k_lo {
            (k / k_lo) * self.dispersion.eval(k_lo).value
        } else {
            self.dispersion.eval(k).value
        }
    }

    /// Superfluid fraction (between 0 and 1) at temperature `t`.
    pub fn superfluid_fraction(&self, t: f64) -> f64 {
        if t >= LAMBDA_TEMPERATURE { return 0.0; }
        let sv = self.superfluid_fraction.eval(t);
        if sv.is_sentinel() { SENTINEL } else { sv.value / SUPERFLUID_ZERO_LIMIT }
    }

    /// Temperature at which the enthalpy first reaches `target`, scanning up
    /// from the lower end of the table in increments of `step`.
    pub fn enthalpy_inverse(&self, target: f64, step: f64) -> Result<f64, BulkError> {
        scan(target, self.enthalpy.domain(), step,
            |t| self.enthalpy.eval(t).value >= target)
    }

    /// Temperature at which the entropy first reaches `target`.
    pub fn entropy_inverse(&self, target: f64, step: f64) -> Result<f64, BulkError> {
        scan(target, self.entropy.domain(), step,
            |t| self.entropy.eval(t).value >= target)
    }

    /// Temperature at which the superfluid fraction first drops to `target`.
    pub fn superfluid_fraction_inverse(&self, target: f64, step: f64)
        -> Result<f64, BulkError>
    {
        scan(target, self.superfluid_fraction.domain(), step,
            |t| self.superfluid_fraction(t) <= target)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Exact B-spline table for the cubic `a t³ + b t² + c t + d` on clamped
    /// knots spanning `interior`.
    pub(crate) fn cubic_table(interior: &[f64], [a, b, c, d]: [f64; 4]) -> KnotTable {
        let first = interior[0];
        let last = interior[interior.len() - 1];
        let knots: Vec<f64>
            = [first; 3].into_iter()
            .chain(interior.iter().copied())
            .chain([last; 3])
            .collect();
        let coeffs: Vec<f64>
            = (0..knots.len() - 4)
            .map(|i| {
                let (t1, t2, t3) = (knots[i + 1], knots[i + 2], knots[i + 3]);
                a * t1 * t2 * t3
                    + b * (t1 * t2 + t1 * t3 + t2 * t3) / 3.0
                    + c * (t1 + t2 + t3) / 3.0
                    + d
            })
            .collect();
        KnotTable::new(knots, coeffs).unwrap()
    }

    pub(crate) fn test_properties() -> BulkProperties {
        let temps = [0.1, 0.4, 0.8, 1.2, 1.5, 1.9, 2.3, 2.6, 3.0];
        let tl3 = LAMBDA_TEMPERATURE.powi(3);
        BulkProperties {
            enthalpy: cubic_table(&temps, [1.0, 0.0, 2.0, 0.0]),
            entropy: cubic_table(&temps, [0.5, 0.2, 0.1, 0.0]),
            dispersion: cubic_table(&[0.2, 0.6, 1.0, 1.5, 2.0, 2.5], [0.0, -2.0, 10.0, 0.0]),
            superfluid_fraction: cubic_table(
                &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5],
                [-SUPERFLUID_ZERO_LIMIT / tl3, 0.0, 0.0, SUPERFLUID_ZERO_LIMIT],
            ),
        }
    }

    #[test]
    fn spline_matches_cubic() {
        let table = cubic_table(&[-1.0, -0.3, 0.2, 0.9, 1.4, 2.0], [2.0, -1.0, 3.0, -1.0]);
        for x in [-1.0, -0.77, -0.3, 0.0, 0.55, 1.2, 1.99, 2.0] {
            let sv = table.eval(x).checked().unwrap();
            assert_abs_diff_eq!(sv.value, 2.0 * x.powi(3) - x * x + 3.0 * x - 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(sv.first, 6.0 * x * x - 2.0 * x + 3.0, epsilon = 1e-11);
            assert_abs_diff_eq!(sv.second, 12.0 * x - 2.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn out_of_domain_returns_sentinel() {
        let table = cubic_table(&[0.0, 1.0, 2.0, 3.0, 4.0], [0.0, 1.0, 0.0, 0.0]);
        assert_eq!(table.domain(), (0.0, 4.0));
        for x in [-0.01, 4.01, f64::NAN] {
            let sv = table.eval(x);
            assert!(sv.is_sentinel());
            assert_eq!((sv.first, sv.second), (0.0, 0.0));
            assert!(sv.checked().is_err());
        }
        let err = table.eval(5.0).checked().unwrap_err();
        assert_eq!((err.x, err.lo, err.hi), (5.0, 0.0, 4.0));
    }

    #[test]
    fn bad_tables_are_rejected() {
        assert!(matches!(
            KnotTable::new(vec![0.0; 7], vec![0.0; 3]),
            Err(BulkError::BadTable(_))
        ));
        assert!(matches!(
            KnotTable::new((0..10).map(f64::from).collect(), vec![0.0; 5]),
            Err(BulkError::BadTable(_))
        ));
        assert!(matches!(
            KnotTable::new((0..10).rev().map(f64::from).collect(), vec![0.0; 6]),
            Err(BulkError::BadTable(_))
        ));
    }

    #[test]
    fn inverse_lookups_round_trip() {
        let props = test_properties();
        let step = 1e-5;
        let h = props.enthalpy(1.3).value;
        assert_abs_diff_eq!(props.enthalpy_inverse(h, step).unwrap(), 1.3, epsilon = 2.0 * step);
        let s = props.entropy(2.1).value;
        assert_abs_diff_eq!(props.entropy_inverse(s, step).unwrap(), 2.1, epsilon = 2.0 * step);
        let t = props.superfluid_fraction_inverse(0.5, step).unwrap();
        assert_abs_diff_eq!(t, LAMBDA_TEMPERATURE * 0.5_f64.cbrt(), epsilon = 2.0 * step);
        assert_abs_diff_eq!(props.superfluid_fraction(t), 0.5, epsilon = 1e-3);
    }

    #[test]
    fn inverse_without_crossing_fails() {
        let props = test_properties();
        assert!(matches!(
            props.enthalpy_inverse(1e6, 1e-3),
            Err(BulkError::NoCrossing { .. })
        ));
        assert!(matches!(props.entropy_inverse(1.0, 0.0), Err(BulkError::BadStep(_))));
        assert!(matches!(props.enthalpy_inverse(1.0, -1e-3), Err(BulkError::BadStep(_))));
    }

    #[test]
    fn superfluid_fraction_and_dispersion_edges() {
        let props = test_properties();
        assert_abs_diff_eq!(props.superfluid_fraction(0.0), 1.0, epsilon = 1e-12);
        assert_eq!(props.superfluid_fraction(LAMBDA_TEMPERATURE), 0.0);
        assert_eq!(props.superfluid_fraction(2.4), 0.0);
        let edge = props.dispersion(0.2);
        assert_abs_diff_eq!(edge, -2.0 * 0.04 + 10.0 * 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(props.dispersion(0.1), 0.5 * edge, epsilon = 1e-12);
        assert_abs_diff_eq!(props.dispersion(0.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn tables_load_from_toml() {
        let doc = r#"
            [enthalpy]
            knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 2.0]
            coeffs = [0.0, 0.0, 1.0, 2.0, 2.0]

            [entropy]
            knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 2.0]
            coeffs = [1.0, 1.0, 1.0, 1.0, 1.0]

            [dispersion]
            knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 2.0]
            coeffs = [1.0, 1.0, 1.0, 1.0, 1.0]

            [superfluid_fraction]
            knots = [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0, 2.0]
            coeffs = [1.0, 1.0, 1.0, 1.0, 1.0]
        "#;
        let props = BulkProperties::from_toml_str(doc).unwrap();
        assert_abs_diff_eq!(props.entropy(1.5).value, 1.0, epsilon = 1e-12);
        let bad = doc.replace("coeffs = [0.0, 0.0, 1.0, 2.0, 2.0]", "coeffs = [0.0]");
        assert!(BulkProperties::from_toml_str(&bad).is_err());
    }
}
