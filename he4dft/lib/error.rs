//! Collection of all error types.
//!
//! All errors derive [`thiserror::Error`], making them composable when allowed
//! and compatible with application code using [`anyhow`][anyhow].
//!
//! [anyhow]: https://crates.io/crates/anyhow

use thiserror::Error;
use crate::grid::GridShape;

/// Returned when a grid cannot be allocated with the requested dimensions.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Returned when any grid dimension is zero.
    #[error("grid dimensions must be non-zero; got {0}x{1}x{2}")]
    ZeroDimension(usize, usize, usize),

    /// Returned when the spatial step is not a finite, positive number.
    #[error("grid step must be finite and greater than 0; got {0}")]
    BadStep(f64),

    /// Returned when the total number of grid points overflows.
    #[error("grid of {0}x{1}x{2} points is too large to allocate")]
    Overflow(usize, usize, usize),
}

/// Returned when two grids taking part in the same operation have different
/// shapes.
#[derive(Debug, Error)]
#[error("encountered grids with incompatible shapes; got {0} and {1}")]
pub struct ShapeError(pub GridShape, pub GridShape);

impl ShapeError {
    pub(crate) fn check(a: &GridShape, b: &GridShape) -> Result<(), Self> {
        (a == b).then_some(()).ok_or(Self(*a, *b))
    }
}

/// Returned when two sample arrays that must pair up have different lengths.
#[derive(Debug, Error)]
#[error("encountered arrays with unequal lengths {0} and {1}")]
pub struct LengthError(pub usize, pub usize);

impl LengthError {
    pub(crate) fn check<A, B>(a: &[A], b: &[B]) -> Result<(), Self> {
        (a.len() == b.len()).then_some(()).ok_or(Self(a.len(), b.len()))
    }
}

/// Returned while reading the startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {msg}")]
    Read { path: String, msg: String },

    #[error("missing required parameter `{0}`")]
    Missing(&'static str),

    #[error("invalid value for parameter `{key}`: {value:?}")]
    Malformed { key: String, value: String },

    #[error("unrecognized parameter `{0}`")]
    Unknown(String),

    #[error("unable to parse toml: {0}")]
    Toml(String),

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Returned from a checked spline lookup when the query lies outside the valid
/// knot range.
#[derive(Debug, Error)]
#[error("spline query {x} lies outside the valid range [{lo}, {hi}]")]
pub struct DomainError {
    pub x: f64,
    pub lo: f64,
    pub hi: f64,
}

/// Returned from functions in [`bulk`][crate::bulk].
#[derive(Debug, Error)]
pub enum BulkError {
    /// Returned when an inverse lookup scans the whole table without the
    /// spline crossing its target.
    #[error("inverse lookup for {target} found no crossing within [{lo}, {hi}]")]
    NoCrossing { target: f64, lo: f64, hi: f64 },

    /// Returned when an iterative equation-of-state solve does not settle.
    #[error("no equilibrium density found for pressure {target} after {iters} iterations")]
    NoConvergence { target: f64, iters: usize },

    /// Returned when a non-positive scan step is encountered.
    #[error("scan step must be greater than 0; got {0}")]
    BadStep(f64),

    /// Returned when a knot/coefficient table is not usable.
    #[error("invalid spline table: {0}")]
    BadTable(String),

    /// [`DomainError`]
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}

impl BulkError {
    pub(crate) fn check_step(step: f64) -> Result<(), Self> {
        (step > 0.0).then_some(()).ok_or(Self::BadStep(step))
    }
}

/// Returned from [`Convolution`][crate::convolution::Convolution].
#[derive(Debug, Error)]
pub enum ConvolutionError {
    /// Returned when an operand slot has never been prepared (or was
    /// invalidated).
    #[error("convolution operand {0} has not been prepared")]
    Unprepared(usize),

    /// Returned when a cached spectrum belongs to a different grid topology.
    #[error("stale convolution cache: prepared for {cached}, used with {requested}")]
    Stale { cached: GridShape, requested: GridShape },
}

/// Returned while reading or writing checkpoint blobs.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("i/o error on {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("unable to decode checkpoint {path}: {msg}")]
    Decode { path: String, msg: String },

    #[error("unable to encode checkpoint {path}: {msg}")]
    Encode { path: String, msg: String },
}

/// Returned from the propagation engine and everything built on it.
#[derive(Debug, Error)]
pub enum Error {
    /// [`AllocationError`]
    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    /// [`ShapeError`]
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// [`LengthError`]
    #[error("length error: {0}")]
    Length(#[from] LengthError),
    /// [`ConfigError`]
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// [`BulkError`]
    #[error("bulk error: {0}")]
    Bulk(#[from] BulkError),

    /// [`ConvolutionError`]
    #[error("convolution error: {0}")]
    Convolution(#[from] ConvolutionError),

    /// [`CheckpointError`]
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Returned when a correct phase is requested without a matching predict.
    #[error("correct phase requested before the future amplitude was predicted")]
    NotPredicted,

    /// Returned when a NaN or infinity shows up in a propagated field.
    #[error("a NaN or Inf value was produced in {0}")]
    NanOrInf(&'static str),

    /// Returned when the norm drifts further than allowed from its reference.
    #[error("norm drifted from {reference} to {current} (tolerance {tolerance})")]
    NormDrift { reference: f64, current: f64, tolerance: f64 },

    /// Returned when rescaling would divide by a vanishing amplitude.
    #[error("cannot normalize: {0}")]
    Degenerate(&'static str),

    /// Returned when a transport quantity needs a frame velocity along a
    /// single grid axis.
    #[error("frame velocity {0:?} is not aligned with a single grid axis")]
    NonAxisAlignedFrame([f64; 3]),
}

pub type HeResult<T> = Result<T, Error>;
