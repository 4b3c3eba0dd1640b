//! The canonical error type of the engine.
//!
//! Variants fall into three groups: invalid configuration (rejected at the
//! call boundary that introduced it), invalid state (lifecycle misuse of an
//! accumulator or container) and resource failures (trace-file I/O).

use thiserror::Error;

/// Errors surfaced by the integration engine.
#[derive(Debug, Error)]
pub enum McError {
    /// A plug-in's walker dimension does not match the integrator's.
    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Uniform sampling over an infinite domain cannot be normalized.
    #[error("integrating over an infinite domain requires a sampling function")]
    InfiniteDomain,

    /// Lower bound not strictly below upper bound for a periodic domain.
    #[error("invalid domain bounds at coordinate {index}: [{lb}, {ub})")]
    InvalidBounds { index: usize, lb: f64, ub: f64 },

    /// Requested more blocks than there are accumulated samples.
    #[error("{nblocks} blocks requested but only {naccu} samples will be accumulated")]
    TooManyBlocks { nblocks: usize, naccu: u64 },

    /// A negative number of Monte Carlo steps was requested.
    #[error("negative number of MC steps: {0}")]
    NegativeSampleCount(i64),

    /// Automatic equilibration needs an estimator that produces error bars.
    #[error("automatic equilibration requires an estimator with error calculation")]
    EquilibrationWithoutError,

    /// The walker dimension is not divisible by the requested vector length.
    #[error("walker dimension {ndim} is not a multiple of vector length {veclen}")]
    VectorLengthMismatch { ndim: usize, veclen: usize },

    /// Step-size type boundaries must be ascending and end at the dimension.
    #[error("invalid step-size type boundaries: {0:?}")]
    InvalidTypeEnds(Vec<usize>),

    /// More steps were fed to an accumulator than were planned on allocate.
    #[error("accumulated beyond the planned {nsteps} steps")]
    AccumulationOverflow { nsteps: u64 },

    /// Finalize was called before the planned number of steps was consumed.
    #[error("finalize called after {done} of {expected} planned steps")]
    PrematureFinalize { expected: u64, done: u64 },

    /// Estimate was requested from data that has not been finalized.
    #[error("estimate called before finalize")]
    NotFinalized,

    /// Interleaved sample data does not factor into the declared shape.
    #[error("sample data of length {len} does not factor into {nobs} columns")]
    ShapeMismatch { len: usize, nobs: usize },

    /// Trace-file or export I/O failure.
    #[error("trace file error: {0}")]
    Io(#[from] std::io::Error),
}
