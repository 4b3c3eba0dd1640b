//! Integration domains.
//!
//! A domain maps raw walker coordinates into the valid region. The unbounded
//! variant is a pass-through; the orthorhombic periodic variant wraps each
//! coordinate into `[lb, ub)` by repeated addition/subtraction of its
//! extent.

use crate::error::McError;
use crate::walker::WalkerState;

/// The region walker coordinates live in.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    /// The whole of R^ndim; folding is a no-op.
    Unbounded { ndim: usize },
    /// An orthorhombic box with periodic boundaries.
    OrthoPeriodic { lb: Vec<f64>, ub: Vec<f64> },
}

impl Domain {
    pub fn unbounded(ndim: usize) -> Self {
        Domain::Unbounded { ndim }
    }

    /// Periodic box with per-dimension bounds. Every lower bound must lie
    /// strictly below its upper bound.
    pub fn ortho_periodic(lb: Vec<f64>, ub: Vec<f64>) -> Result<Self, McError> {
        if lb.len() != ub.len() {
            return Err(McError::DimensionMismatch {
                expected: lb.len(),
                found: ub.len(),
            });
        }
        for (i, (&l, &u)) in lb.iter().zip(ub.iter()).enumerate() {
            if !(l < u) {
                return Err(McError::InvalidBounds { index: i, lb: l, ub: u });
            }
        }
        Ok(Domain::OrthoPeriodic { lb, ub })
    }

    /// Periodic box with the same bounds in every dimension.
    pub fn ortho_periodic_uniform(ndim: usize, lb: f64, ub: f64) -> Result<Self, McError> {
        Self::ortho_periodic(vec![lb; ndim], vec![ub; ndim])
    }

    pub fn ndim(&self) -> usize {
        match self {
            Domain::Unbounded { ndim } => *ndim,
            Domain::OrthoPeriodic { lb, .. } => lb.len(),
        }
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Domain::OrthoPeriodic { .. })
    }

    /// Volume of the box, infinite for the unbounded domain.
    pub fn volume(&self) -> f64 {
        match self {
            Domain::Unbounded { .. } => f64::INFINITY,
            Domain::OrthoPeriodic { lb, ub } => {
                lb.iter().zip(ub.iter()).map(|(l, u)| u - l).product()
            }
        }
    }

    /// Per-dimension extents, infinite for the unbounded domain.
    pub fn sizes(&self) -> Vec<f64> {
        match self {
            Domain::Unbounded { ndim } => vec![f64::INFINITY; *ndim],
            Domain::OrthoPeriodic { lb, ub } => {
                lb.iter().zip(ub.iter()).map(|(l, u)| u - l).collect()
            }
        }
    }

    /// Folds every coordinate into the domain.
    pub fn apply(&self, x: &mut [f64]) {
        if let Domain::OrthoPeriodic { lb, ub } = self {
            for (i, xi) in x.iter_mut().enumerate() {
                *xi = wrap(*xi, lb[i], ub[i]);
            }
        }
    }

    /// Folds only the coordinates the current proposal changed. With a full
    /// change count this is the same as folding everything.
    pub fn apply_selective(&self, wlk: &mut WalkerState) {
        if wlk.nchanged >= wlk.ndim() {
            self.apply(&mut wlk.xnew);
        } else if let Domain::OrthoPeriodic { lb, ub } = self {
            for &i in &wlk.changed_idx[..wlk.nchanged] {
                wlk.xnew[i] = wrap(wlk.xnew[i], lb[i], ub[i]);
            }
        }
    }

    /// Maps unit-cube coordinates `[0, 1)` into domain coordinates. Used by
    /// the uniform-random fallback when no sampling function is installed.
    pub fn scale_to_domain(&self, x: &mut [f64]) {
        if let Domain::OrthoPeriodic { lb, ub } = self {
            for (i, xi) in x.iter_mut().enumerate() {
                *xi = lb[i] + *xi * (ub[i] - lb[i]);
            }
        }
    }
}

fn wrap(mut x: f64, lb: f64, ub: f64) -> f64 {
    let ext = ub - lb;
    while x < lb {
        x += ext;
    }
    while x >= ub {
        x -= ext;
    }
    x
}
