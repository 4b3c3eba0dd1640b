//! Proposal kernels.
//!
//! A [`TrialMove`] turns the walker's accepted position into a candidate
//! position and reports the Hastings factor `q(new→old)/q(old→new)` of the
//! proposal (1 for the symmetric kernels here). Movers own their step sizes,
//! possibly binned per coordinate type, so the auto-tuner can scale them
//! uniformly while preserving proportions.

use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::McError;
use crate::walker::WalkerState;

/// Initial step size of the uniform movers; the auto-tuner takes it from
/// here.
const DEFAULT_STEP_SIZE: f64 = 0.05;

/// A proposal kernel with tunable step sizes.
pub trait TrialMove {
    /// Walker dimension this mover proposes for.
    fn ndim(&self) -> usize;

    /// Writes a candidate into `wlk.xnew`, records which coordinates changed
    /// and returns the move-acceptance factor `q(new→old)/q(old→new)`.
    /// `wlk.xold` must not be mutated.
    fn compute_trial_move(&mut self, wlk: &mut WalkerState, rng: &mut SmallRng) -> f64;

    /// Number of independently tunable step sizes.
    fn n_step_sizes(&self) -> usize;

    fn step_size(&self, i: usize) -> f64;

    fn set_step_size(&mut self, i: usize, val: f64);

    /// The step-size bin controlling coordinate `dim`.
    fn step_size_index(&self, dim: usize) -> usize;

    /// Scales every step size by the same factor, preserving proportions.
    fn scale_step_sizes(&mut self, factor: f64) {
        for i in 0..self.n_step_sizes() {
            let s = self.step_size(i);
            self.set_step_size(i, s * factor);
        }
    }

    fn has_step_sizes(&self) -> bool {
        self.n_step_sizes() > 0
    }

    // Proto-value hooks for movers that cache per-step temporaries. The
    // uniform kernels keep none, so these default to no-ops.
    fn initialize_proto_values(&mut self, _x: &[f64]) {}
    fn new_to_old(&mut self) {}
    fn old_to_new(&mut self) {}
}

/// Validates per-type boundaries: strictly ascending, last entry == n.
/// Returns the expanded element-to-type map.
fn type_index_from_ends(n: usize, type_ends: &[usize]) -> Result<Vec<usize>, McError> {
    let mut prev = 0usize;
    for &end in type_ends {
        if end <= prev || end > n {
            return Err(McError::InvalidTypeEnds(type_ends.to_vec()));
        }
        prev = end;
    }
    if prev != n {
        return Err(McError::InvalidTypeEnds(type_ends.to_vec()));
    }
    let mut map = vec![0usize; n];
    let mut ty = 0usize;
    for (i, slot) in map.iter_mut().enumerate() {
        if i >= type_ends[ty] {
            ty += 1;
        }
        *slot = ty;
    }
    Ok(map)
}

/// Symmetric uniform move of all coordinates at once: every coordinate is
/// shifted by `step * (U(0,1) - 0.5)` with the step size of its type bin.
#[derive(Debug, Clone)]
pub struct UniformAllMove {
    ndim: usize,
    step_sizes: Vec<f64>,
    type_index: Vec<usize>,
}

impl UniformAllMove {
    /// One shared step size for all coordinates.
    pub fn new(ndim: usize) -> Self {
        Self {
            ndim,
            step_sizes: vec![DEFAULT_STEP_SIZE],
            type_index: vec![0; ndim],
        }
    }

    /// One step size per coordinate type; `type_ends[t]` is the
    /// one-past-the-end coordinate index of type `t` and the last entry must
    /// equal `ndim`.
    pub fn with_types(ndim: usize, type_ends: &[usize]) -> Result<Self, McError> {
        let type_index = type_index_from_ends(ndim, type_ends)?;
        Ok(Self {
            ndim,
            step_sizes: vec![DEFAULT_STEP_SIZE; type_ends.len()],
            type_index,
        })
    }
}

impl TrialMove for UniformAllMove {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn compute_trial_move(&mut self, wlk: &mut WalkerState, rng: &mut SmallRng) -> f64 {
        for i in 0..self.ndim {
            let step = self.step_sizes[self.type_index[i]];
            wlk.xnew[i] = wlk.xold[i] + step * (rng.gen::<f64>() - 0.5);
        }
        wlk.set_all_changed();
        1.0
    }

    fn n_step_sizes(&self) -> usize {
        self.step_sizes.len()
    }

    fn step_size(&self, i: usize) -> f64 {
        self.step_sizes[i]
    }

    fn set_step_size(&mut self, i: usize, val: f64) {
        self.step_sizes[i] = val;
    }

    fn step_size_index(&self, dim: usize) -> usize {
        self.type_index[dim]
    }
}

/// Symmetric uniform move of a single randomly chosen vector of `veclen`
/// contiguous coordinates (one "particle"). Unchosen coordinates are left
/// untouched, so `xnew` keeps them equal to `xold`.
#[derive(Debug, Clone)]
pub struct UniformVecMove {
    nvec: usize,
    veclen: usize,
    step_sizes: Vec<f64>,
    type_index: Vec<usize>, // one type per vector
}

impl UniformVecMove {
    /// `nvec` vectors of length `veclen`, one shared step size.
    pub fn new(nvec: usize, veclen: usize) -> Self {
        Self {
            nvec,
            veclen,
            step_sizes: vec![DEFAULT_STEP_SIZE],
            type_index: vec![0; nvec],
        }
    }

    /// Builds the mover for a walker of dimension `ndim`, splitting it into
    /// vectors of length `veclen`.
    pub fn for_ndim(ndim: usize, veclen: usize) -> Result<Self, McError> {
        if veclen == 0 || ndim % veclen != 0 {
            return Err(McError::VectorLengthMismatch { ndim, veclen });
        }
        Ok(Self::new(ndim / veclen, veclen))
    }

    /// Per-type step sizes; `type_ends` partitions the vector indices.
    pub fn with_types(nvec: usize, veclen: usize, type_ends: &[usize]) -> Result<Self, McError> {
        let type_index = type_index_from_ends(nvec, type_ends)?;
        Ok(Self {
            nvec,
            veclen,
            step_sizes: vec![DEFAULT_STEP_SIZE; type_ends.len()],
            type_index,
        })
    }
}

impl TrialMove for UniformVecMove {
    fn ndim(&self) -> usize {
        self.nvec * self.veclen
    }

    fn compute_trial_move(&mut self, wlk: &mut WalkerState, rng: &mut SmallRng) -> f64 {
        let j = rng.gen_range(0..self.nvec);
        let step = self.step_sizes[self.type_index[j]];
        for k in 0..self.veclen {
            let idx = j * self.veclen + k;
            wlk.xnew[idx] = wlk.xold[idx] + step * (rng.gen::<f64>() - 0.5);
            wlk.changed_idx[k] = idx; // ascending by construction
        }
        wlk.nchanged = self.veclen;
        1.0
    }

    fn n_step_sizes(&self) -> usize {
        self.step_sizes.len()
    }

    fn step_size(&self, i: usize) -> f64 {
        self.step_sizes[i]
    }

    fn set_step_size(&mut self, i: usize, val: f64) {
        self.step_sizes[i] = val;
    }

    fn step_size_index(&self, dim: usize) -> usize {
        self.type_index[dim / self.veclen]
    }
}

/// Symmetric Gaussian move of all coordinates at once: every coordinate is
/// shifted by a normal deviate with the standard deviation of its type bin.
#[derive(Debug, Clone)]
pub struct GaussianAllMove {
    ndim: usize,
    step_sizes: Vec<f64>,
    type_index: Vec<usize>,
}

impl GaussianAllMove {
    /// One shared standard deviation for all coordinates.
    pub fn new(ndim: usize) -> Self {
        Self {
            ndim,
            step_sizes: vec![DEFAULT_STEP_SIZE],
            type_index: vec![0; ndim],
        }
    }

    /// One standard deviation per coordinate type, partitioned as in
    /// [`UniformAllMove::with_types`].
    pub fn with_types(ndim: usize, type_ends: &[usize]) -> Result<Self, McError> {
        let type_index = type_index_from_ends(ndim, type_ends)?;
        Ok(Self {
            ndim,
            step_sizes: vec![DEFAULT_STEP_SIZE; type_ends.len()],
            type_index,
        })
    }
}

impl TrialMove for GaussianAllMove {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn compute_trial_move(&mut self, wlk: &mut WalkerState, rng: &mut SmallRng) -> f64 {
        for i in 0..self.ndim {
            let sigma = self.step_sizes[self.type_index[i]];
            let z: f64 = rng.sample(StandardNormal);
            wlk.xnew[i] = wlk.xold[i] + sigma * z;
        }
        wlk.set_all_changed();
        1.0
    }

    fn n_step_sizes(&self) -> usize {
        self.step_sizes.len()
    }

    fn step_size(&self, i: usize) -> f64 {
        self.step_sizes[i]
    }

    fn set_step_size(&mut self, i: usize, val: f64) {
        self.step_sizes[i] = val;
    }

    fn step_size_index(&self, dim: usize) -> usize {
        self.type_index[dim]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn all_move_changes_every_coordinate() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut mv = UniformAllMove::new(4);
        let mut wlk = WalkerState::new(4);
        wlk.xold.copy_from_slice(&[0.0, 1.0, 2.0, 3.0]);
        wlk.initialize();
        let acc = mv.compute_trial_move(&mut wlk, &mut rng);
        assert_eq!(acc, 1.0);
        assert_eq!(wlk.nchanged, 4);
        for i in 0..4 {
            assert!((wlk.xnew[i] - wlk.xold[i]).abs() <= 0.5 * DEFAULT_STEP_SIZE);
            assert_ne!(wlk.xnew[i], wlk.xold[i]);
        }
    }

    #[test]
    fn vec_move_touches_one_block_in_ascending_order() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut mv = UniformVecMove::for_ndim(6, 2).unwrap();
        let mut wlk = WalkerState::new(6);
        wlk.xold.copy_from_slice(&[0.0; 6]);
        wlk.initialize();
        mv.compute_trial_move(&mut wlk, &mut rng);
        assert_eq!(wlk.nchanged, 2);
        let (a, b) = (wlk.changed_idx[0], wlk.changed_idx[1]);
        assert_eq!(b, a + 1);
        assert_eq!(a % 2, 0);
        for i in 0..6 {
            if i == a || i == b {
                assert_ne!(wlk.xnew[i], 0.0);
            } else {
                assert_eq!(wlk.xnew[i], 0.0);
            }
        }
    }

    #[test]
    fn gaussian_move_changes_every_coordinate() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut mv = GaussianAllMove::new(3);
        mv.set_step_size(0, 0.2);
        let mut wlk = WalkerState::new(3);
        wlk.initialize();
        let acc = mv.compute_trial_move(&mut wlk, &mut rng);
        assert_eq!(acc, 1.0);
        assert_eq!(wlk.nchanged, 3);
        for i in 0..3 {
            assert_ne!(wlk.xnew[i], wlk.xold[i]);
        }
    }

    #[test]
    fn scaling_preserves_proportions() {
        let mut mv = UniformAllMove::with_types(4, &[2, 4]).unwrap();
        mv.set_step_size(0, 0.1);
        mv.set_step_size(1, 0.4);
        mv.scale_step_sizes(0.5);
        assert_eq!(mv.step_size(0), 0.05);
        assert_eq!(mv.step_size(1), 0.2);
        assert_eq!(mv.step_size_index(1), 0);
        assert_eq!(mv.step_size_index(2), 1);
    }

    #[test]
    fn type_ends_are_validated() {
        assert!(UniformAllMove::with_types(4, &[2, 3]).is_err());
        assert!(UniformAllMove::with_types(4, &[0, 4]).is_err());
        assert!(UniformAllMove::with_types(4, &[3, 2, 4]).is_err());
        assert!(UniformVecMove::for_ndim(5, 2).is_err());
    }
}
