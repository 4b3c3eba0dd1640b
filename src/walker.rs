//! The shared per-step walker record.
//!
//! A [`WalkerState`] carries the accepted position `xold`, the proposed
//! position `xnew` and the bookkeeping a trial move fills in: how many
//! coordinates differ between the two and which ones. Trial moves never
//! mutate `xold`; only the commit after an accepted step does.

/// Per-step record shared between the integrator, trial moves, sampling
/// functions and accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkerState {
    /// Position of the last accepted step.
    pub xold: Vec<f64>,
    /// Proposed position for the current step.
    pub xnew: Vec<f64>,
    /// Number of coordinates differing between old and new (`0..=ndim`).
    /// When equal to `ndim`, `changed_idx` is treated as enumerating all
    /// coordinates and may be ignored.
    pub nchanged: usize,
    /// The first `nchanged` entries are the changed coordinate indices, in
    /// ascending order when produced by block moves.
    pub changed_idx: Vec<usize>,
    /// Outcome of the last accept/reject decision.
    pub accepted: bool,
}

impl WalkerState {
    pub fn new(ndim: usize) -> Self {
        Self {
            xold: vec![0.0; ndim],
            xnew: vec![0.0; ndim],
            nchanged: 0,
            changed_idx: vec![0; ndim],
            accepted: false,
        }
    }

    pub fn ndim(&self) -> usize {
        self.xold.len()
    }

    /// Prepares the record for a fresh sampling run: `xnew` mirrors `xold`
    /// and every coordinate counts as changed, so the first evaluation of
    /// any consumer sees a full update.
    pub fn initialize(&mut self) {
        self.xnew.copy_from_slice(&self.xold);
        self.set_all_changed();
        self.accepted = false;
    }

    /// Marks every coordinate as changed.
    pub fn set_all_changed(&mut self) {
        self.nchanged = self.ndim();
        for (i, idx) in self.changed_idx.iter_mut().enumerate() {
            *idx = i;
        }
    }

    /// Commits an accepted proposal.
    pub fn new_to_old(&mut self) {
        self.xold.copy_from_slice(&self.xnew);
    }

    /// Rolls a rejected proposal back.
    pub fn old_to_new(&mut self) {
        self.xnew.copy_from_slice(&self.xold);
    }
}
