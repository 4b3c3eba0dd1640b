//! The observable container: accumulators paired with estimators.
//!
//! Each added observable is wrapped in an accumulator (chosen by the block
//! count), paired with an estimator kind and an equilibration flag, and
//! driven through the allocate/accumulate/finalize/estimate lifecycle by
//! the integrator.

use crate::accumulator::Accumulator;
use crate::error::McError;
use crate::estimators::{
    mj_blocker_estimator, multidim_fc_blocker_estimator, multidim_uncorrelated_estimator,
};
use crate::observable::ObservableFunction;
use crate::pdf::PdfContainer;
use crate::walker::WalkerState;

/// How stored samples are turned into a mean-and-error pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    /// Plain mean, error fixed to zero.
    Noop,
    /// Mean and error assuming uncorrelated samples.
    Uncorrelated,
    /// Flyvbjerg–Petersen pairwise-blocking error with plateau detection.
    Correlated,
    /// Automated blocking (chi-squared truncation-level selection).
    Automatic,
}

struct ObservableEntry {
    accu: Accumulator,
    kind: EstimatorKind,
    flag_equil: bool,
}

/// Ordered collection of (accumulator, estimator, equilibration-flag)
/// triples.
#[derive(Default)]
pub struct ObservableContainer {
    entries: Vec<ObservableEntry>,
    nobsdim: usize,
    nskip_pdf: usize,
}

impl ObservableContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observable. `nblocks` selects the storage strategy: `0` a
    /// running sum (mean-only estimate, `kind` is forced to
    /// [`EstimatorKind::Noop`]), `1` the full trace, `>1` that many fixed
    /// blocks. `nskip` evaluates the observable only on every nskip-th
    /// step. Equilibration requires an estimator with error calculation.
    pub fn add_observable(
        &mut self,
        obs: Box<dyn ObservableFunction>,
        nblocks: usize,
        nskip: usize,
        flag_equil: bool,
        kind: EstimatorKind,
    ) -> Result<(), McError> {
        if flag_equil && (kind == EstimatorKind::Noop || nblocks == 0) {
            return Err(McError::EquilibrationWithoutError);
        }
        let kind = if nblocks == 0 { EstimatorKind::Noop } else { kind };
        let nobs = obs.nobs();
        let accu = match nblocks {
            0 => Accumulator::simple(obs, nskip),
            1 => Accumulator::full(obs, nskip),
            n => Accumulator::block(obs, nskip, n),
        };
        self.entries.push(ObservableEntry { accu, kind, flag_equil });
        self.nobsdim += nobs;
        Ok(())
    }

    /// Removes the most recently added observable and hands it back.
    pub fn pop_observable(&mut self) -> Option<Box<dyn ObservableFunction>> {
        let entry = self.entries.pop()?;
        self.nobsdim -= entry.accu.n_obs();
        Some(entry.accu.into_observable())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.nobsdim = 0;
        self.nskip_pdf = 0;
    }

    /// Number of observables.
    pub fn n_obs(&self) -> usize {
        self.entries.len()
    }

    /// Total number of observable dimensions.
    pub fn n_obs_dim(&self) -> usize {
        self.nobsdim
    }

    pub fn flag_equil(&self, i: usize) -> bool {
        self.entries[i].flag_equil
    }

    pub fn observable(&self, i: usize) -> &dyn ObservableFunction {
        self.entries[i].accu.observable()
    }

    /// Whether any contained observable reads sampling-function state.
    pub fn depends_on_pdf(&self) -> bool {
        self.nskip_pdf != 0
    }

    /// Smallest `nskip` among PDF-dependent observables, 0 if there are
    /// none.
    pub fn n_skip_pdf(&self) -> usize {
        self.nskip_pdf
    }

    /// Allocates every accumulator for a run of `nmc` steps and works out
    /// whether the run needs PDF observation callbacks.
    pub fn allocate(&mut self, nmc: u64, pdfcont: &PdfContainer) -> Result<(), McError> {
        for entry in &mut self.entries {
            entry.accu.allocate(nmc)?;
        }
        self.nskip_pdf = if pdfcont.has_pdf() {
            self.entries
                .iter()
                .filter(|e| e.accu.observable().needs_pdf())
                .map(|e| e.accu.n_skip())
                .min()
                .unwrap_or(0)
        } else {
            0
        };
        Ok(())
    }

    /// Dispatches one sampling step to every accumulator.
    pub fn accumulate(&mut self, wlk: &WalkerState) -> Result<(), McError> {
        for entry in &mut self.entries {
            entry.accu.accumulate(wlk)?;
        }
        Ok(())
    }

    /// Normalizes every accumulator's stored data.
    pub fn finalize(&mut self) -> Result<(), McError> {
        for entry in &mut self.entries {
            entry.accu.finalize()?;
        }
        Ok(())
    }

    /// Runs each paired estimator on its accumulator's stored data,
    /// returning concatenated per-dimension means and one-sigma errors.
    pub fn estimate(&self) -> Result<(Vec<f64>, Vec<f64>), McError> {
        let mut avg = Vec::with_capacity(self.nobsdim);
        let mut err = Vec::with_capacity(self.nobsdim);
        for entry in &self.entries {
            if !entry.accu.is_finalized() {
                return Err(McError::NotFinalized);
            }
            let nobs = entry.accu.n_obs();
            let data = entry.accu.data();
            let (a, e) = match entry.kind {
                EstimatorKind::Noop => {
                    let nstore = entry.accu.n_store() as usize;
                    let mut means = vec![0.0; nobs];
                    for row in 0..nstore {
                        for j in 0..nobs {
                            means[j] += data[row * nobs + j];
                        }
                    }
                    for m in &mut means {
                        *m /= nstore.max(1) as f64;
                    }
                    (means, vec![0.0; nobs])
                }
                EstimatorKind::Uncorrelated => multidim_uncorrelated_estimator(data, nobs)?,
                EstimatorKind::Correlated => multidim_fc_blocker_estimator(data, nobs)?,
                EstimatorKind::Automatic => mj_blocker_estimator(data, nobs)?,
            };
            avg.extend_from_slice(&a);
            err.extend_from_slice(&e);
        }
        Ok((avg, err))
    }

    /// Resets every accumulator to a clean state without deallocating.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.accu.reset();
        }
    }

    /// Releases every accumulator's storage.
    pub fn deallocate(&mut self) {
        for entry in &mut self.entries {
            entry.accu.deallocate();
        }
    }

    /// Writes each accumulator's last observable values, space-separated,
    /// to `out` (used for the observable trace file).
    pub fn write_obs_values(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for entry in &self.entries {
            for v in entry.accu.obs_values() {
                write!(out, " {}", v)?;
            }
        }
        Ok(())
    }
}
