//! Observable accumulation during sampling.
//!
//! An [`Accumulator`] wraps a single observable, decides on every step
//! whether the observable needs re-evaluation (tracking which coordinates
//! changed since the last one) and stores the results with one of three
//! strategies:
//!
//! - **simple**: a running sum, one slot per observable value;
//! - **block**: a fixed number of blocks, each the mean of its fill;
//! - **full**: every accumulated evaluation is kept.
//!
//! Lifecycle: `allocate → nsteps × accumulate → finalize → data`
//! (`→ reset → accumulate …`), and `deallocate` releases the storage.
//! Storage is also released on drop and on the next `allocate`.

use crate::error::McError;
use crate::observable::ObservableFunction;
use crate::walker::WalkerState;

#[derive(Debug)]
enum Storage {
    Simple,
    Block {
        nblocks: usize,
        bsize: u64,
        blockidx: usize,
        in_block: u64,
        counts: Vec<u64>,
    },
    Full,
}

/// Accumulates the values of one observable over a sampling run.
pub struct Accumulator {
    obs: Box<dyn ObservableFunction>,
    flag_updobs: bool,
    nobs: usize,
    xndim: usize,
    nskip: usize,

    obs_values: Vec<f64>,
    flags_xchanged: Vec<bool>,
    nchanged: usize,

    nsteps: u64,
    stepidx: u64,
    skipidx: usize,
    storeidx: u64,
    flag_final: bool,

    data: Vec<f64>,
    storage: Storage,
}

impl Accumulator {
    fn new(obs: Box<dyn ObservableFunction>, nskip: usize, storage: Storage) -> Self {
        let nobs = obs.nobs();
        let xndim = obs.ndim();
        let flag_updobs = obs.is_updateable();
        Self {
            obs,
            flag_updobs,
            nobs,
            xndim,
            nskip: nskip.max(1),
            obs_values: vec![0.0; nobs],
            // everything counts as changed before the first evaluation
            flags_xchanged: vec![true; xndim],
            nchanged: xndim,
            nsteps: 0,
            stepidx: 0,
            skipidx: 0,
            storeidx: 0,
            flag_final: false,
            data: Vec::new(),
            storage,
        }
    }

    /// Running-sum storage.
    pub fn simple(obs: Box<dyn ObservableFunction>, nskip: usize) -> Self {
        Self::new(obs, nskip, Storage::Simple)
    }

    /// Fixed-block storage with `nblocks` blocks.
    pub fn block(obs: Box<dyn ObservableFunction>, nskip: usize, nblocks: usize) -> Self {
        Self::new(
            obs,
            nskip,
            Storage::Block {
                nblocks: nblocks.max(1),
                bsize: 0,
                blockidx: 0,
                in_block: 0,
                counts: Vec::new(),
            },
        )
    }

    /// Full-trace storage.
    pub fn full(obs: Box<dyn ObservableFunction>, nskip: usize) -> Self {
        Self::new(obs, nskip, Storage::Full)
    }

    pub fn observable(&self) -> &dyn ObservableFunction {
        self.obs.as_ref()
    }

    /// Consumes the accumulator, handing the observable back.
    pub fn into_observable(self) -> Box<dyn ObservableFunction> {
        self.obs
    }

    pub fn n_obs(&self) -> usize {
        self.nobs
    }

    pub fn ndim(&self) -> usize {
        self.xndim
    }

    pub fn n_skip(&self) -> usize {
        self.nskip
    }

    pub fn n_steps(&self) -> u64 {
        self.nsteps
    }

    /// Number of observable evaluations a full run will accumulate.
    pub fn n_accu(&self) -> u64 {
        if self.nsteps > 0 {
            1 + (self.nsteps - 1) / self.nskip as u64
        } else {
            0
        }
    }

    /// Number of stored elements of length `nobs` each.
    pub fn n_store(&self) -> u64 {
        match &self.storage {
            Storage::Simple => u64::from(self.nsteps > 0),
            Storage::Block { nblocks, .. } => {
                if self.nsteps > 0 {
                    *nblocks as u64
                } else {
                    0
                }
            }
            Storage::Full => self.n_accu(),
        }
    }

    pub fn n_data(&self) -> u64 {
        self.n_store() * self.nobs as u64
    }

    pub fn step_index(&self) -> u64 {
        self.stepidx
    }

    pub fn is_allocated(&self) -> bool {
        self.nsteps > 0
    }

    pub fn is_clean(&self) -> bool {
        self.stepidx == 0
    }

    pub fn is_finalized(&self) -> bool {
        self.flag_final
    }

    pub fn is_updateable(&self) -> bool {
        self.flag_updobs
    }

    /// Read-only view of the stored data (interleaved, `n_store × nobs`).
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// The last evaluated observable values.
    pub fn obs_values(&self) -> &[f64] {
        &self.obs_values
    }

    /// Prepares storage for a run of `nsteps` accumulate calls. Any
    /// existing allocation is released first; `nsteps == 0` just
    /// deallocates.
    pub fn allocate(&mut self, nsteps: u64) -> Result<(), McError> {
        self.deallocate();
        if nsteps == 0 {
            return Ok(());
        }
        self.nsteps = nsteps;
        let naccu = self.n_accu();
        if let Storage::Block { nblocks, bsize, counts, .. } = &mut self.storage {
            if *nblocks as u64 > naccu {
                let nblocks = *nblocks;
                self.nsteps = 0;
                return Err(McError::TooManyBlocks { nblocks, naccu });
            }
            *bsize = naccu.div_ceil(*nblocks as u64);
            *counts = vec![0; *nblocks];
        }
        self.data = vec![0.0; self.n_data() as usize];
        Ok(())
    }

    /// Processes one sampling step.
    pub fn accumulate(&mut self, wlk: &WalkerState) -> Result<(), McError> {
        if self.stepidx >= self.nsteps {
            return Err(McError::AccumulationOverflow { nsteps: self.nsteps });
        }

        // coordinates only change on accepted steps
        if wlk.accepted {
            if wlk.nchanged < self.xndim {
                for &idx in &wlk.changed_idx[..wlk.nchanged] {
                    if !self.flags_xchanged[idx] {
                        self.flags_xchanged[idx] = true;
                        self.nchanged += 1;
                    }
                }
            } else {
                self.flags_xchanged.fill(true);
                self.nchanged = self.xndim;
            }
        }

        if self.skipidx == 0 {
            if self.nchanged > 0 {
                if self.flag_updobs && self.nchanged < self.xndim {
                    self.obs.updated_observable(
                        &wlk.xnew,
                        self.nchanged,
                        &self.flags_xchanged,
                        &mut self.obs_values,
                    );
                } else {
                    self.obs.observable_function(&wlk.xnew, &mut self.obs_values);
                }
                self.flags_xchanged.fill(false);
                self.nchanged = 0;
            } // else: nothing changed since the last evaluation, store it again
            self.store();
        }

        self.stepidx += 1;
        self.skipidx += 1;
        if self.skipidx == self.nskip {
            self.skipidx = 0;
        }
        Ok(())
    }

    fn store(&mut self) {
        match &mut self.storage {
            Storage::Simple => {
                for (slot, v) in self.data.iter_mut().zip(self.obs_values.iter()) {
                    *slot += v;
                }
            }
            Storage::Block { bsize, blockidx, in_block, counts, .. } => {
                let offset = *blockidx * self.nobs;
                for (slot, v) in self.data[offset..offset + self.nobs]
                    .iter_mut()
                    .zip(self.obs_values.iter())
                {
                    *slot += v;
                }
                counts[*blockidx] += 1;
                *in_block += 1;
                if *in_block == *bsize {
                    *blockidx += 1;
                    *in_block = 0;
                }
            }
            Storage::Full => {
                let offset = self.storeidx as usize * self.nobs;
                self.data[offset..offset + self.nobs].copy_from_slice(&self.obs_values);
            }
        }
        self.storeidx += 1;
    }

    /// Applies normalization to the stored data. Errors if the planned
    /// number of steps has not been consumed; a no-op when deallocated or
    /// already finalized.
    pub fn finalize(&mut self) -> Result<(), McError> {
        if !self.is_allocated() || self.flag_final {
            return Ok(());
        }
        if self.stepidx != self.nsteps {
            return Err(McError::PrematureFinalize {
                expected: self.nsteps,
                done: self.stepidx,
            });
        }
        match &self.storage {
            Storage::Simple => {
                let n = self.storeidx as f64;
                for slot in &mut self.data {
                    *slot /= n; // by the number of evaluations actually summed
                }
            }
            Storage::Block { counts, .. } => {
                for (b, &count) in counts.iter().enumerate() {
                    if count > 0 {
                        let offset = b * self.nobs;
                        for slot in &mut self.data[offset..offset + self.nobs] {
                            *slot /= count as f64;
                        }
                    }
                }
            }
            Storage::Full => {}
        }
        self.flag_final = true;
        Ok(())
    }

    /// Returns to a clean pre-accumulation state without releasing storage.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.obs_values.fill(0.0);
        self.flags_xchanged.fill(true);
        self.nchanged = self.xndim;
        self.stepidx = 0;
        self.skipidx = 0;
        self.storeidx = 0;
        self.flag_final = false;
        if let Storage::Block { blockidx, in_block, counts, .. } = &mut self.storage {
            *blockidx = 0;
            *in_block = 0;
            counts.fill(0);
        }
    }

    /// Releases the storage; the accumulator can be allocated again.
    pub fn deallocate(&mut self) {
        self.reset();
        self.data = Vec::new();
        self.nsteps = 0;
        if let Storage::Block { bsize, counts, .. } = &mut self.storage {
            *bsize = 0;
            *counts = Vec::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Observable returning the position itself, with a selective path.
    struct Position {
        ndim: usize,
    }

    impl ObservableFunction for Position {
        fn ndim(&self) -> usize {
            self.ndim
        }

        fn nobs(&self) -> usize {
            self.ndim
        }

        fn observable_function(&self, x: &[f64], out: &mut [f64]) {
            out.copy_from_slice(x);
        }

        fn is_updateable(&self) -> bool {
            true
        }

        fn updated_observable(&self, x: &[f64], _nchanged: usize, flags: &[bool], out: &mut [f64]) {
            for (i, &flag) in flags.iter().enumerate() {
                if flag {
                    out[i] = x[i];
                }
            }
        }

        fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
            Box::new(Position { ndim: self.ndim })
        }
    }

    fn feed(accu: &mut Accumulator, steps: &[(f64, bool)]) {
        let mut wlk = WalkerState::new(1);
        for &(x, accepted) in steps {
            wlk.xnew[0] = x;
            wlk.set_all_changed();
            wlk.accepted = accepted;
            accu.accumulate(&wlk).unwrap();
        }
        accu.finalize().unwrap();
    }

    #[test]
    fn simple_accumulator_averages_evaluations() {
        let mut accu = Accumulator::simple(Box::new(Position { ndim: 1 }), 1);
        accu.allocate(4).unwrap();
        feed(&mut accu, &[(1.0, true), (3.0, true), (3.0, false), (5.0, true)]);
        // rejected step re-stores the previous value: (1 + 3 + 3 + 5) / 4
        assert_eq!(accu.data(), &[3.0]);
        assert!(accu.is_finalized());
        assert_eq!(accu.step_index(), 4);
    }

    #[test]
    fn nskip_evaluates_every_nth_step() {
        let mut accu = Accumulator::full(Box::new(Position { ndim: 1 }), 2);
        accu.allocate(5).unwrap();
        assert_eq!(accu.n_accu(), 3);
        feed(
            &mut accu,
            &[(1.0, true), (2.0, true), (3.0, true), (4.0, true), (5.0, true)],
        );
        // steps 0, 2, 4 are evaluation steps
        assert_eq!(accu.data(), &[1.0, 3.0, 5.0]);
    }

    #[test]
    fn skipped_changes_are_remembered_via_flags() {
        // with nskip 2, an accepted change on a skipped step must still
        // trigger re-evaluation on the next evaluation step
        let mut accu = Accumulator::full(Box::new(Position { ndim: 1 }), 2);
        accu.allocate(4).unwrap();
        feed(
            &mut accu,
            &[(1.0, true), (2.0, true), (2.0, false), (9.0, false)],
        );
        assert_eq!(accu.data(), &[1.0, 2.0]);
    }

    #[test]
    fn block_accumulator_normalizes_each_block() {
        let mut accu = Accumulator::block(Box::new(Position { ndim: 1 }), 1, 2);
        accu.allocate(4).unwrap();
        feed(&mut accu, &[(1.0, true), (3.0, true), (4.0, true), (8.0, true)]);
        assert_eq!(accu.data(), &[2.0, 6.0]);
    }

    #[test]
    fn too_many_blocks_is_rejected() {
        let mut accu = Accumulator::block(Box::new(Position { ndim: 1 }), 1, 8);
        let err = accu.allocate(4).unwrap_err();
        assert!(matches!(err, McError::TooManyBlocks { nblocks: 8, naccu: 4 }));
        assert!(!accu.is_allocated());
    }

    #[test]
    fn lifecycle_errors() {
        let mut accu = Accumulator::simple(Box::new(Position { ndim: 1 }), 1);
        accu.allocate(2).unwrap();
        let wlk = {
            let mut w = WalkerState::new(1);
            w.xnew[0] = 1.0;
            w.set_all_changed();
            w.accepted = true;
            w
        };
        accu.accumulate(&wlk).unwrap();
        assert!(matches!(
            accu.finalize(),
            Err(McError::PrematureFinalize { expected: 2, done: 1 })
        ));
        accu.accumulate(&wlk).unwrap();
        assert!(matches!(
            accu.accumulate(&wlk),
            Err(McError::AccumulationOverflow { .. })
        ));
        accu.finalize().unwrap();
        accu.finalize().unwrap(); // repeated finalize is a no-op
    }

    #[test]
    fn reset_reproduces_identical_data() {
        let steps = [(0.5, true), (1.5, true), (1.5, false), (-2.0, true)];
        let mut accu = Accumulator::full(Box::new(Position { ndim: 1 }), 1);
        accu.allocate(4).unwrap();
        feed(&mut accu, &steps);
        let first: Vec<f64> = accu.data().to_vec();

        accu.reset();
        assert!(accu.is_clean());
        assert!(!accu.is_finalized());
        feed(&mut accu, &steps);
        assert_eq!(accu.data(), first.as_slice());
    }
}
