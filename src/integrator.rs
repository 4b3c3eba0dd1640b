//! The top-level Monte Carlo integrator.
//!
//! An [`Integrator`] owns the walker, the domain, one trial mover, the
//! sampling-function container and the observable container, plus a single
//! seeded random stream shared by proposals and acceptance draws. The main
//! entry point is [`Integrator::integrate`]; step-size auto-tuning
//! ([`Integrator::find_mrt2_step`]) and automatic equilibration
//! ([`Integrator::initial_decorrelation`]) run before the main sampling
//! loop when requested.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};

use crate::container::{EstimatorKind, ObservableContainer};
use crate::domain::Domain;
use crate::error::McError;
use crate::moves::{TrialMove, UniformAllMove};
use crate::observable::ObservableFunction;
use crate::pdf::{PdfContainer, SamplingFunction};
use crate::walker::WalkerState;

/// Acceptance-rate tolerance of the step-size tuner.
const TOLERANCE: f64 = 0.05;
/// Consecutive in-tolerance iterations the tuner needs before stopping.
const MIN_CONS: u32 = 5;

struct TraceSpec {
    path: PathBuf,
    freq: u64,
}

/// Monte Carlo integrator with Metropolis sampling.
pub struct Integrator {
    ndim: usize,
    wlk: WalkerState,
    domain: Domain,
    trial_move: Box<dyn TrialMove>,
    pdfcont: PdfContainer,
    obscont: ObservableContainer,

    seed: u64,
    rng: SmallRng,

    target_acc_rate: f64,
    n_find_mrt2_iterations: i64,
    n_decorrelation_steps: i64,
    nranks: usize,

    acc: u64,
    rej: u64,

    obs_trace: Option<TraceSpec>,
    wlk_trace: Option<TraceSpec>,
    callback: Option<Box<dyn FnMut(&WalkerState)>>,
}

impl Integrator {
    /// A fresh integrator for `ndim`-dimensional walkers: unbounded domain,
    /// uniform all-coordinate mover, entropy-seeded random stream, auto
    /// step finding (up to 50 iterations) and auto decorrelation (up to
    /// 10000 steps).
    pub fn new(ndim: usize) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            ndim,
            wlk: WalkerState::new(ndim),
            domain: Domain::unbounded(ndim),
            trial_move: Box::new(UniformAllMove::new(ndim)),
            pdfcont: PdfContainer::new(),
            obscont: ObservableContainer::new(),
            seed,
            rng: SmallRng::seed_from_u64(seed),
            target_acc_rate: 0.5,
            n_find_mrt2_iterations: -50,
            n_decorrelation_steps: -10000,
            nranks: 1,
            acc: 0,
            rej: 0,
            obs_trace: None,
            wlk_trace: None,
            callback: None,
        }
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// The seed of the random stream.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Current walker position.
    pub fn x(&self) -> &[f64] {
        &self.wlk.xold
    }

    /// Acceptance rate of the last sampling run.
    pub fn acceptance_rate(&self) -> f64 {
        if self.acc > 0 {
            self.acc as f64 / (self.acc + self.rej) as f64
        } else {
            0.0
        }
    }

    /// Total number of observable dimensions currently registered.
    pub fn n_obs_dim(&self) -> usize {
        self.obscont.n_obs_dim()
    }

    // --- Domain

    /// Installs a domain, returning the previous one. The walker position
    /// is folded into the new domain.
    pub fn set_domain(&mut self, domain: Domain) -> Result<Domain, McError> {
        if domain.ndim() != self.ndim {
            return Err(McError::DimensionMismatch {
                expected: self.ndim,
                found: domain.ndim(),
            });
        }
        let old = std::mem::replace(&mut self.domain, domain);
        self.domain.apply(&mut self.wlk.xold);
        Ok(old)
    }

    /// Reverts to the unbounded domain, returning the previous one.
    pub fn reset_domain(&mut self) -> Domain {
        std::mem::replace(&mut self.domain, Domain::unbounded(self.ndim))
    }

    /// Periodic box with the same bounds in every dimension.
    pub fn set_i_range(&mut self, lb: f64, ub: f64) -> Result<(), McError> {
        self.set_domain(Domain::ortho_periodic_uniform(self.ndim, lb, ub)?)
            .map(|_| ())
    }

    /// Periodic box with per-dimension bounds.
    pub fn set_i_range_per_dim(&mut self, lb: &[f64], ub: &[f64]) -> Result<(), McError> {
        self.set_domain(Domain::ortho_periodic(lb.to_vec(), ub.to_vec())?)
            .map(|_| ())
    }

    // --- Trial moves

    /// Installs a proposal kernel, returning the previously installed one.
    pub fn set_trial_move(
        &mut self,
        tmove: Box<dyn TrialMove>,
    ) -> Result<Box<dyn TrialMove>, McError> {
        if tmove.ndim() != self.ndim {
            return Err(McError::DimensionMismatch {
                expected: self.ndim,
                found: tmove.ndim(),
            });
        }
        Ok(std::mem::replace(&mut self.trial_move, tmove))
    }

    /// Sets every step size to `step`.
    pub fn set_mrt2_step(&mut self, step: f64) {
        for i in 0..self.trial_move.n_step_sizes() {
            self.trial_move.set_step_size(i, step);
        }
    }

    /// Sets the step size of bin `i`; out-of-range indices are ignored with
    /// a warning.
    pub fn set_mrt2_step_at(&mut self, i: usize, step: f64) {
        if i < self.trial_move.n_step_sizes() {
            self.trial_move.set_step_size(i, step);
        } else {
            log::warn!("tried to set non-existing step-size index {}", i);
        }
    }

    /// Sets step sizes from a slice, up to the number of available bins.
    pub fn set_mrt2_steps(&mut self, steps: &[f64]) {
        let n = self.trial_move.n_step_sizes().min(steps.len());
        for (i, &s) in steps.iter().take(n).enumerate() {
            self.trial_move.set_step_size(i, s);
        }
    }

    /// Step size of bin `i`, 0 for out-of-range indices.
    pub fn mrt2_step(&self, i: usize) -> f64 {
        if i < self.trial_move.n_step_sizes() {
            self.trial_move.step_size(i)
        } else {
            0.0
        }
    }

    // --- Sampling functions

    pub fn add_sampling_function(&mut self, pdf: Box<dyn SamplingFunction>) -> Result<(), McError> {
        if pdf.ndim() != self.ndim {
            return Err(McError::DimensionMismatch {
                expected: self.ndim,
                found: pdf.ndim(),
            });
        }
        self.pdfcont.add_sampling_function(pdf);
        Ok(())
    }

    pub fn clear_sampling_functions(&mut self) {
        self.pdfcont.clear();
    }

    // --- Observables

    /// Registers an observable. See
    /// [`ObservableContainer::add_observable`] for the meaning of
    /// `nblocks`, `nskip`, `flag_equil` and `kind`.
    pub fn add_observable(
        &mut self,
        obs: Box<dyn ObservableFunction>,
        nblocks: usize,
        nskip: usize,
        flag_equil: bool,
        kind: EstimatorKind,
    ) -> Result<(), McError> {
        if obs.ndim() != self.ndim {
            return Err(McError::DimensionMismatch {
                expected: self.ndim,
                found: obs.ndim(),
            });
        }
        self.obscont.add_observable(obs, nblocks, nskip, flag_equil, kind)
    }

    /// Removes the most recently added observable and hands it back.
    pub fn pop_observable(&mut self) -> Option<Box<dyn ObservableFunction>> {
        self.obscont.pop_observable()
    }

    pub fn clear_observables(&mut self) {
        self.obscont.clear();
    }

    // --- Controls

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
    }

    pub fn set_target_acceptance_rate(&mut self, rate: f64) {
        self.target_acc_rate = rate;
    }

    /// Negative `n` means auto-tune with at most `|n|` iterations; positive
    /// means exactly `n` iterations; 0 disables tuning.
    pub fn set_n_find_mrt2_iterations(&mut self, n: i64) {
        self.n_find_mrt2_iterations = n;
    }

    /// Negative `n` means automatic equilibration capped at `|n|` steps;
    /// positive means exactly `n` steps; 0 skips equilibration.
    pub fn set_n_decorrelation_steps(&mut self, n: i64) {
        self.n_decorrelation_steps = n;
    }

    /// Number of cooperating workers; only used to size the automatic
    /// statistics so aggregate work stays constant across an ensemble.
    pub fn set_nranks(&mut self, nranks: usize) {
        self.nranks = nranks.max(1);
    }

    /// Per-step callback, invoked once at sampling initialization and once
    /// per step after the accept/reject decision.
    pub fn set_callback(&mut self, cb: Box<dyn FnMut(&WalkerState)>) {
        self.callback = Some(cb);
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    // --- Walker initialization utilities

    /// Sets the walker position, folding it into the domain.
    pub fn set_x(&mut self, x: &[f64]) -> Result<(), McError> {
        if x.len() != self.ndim {
            return Err(McError::DimensionMismatch {
                expected: self.ndim,
                found: x.len(),
            });
        }
        self.wlk.xold.copy_from_slice(x);
        self.domain.apply(&mut self.wlk.xold);
        Ok(())
    }

    /// Sets a single walker coordinate, folding the position into the
    /// domain.
    pub fn set_x_at(&mut self, i: usize, val: f64) -> Result<(), McError> {
        if i >= self.ndim {
            return Err(McError::DimensionMismatch {
                expected: self.ndim,
                found: i + 1,
            });
        }
        self.wlk.xold[i] = val;
        self.domain.apply(&mut self.wlk.xold);
        Ok(())
    }

    /// Applies one trial move to the stored walker position.
    pub fn move_x(&mut self) {
        self.wlk.old_to_new();
        self.trial_move.compute_trial_move(&mut self.wlk, &mut self.rng);
        self.domain.apply_selective(&mut self.wlk);
        self.wlk.new_to_old();
    }

    /// Draws a fresh uniform position inside the domain.
    pub fn new_random_x(&mut self) {
        for x in &mut self.wlk.xnew {
            *x = self.rng.gen();
        }
        self.domain.scale_to_domain(&mut self.wlk.xnew);
        self.wlk.new_to_old();
    }

    // --- Trace files

    /// Writes observable values to `path` on every `freq`-th step of the
    /// next main sampling run.
    pub fn store_observables_on_file(&mut self, path: impl Into<PathBuf>, freq: u64) {
        self.obs_trace = Some(TraceSpec {
            path: path.into(),
            freq: freq.max(1),
        });
    }

    pub fn clear_observable_file(&mut self) {
        self.obs_trace = None;
    }

    /// Writes walker positions to `path` on every `freq`-th step of the
    /// next main sampling run.
    pub fn store_walker_positions_on_file(&mut self, path: impl Into<PathBuf>, freq: u64) {
        self.wlk_trace = Some(TraceSpec {
            path: path.into(),
            freq: freq.max(1),
        });
    }

    pub fn clear_walker_file(&mut self) {
        self.wlk_trace = None;
    }

    // --- Integration

    /// Estimates the integrals of all registered observables from `nmc`
    /// sampling steps, returning per-dimension means and one-sigma errors.
    ///
    /// With a sampling function installed, `do_find_step` tunes step sizes
    /// toward the target acceptance rate and `do_decorrelate` discards
    /// early samples first. Without one, positions are drawn uniformly and
    /// the results are scaled by the domain volume, which then must be
    /// finite.
    pub fn integrate(
        &mut self,
        nmc: i64,
        do_find_step: bool,
        do_decorrelate: bool,
    ) -> Result<(Vec<f64>, Vec<f64>), McError> {
        if nmc < 0 {
            return Err(McError::NegativeSampleCount(nmc));
        }
        if !self.pdfcont.has_pdf() && !self.domain.is_finite() {
            return Err(McError::InfiniteDomain);
        }
        if self.pdfcont.has_pdf() {
            if do_find_step {
                self.find_mrt2_step()?;
            }
            if do_decorrelate {
                self.initial_decorrelation()?;
            }
        }

        let nobsdim = self.obscont.n_obs_dim();
        if nmc == 0 {
            return Ok((vec![0.0; nobsdim], vec![0.0; nobsdim]));
        }

        // the container is moved out for the run and restored afterwards,
        // with its storage released on every exit path
        let mut cont = std::mem::take(&mut self.obscont);
        let result = (|| {
            cont.allocate(nmc as u64, &self.pdfcont)?;
            self.run_sampling(nmc as u64, Some(&mut cont), true)?;
            cont.estimate()
        })();
        cont.deallocate();
        self.obscont = cont;
        let (mut avg, mut err) = result?;

        if !self.pdfcont.has_pdf() {
            let vol = self.domain.volume();
            for v in avg.iter_mut() {
                *v *= vol;
            }
            for v in err.iter_mut() {
                *v *= vol;
            }
        }
        Ok((avg, err))
    }

    /// Minimum per-iteration statistics of the automatic loops, divided by
    /// the worker count so aggregate work stays constant.
    fn min_auto_steps(&self) -> u64 {
        100f64.max(((40000.0 * self.ndim as f64).sqrt() / self.nranks as f64).ceil()) as u64
    }

    /// Tunes step sizes toward the target acceptance rate by multiplicative
    /// scaling, clamped per iteration to [0.5, 2]. Stops after the measured
    /// rate stayed within tolerance for five consecutive iterations, or at
    /// the configured iteration cap. A no-op for movers without adjustable
    /// step sizes.
    pub fn find_mrt2_step(&mut self) -> Result<(), McError> {
        if !self.trial_move.has_step_sizes() {
            return Ok(());
        }
        let n_step_sizes = self.trial_move.n_step_sizes();
        let min_stat = self.min_auto_steps();
        let smallest = f32::MIN_POSITIVE as f64;
        let dim_sizes = self.domain.sizes();
        let step_size_idx: Vec<usize> = (0..self.ndim)
            .map(|i| self.trial_move.step_size_index(i))
            .collect();

        let nit = self.n_find_mrt2_iterations;
        let mut cons_count = 0u32;
        let mut counter: i64 = 0;
        while (nit < 0 && cons_count < MIN_CONS) || counter < nit {
            self.run_sampling(min_stat, None, false)?;
            let rate = self.acceptance_rate();

            if (rate - self.target_acc_rate).abs() < TOLERANCE {
                cons_count += 1;
            } else {
                cons_count = 0;
            }

            let fact = (rate / self.target_acc_rate).max(0.5).min(2.0);
            self.trial_move.scale_step_sizes(fact);

            // keep large step sizes in check
            for (i, &idx) in step_size_idx.iter().enumerate() {
                if self.trial_move.step_size(idx) > 0.5 * dim_sizes[i] {
                    self.trial_move.set_step_size(idx, 0.5 * dim_sizes[i]);
                }
            }
            // keep small step sizes in check
            for j in 0..n_step_sizes {
                if self.trial_move.step_size(j) < smallest {
                    self.trial_move.set_step_size(j, smallest);
                }
            }

            counter += 1;
            if nit < 0 && counter >= nit.abs() {
                break;
            }
        }
        Ok(())
    }

    /// Discards early samples until the observables flagged for
    /// equilibration are statistically stable, or runs/skips a fixed number
    /// of steps depending on the configured decorrelation count.
    pub fn initial_decorrelation(&mut self) -> Result<(), McError> {
        if self.n_decorrelation_steps < 0 {
            // mirror the flagged observables in a temporary container with
            // full storage and correlated error estimation
            let mut obs_equil = ObservableContainer::new();
            for i in 0..self.obscont.n_obs() {
                if self.obscont.flag_equil(i) {
                    obs_equil.add_observable(
                        self.obscont.observable(i).clone_boxed(),
                        1,
                        1,
                        true,
                        EstimatorKind::Correlated,
                    )?;
                }
            }

            let min_nmc = self.min_auto_steps();
            obs_equil.allocate(min_nmc, &self.pdfcont)?;

            self.run_sampling(min_nmc, Some(&mut obs_equil), false)?;
            let (mut old_avg, mut old_err) = obs_equil.estimate()?;

            let cap = self.n_decorrelation_steps.unsigned_abs();
            let mut count: u64 = 0;
            loop {
                self.run_sampling(min_nmc, Some(&mut obs_equil), false)?;
                count += min_nmc;
                if count >= cap {
                    log::warn!(
                        "initial decorrelation: cap of {} MC steps reached without equilibration",
                        cap
                    );
                    break;
                }

                let (new_avg, new_err) = obs_equil.estimate()?;
                let mut stable = true;
                for i in 0..new_avg.len() {
                    let band = 2.0
                        * (old_err[i] * old_err[i] + new_err[i] * new_err[i]).sqrt();
                    if (old_avg[i] - new_avg[i]).abs() > band {
                        stable = false;
                        break;
                    }
                }
                old_avg = new_avg;
                old_err = new_err;
                if stable {
                    break;
                }
            }
        } else if self.n_decorrelation_steps > 0 {
            let n = self.n_decorrelation_steps as u64;
            self.run_sampling(n, None, false)?;
        }
        Ok(())
    }

    /// The sampling loop: runs `npoints` steps, feeding every step to the
    /// container (when given) and to the trace files (main runs only).
    fn run_sampling(
        &mut self,
        npoints: u64,
        mut container: Option<&mut ObservableContainer>,
        flag_main: bool,
    ) -> Result<(), McError> {
        // reset counters and bring walker, densities and mover in sync
        self.acc = 0;
        self.rej = 0;
        self.wlk.initialize();
        self.pdfcont.initialize_proto_values(&self.wlk.xold);
        self.trial_move.initialize_proto_values(&self.wlk.xold);
        if let Some(cb) = self.callback.as_mut() {
            cb(&self.wlk);
        }
        if let Some(cont) = container.as_deref_mut() {
            cont.reset();
        }

        let mut obs_writer = match &self.obs_trace {
            Some(spec) if flag_main && container.is_some() => {
                Some((BufWriter::new(File::create(&spec.path)?), spec.freq))
            }
            _ => None,
        };
        let mut wlk_writer = match &self.wlk_trace {
            Some(spec) if flag_main => {
                Some((BufWriter::new(File::create(&spec.path)?), spec.freq))
            }
            _ => None,
        };

        let flagpdf = self.pdfcont.has_pdf();
        let mut flag_callback_pdf = container.as_deref().map_or(false, |c| c.depends_on_pdf());

        for idx in 0..npoints {
            if flagpdf {
                self.do_step_mrt2();
                if let Some(cont) = container.as_deref_mut() {
                    let nskip_pdf = cont.n_skip_pdf() as u64;
                    let flag_pdf_obs = nskip_pdf != 0 && idx % nskip_pdf == 0;
                    if (flag_callback_pdf || self.wlk.accepted) && flag_pdf_obs {
                        self.pdfcont.prepare_observation(&self.wlk.xnew);
                        flag_callback_pdf = false;
                    } else if self.wlk.accepted {
                        // not observed now, but the PDF state changed
                        flag_callback_pdf = true;
                    }
                }
            } else {
                self.do_step_random();
            }

            if let Some(cont) = container.as_deref_mut() {
                cont.accumulate(&self.wlk)?;
                if let Some((w, freq)) = obs_writer.as_mut() {
                    if idx % *freq == 0 {
                        write!(w, "{}", idx)?;
                        cont.write_obs_values(w)?;
                        writeln!(w)?;
                    }
                }
            }
            if let Some((w, freq)) = wlk_writer.as_mut() {
                if idx % *freq == 0 {
                    write!(w, "{}", idx)?;
                    for x in &self.wlk.xold {
                        write!(w, " {}", x)?;
                    }
                    writeln!(w)?;
                }
            }
        }

        if let Some(cont) = container {
            cont.finalize()?;
        }
        Ok(())
    }

    /// One Metropolis step against the installed sampling functions.
    fn do_step_mrt2(&mut self) {
        let move_acc = self.trial_move.compute_trial_move(&mut self.wlk, &mut self.rng);

        if self.wlk.nchanged < self.ndim {
            self.domain.apply_selective(&mut self.wlk);
        } else {
            self.domain.apply(&mut self.wlk.xnew);
        }

        let pdf_acc = self.pdfcont.compute_acceptance(&self.wlk);
        let joint = pdf_acc * move_acc;

        // a non-finite density ratio rejects the step
        let u: f64 = self.rng.gen();
        self.wlk.accepted = joint.is_finite() && u <= joint;
        if self.wlk.accepted {
            self.acc += 1;
        } else {
            self.rej += 1;
        }

        if let Some(cb) = self.callback.as_mut() {
            cb(&self.wlk);
        }

        if self.wlk.accepted {
            self.pdfcont.new_to_old();
            self.trial_move.new_to_old();
            self.wlk.new_to_old();
        } else {
            self.pdfcont.old_to_new();
            self.trial_move.old_to_new();
            self.wlk.old_to_new();
        }
    }

    /// One uniform-random step, used when no sampling function is
    /// installed.
    fn do_step_random(&mut self) {
        for x in &mut self.wlk.xnew {
            *x = self.rng.gen();
        }
        self.domain.scale_to_domain(&mut self.wlk.xnew);
        self.wlk.set_all_changed();

        self.wlk.accepted = true;
        self.acc += 1;

        if let Some(cb) = self.callback.as_mut() {
            cb(&self.wlk);
        }
        self.wlk.new_to_old();
    }
}
