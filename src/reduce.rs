//! In-process ensemble reduction.
//!
//! Runs several independent integrators in parallel, one per worker, each
//! with its own seed (`seed + rank`), and combines their results: means are
//! averaged across workers and errors are root-sum-squared and divided by
//! the worker count. The per-worker `nranks` hint makes the automatic
//! tuning and equilibration loops divide their statistics, so aggregate
//! work stays constant.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::error::McError;
use crate::integrator::Integrator;

fn reduce(
    results: Vec<(Vec<f64>, Vec<f64>)>,
) -> Result<(Vec<f64>, Vec<f64>), McError> {
    let nranks = results.len();
    let nobsdim = results.first().map_or(0, |(avg, _)| avg.len());
    let mut avg = vec![0.0; nobsdim];
    let mut err = vec![0.0; nobsdim];
    for (a, e) in &results {
        if a.len() != nobsdim {
            return Err(McError::DimensionMismatch {
                expected: nobsdim,
                found: a.len(),
            });
        }
        for i in 0..nobsdim {
            avg[i] += a[i];
            err[i] += e[i] * e[i];
        }
    }
    for i in 0..nobsdim {
        avg[i] /= nranks as f64;
        err[i] = err[i].sqrt() / nranks as f64;
    }
    Ok((avg, err))
}

fn run_ensemble<F>(
    build: F,
    nranks: usize,
    seed: u64,
    nmc: i64,
    do_find_step: bool,
    do_decorrelate: bool,
    progress: Option<&ProgressBar>,
) -> Result<(Vec<f64>, Vec<f64>), McError>
where
    F: Fn(usize) -> Result<Integrator, McError> + Sync,
{
    let nranks = nranks.max(1);
    let results: Result<Vec<_>, McError> = (0..nranks)
        .into_par_iter()
        .map(|rank| {
            let mut mci = build(rank)?;
            mci.set_nranks(nranks);
            mci.set_seed(seed + rank as u64);
            let out = mci.integrate(nmc, do_find_step, do_decorrelate)?;
            if let Some(pb) = progress {
                pb.inc(1);
            }
            Ok(out)
        })
        .collect();
    reduce(results?)
}

/// Runs `nranks` independently seeded integrators in parallel and reduces
/// their results. `build(rank)` constructs each worker's integrator;
/// worker `rank` is seeded with `seed + rank`.
pub fn integrate_ensemble<F>(
    build: F,
    nranks: usize,
    seed: u64,
    nmc: i64,
    do_find_step: bool,
    do_decorrelate: bool,
) -> Result<(Vec<f64>, Vec<f64>), McError>
where
    F: Fn(usize) -> Result<Integrator, McError> + Sync,
{
    run_ensemble(build, nranks, seed, nmc, do_find_step, do_decorrelate, None)
}

/// Like [`integrate_ensemble`], with a progress bar advancing as workers
/// finish.
pub fn integrate_ensemble_with_progress<F>(
    build: F,
    nranks: usize,
    seed: u64,
    nmc: i64,
    do_find_step: bool,
    do_decorrelate: bool,
) -> Result<(Vec<f64>, Vec<f64>), McError>
where
    F: Fn(usize) -> Result<Integrator, McError> + Sync,
{
    let pb = ProgressBar::new(nranks.max(1) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.set_prefix("workers");
    let out = run_ensemble(
        build,
        nranks,
        seed,
        nmc,
        do_find_step,
        do_decorrelate,
        Some(&pb),
    );
    pb.finish_with_message("done");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::EstimatorKind;
    use crate::observable::ObservableFunction;

    struct XSquared;

    impl ObservableFunction for XSquared {
        fn ndim(&self) -> usize {
            1
        }

        fn nobs(&self) -> usize {
            1
        }

        fn observable_function(&self, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }

        fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
            Box::new(XSquared)
        }
    }

    #[test]
    fn reduction_averages_means_and_rss_errors() {
        let (avg, err) = reduce(vec![
            (vec![1.0], vec![0.3]),
            (vec![3.0], vec![0.4]),
        ])
        .unwrap();
        assert_eq!(avg, vec![2.0]);
        assert!((err[0] - 0.25).abs() < 1e-15);
    }

    #[test]
    fn ensemble_integrates_unit_parabola() {
        // int_{-1}^{1} x^2 dx = 2/3, sampled uniformly by every worker
        let (avg, err) = integrate_ensemble(
            |_rank| {
                let mut mci = Integrator::new(1);
                mci.set_i_range(-1.0, 1.0)?;
                mci.add_observable(Box::new(XSquared), 16, 1, false, EstimatorKind::Uncorrelated)?;
                Ok(mci)
            },
            4,
            42,
            4096,
            false,
            false,
        )
        .unwrap();
        assert!((avg[0] - 2.0 / 3.0).abs() < 0.05, "avg = {}", avg[0]);
        assert!(err[0] > 0.0 && err[0] < 0.05);
    }
}
