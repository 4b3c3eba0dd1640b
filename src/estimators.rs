//! Estimators: mean-and-error pairs from stored sample arrays.
//!
//! All estimators are deterministic given their inputs and come in a 1-D
//! form plus a multi-dimensional form operating on interleaved data
//! (`n × nobs`, row-major). Inputs are generic over numeric element types
//! and are reduced in `f64`.
//!
//! - [`uncorrelated_estimator`]: plain mean with the Bessel-corrected
//!   standard error, valid for uncorrelated samples.
//! - [`block_estimator`]: fixed-count blocking; block means are fed to the
//!   uncorrelated estimator.
//! - [`fc_blocker_estimator`]: Flyvbjerg–Petersen pairwise renormalization;
//!   adjacent samples are averaged level by level and the error is read off
//!   the plateau of the error-versus-level curve.
//! - [`mj_blocker_estimator`]: automated blocking with a chi-squared test
//!   selecting the truncation level.
//!
//! The pairwise blockers require a power-of-two sample count and trim the
//! tail to the largest power of two below the input length.

use ndarray::{ArrayView2, Axis};
use num_traits::ToPrimitive;

use crate::error::McError;

/// Relative tolerance of the Flyvbjerg–Petersen plateau criterion.
const FC_REL_TOL: f64 = 0.05;
/// The pairwise blocker stops before fewer blocks than this remain.
const FC_MIN_BLOCKS: usize = 32;

/// One-sided 99% chi-squared quantiles for 1..=30 degrees of freedom, used
/// by the automated-blocking truncation test.
const MJ_CHI2_QUANTILES: [f64; 30] = [
    6.634897, 9.210340, 11.344867, 13.276704, 15.086272, 16.811894, 18.475307, 20.090235,
    21.665994, 23.209251, 24.724970, 26.216967, 27.688250, 29.141238, 30.577914, 31.999927,
    33.408664, 34.805306, 36.190869, 37.566235, 38.932173, 40.289360, 41.638398, 42.979820,
    44.314105, 45.641683, 46.962942, 48.278236, 49.587884, 50.892181,
];

fn to_f64_vec<T: ToPrimitive>(x: &[T]) -> Vec<f64> {
    x.iter().map(|v| v.to_f64().unwrap()).collect()
}

fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Mean and standard error of the mean over `f64` samples, assuming they
/// are uncorrelated.
fn uncorrelated_stats(x: &[f64]) -> (f64, f64) {
    let n = x.len();
    let avg = mean(x);
    if n < 2 {
        return (avg, 0.0);
    }
    let var = x.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>() / (n - 1) as f64;
    (avg, (var / n as f64).sqrt())
}

/// Largest power of two `<= n` (0 for empty input).
fn largest_pow2(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1usize << (usize::BITS - 1 - n.leading_zeros())
    }
}

/// Averages adjacent pairs in place, halving the length.
fn pairwise_halve(v: &mut Vec<f64>) {
    let half = v.len() / 2;
    for i in 0..half {
        v[i] = 0.5 * (v[2 * i] + v[2 * i + 1]);
    }
    v.truncate(half);
}

/// Mean and one-sigma error assuming uncorrelated samples.
pub fn uncorrelated_estimator<T: ToPrimitive>(x: &[T]) -> (f64, f64) {
    uncorrelated_stats(&to_f64_vec(x))
}

/// Fixed-count blocking: the input is split into `nblocks` blocks of
/// `n / nblocks` samples (the tail beyond the last full block is dropped)
/// and the uncorrelated estimator is applied to the block means. Falls back
/// to the uncorrelated estimator when the blocks would be empty.
pub fn block_estimator<T: ToPrimitive>(x: &[T], nblocks: usize) -> (f64, f64) {
    let v = to_f64_vec(x);
    if nblocks == 0 || v.len() < nblocks {
        return uncorrelated_stats(&v);
    }
    let bsize = v.len() / nblocks;
    let means: Vec<f64> = (0..nblocks)
        .map(|b| mean(&v[b * bsize..(b + 1) * bsize]))
        .collect();
    uncorrelated_stats(&means)
}

/// Flyvbjerg–Petersen pairwise renormalization with automatic plateau
/// detection. Trims the input to the largest power of two below its length;
/// the mean is the exact mean of the trimmed input.
pub fn fc_blocker_estimator<T: ToPrimitive>(x: &[T]) -> (f64, f64) {
    let mut v = to_f64_vec(x);
    v.truncate(largest_pow2(v.len()));
    let (avg, mut prev_err) = uncorrelated_stats(&v);
    if v.len() < 2 {
        return (avg, 0.0);
    }
    while v.len() / 2 >= FC_MIN_BLOCKS {
        pairwise_halve(&mut v);
        let (_, err) = uncorrelated_stats(&v);
        if (err - prev_err).abs() <= FC_REL_TOL * err {
            return (avg, err);
        }
        prev_err = err;
    }
    (avg, prev_err)
}

fn mj_blocker_1d(x: &[f64]) -> (f64, f64) {
    let mut v = x.to_vec();
    v.truncate(largest_pow2(v.len()));
    let n2 = v.len();
    let avg = mean(&v);
    if n2 < 4 {
        let (_, err) = uncorrelated_stats(&v);
        return (avg, err);
    }
    let d = n2.trailing_zeros() as usize;

    // per-level population variance and lag-1 autocovariance
    let mut sig = Vec::with_capacity(d);
    let mut gam = Vec::with_capacity(d);
    for _ in 0..d {
        let nk = v.len() as f64;
        let mu = mean(&v);
        sig.push(v.iter().map(|xi| (xi - mu) * (xi - mu)).sum::<f64>() / nk);
        gam.push(
            v.windows(2)
                .map(|w| (w[0] - mu) * (w[1] - mu))
                .sum::<f64>()
                / nk,
        );
        pairwise_halve(&mut v);
    }

    // M_j = sum_{k >= j} n_k (gamma_k / sigma_k)^2, tested against the
    // chi-squared quantiles to pick the first trustworthy level
    let mut m = vec![0.0; d];
    let mut acc = 0.0;
    for k in (0..d).rev() {
        let nk = (n2 >> k) as f64;
        let ratio = if sig[k] > 0.0 { gam[k] / sig[k] } else { 0.0 };
        acc += ratio * ratio * nk;
        m[k] = acc;
    }
    let mut level = d - 1;
    let mut found = false;
    for (k, &mk) in m.iter().enumerate() {
        let q = MJ_CHI2_QUANTILES[k.min(MJ_CHI2_QUANTILES.len() - 1)];
        if mk < q {
            level = k;
            found = true;
            break;
        }
    }
    if !found {
        log::warn!("automated blocking found no trustworthy level; using the deepest one");
    }
    let nk = (n2 >> level) as f64;
    (avg, (sig[level] / nk).sqrt())
}

fn columns<T: ToPrimitive>(
    data: &[T],
    nobs: usize,
) -> Result<Vec<Vec<f64>>, McError> {
    if nobs == 0 {
        return Ok(Vec::new());
    }
    if data.len() % nobs != 0 {
        return Err(McError::ShapeMismatch { len: data.len(), nobs });
    }
    let n = data.len() / nobs;
    let view = ArrayView2::from_shape((n, nobs), data)
        .map_err(|_| McError::ShapeMismatch { len: data.len(), nobs })?;
    Ok(view
        .axis_iter(Axis(1))
        .map(|col| col.iter().map(|v| v.to_f64().unwrap()).collect())
        .collect())
}

/// Multi-dimensional [`uncorrelated_estimator`] over interleaved data.
pub fn multidim_uncorrelated_estimator<T: ToPrimitive>(
    data: &[T],
    nobs: usize,
) -> Result<(Vec<f64>, Vec<f64>), McError> {
    let (avg, err) = columns(data, nobs)?
        .iter()
        .map(|col| uncorrelated_stats(col))
        .unzip();
    Ok((avg, err))
}

/// Multi-dimensional [`block_estimator`] over interleaved data.
pub fn multidim_block_estimator<T: ToPrimitive>(
    data: &[T],
    nobs: usize,
    nblocks: usize,
) -> Result<(Vec<f64>, Vec<f64>), McError> {
    let (avg, err) = columns(data, nobs)?
        .iter()
        .map(|col| block_estimator(col, nblocks))
        .unzip();
    Ok((avg, err))
}

/// Multi-dimensional [`fc_blocker_estimator`] over interleaved data.
pub fn multidim_fc_blocker_estimator<T: ToPrimitive>(
    data: &[T],
    nobs: usize,
) -> Result<(Vec<f64>, Vec<f64>), McError> {
    let (avg, err) = columns(data, nobs)?
        .iter()
        .map(|col| fc_blocker_estimator(col))
        .unzip();
    Ok((avg, err))
}

/// Automated blocking over interleaved data: per column, the series is
/// blocked level by level and the error is taken at the first level whose
/// remaining autocorrelation passes a chi-squared test.
pub fn mj_blocker_estimator<T: ToPrimitive>(
    data: &[T],
    nobs: usize,
) -> Result<(Vec<f64>, Vec<f64>), McError> {
    let (avg, err) = columns(data, nobs)?
        .iter()
        .map(|col| mj_blocker_1d(col))
        .unzip();
    Ok((avg, err))
}
