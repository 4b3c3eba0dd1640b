//! Trace-file output: one plain-text line per emitted step, no header,
//! emission on every freq-th step.

mod common;

use common::{GaussPdf, X2Each};
use mcintegral::container::EstimatorKind;
use mcintegral::integrator::Integrator;
use std::fs;
use tempfile::tempdir;

#[test]
fn traces_have_one_line_per_emitted_step() {
    let dir = tempdir().unwrap();
    let obs_path = dir.path().join("obs.trace");
    let wlk_path = dir.path().join("wlk.trace");

    let nmc = 100i64;
    let freq = 10u64;
    let mut mci = Integrator::new(2);
    mci.set_seed(7);
    mci.add_sampling_function(Box::new(GaussPdf::new(2))).unwrap();
    mci.add_observable(Box::new(X2Each::new(2)), 1, 1, false, EstimatorKind::Uncorrelated)
        .unwrap();
    mci.store_observables_on_file(&obs_path, freq);
    mci.store_walker_positions_on_file(&wlk_path, freq);

    mci.integrate(nmc, false, false).unwrap();

    let obs = fs::read_to_string(&obs_path).unwrap();
    let wlk = fs::read_to_string(&wlk_path).unwrap();
    let obs_lines: Vec<&str> = obs.lines().collect();
    let wlk_lines: Vec<&str> = wlk.lines().collect();
    assert_eq!(obs_lines.len(), (nmc as u64).div_ceil(freq) as usize);
    assert_eq!(wlk_lines.len(), obs_lines.len());

    for (k, line) in obs_lines.iter().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields.len(), 1 + 2); // step index + two observable values
        assert_eq!(fields[0].parse::<u64>().unwrap(), k as u64 * freq);
        for f in &fields[1..] {
            f.parse::<f64>().unwrap();
        }
    }
    for line in &wlk_lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields.len(), 1 + 2); // step index + walker coordinates
    }
}

#[test]
fn cleared_trace_files_are_not_written() {
    let dir = tempdir().unwrap();
    let obs_path = dir.path().join("obs.trace");

    let mut mci = Integrator::new(1);
    mci.set_seed(7);
    mci.set_i_range(0.0, 1.0).unwrap();
    mci.add_observable(
        Box::new(common::X1d),
        1,
        1,
        false,
        EstimatorKind::Uncorrelated,
    )
    .unwrap();
    mci.store_observables_on_file(&obs_path, 1);
    mci.clear_observable_file();

    mci.integrate(50, false, false).unwrap();
    assert!(!obs_path.exists());
}

#[test]
fn tuning_runs_leave_no_trace_output() {
    // trace files belong to the main run; the tuner and the equilibration
    // loop must not touch them
    let dir = tempdir().unwrap();
    let obs_path = dir.path().join("obs.trace");

    let mut mci = Integrator::new(2);
    mci.set_seed(13);
    mci.add_sampling_function(Box::new(GaussPdf::new(2))).unwrap();
    mci.add_observable(Box::new(X2Each::new(2)), 16, 1, true, EstimatorKind::Uncorrelated)
        .unwrap();
    mci.store_observables_on_file(&obs_path, 1);
    mci.set_n_find_mrt2_iterations(3);
    mci.set_n_decorrelation_steps(100);

    let nmc = 64i64;
    mci.integrate(nmc, true, true).unwrap();

    let obs = fs::read_to_string(&obs_path).unwrap();
    assert_eq!(obs.lines().count(), nmc as usize);
}
