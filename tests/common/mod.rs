//! Sampling functions and observables shared by the integration tests.
#![allow(dead_code)] // each test binary uses its own subset

use mcintegral::observable::ObservableFunction;
use mcintegral::pdf::SamplingFunction;

/// Gaussian density `exp(-sum x_i^2)` with one proto-value per coordinate
/// and a selective acceptance fast path.
pub struct GaussPdf {
    ndim: usize,
}

impl GaussPdf {
    pub fn new(ndim: usize) -> Self {
        Self { ndim }
    }
}

impl SamplingFunction for GaussPdf {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn nproto(&self) -> usize {
        self.ndim
    }

    fn proto_function(&self, x: &[f64], proto: &mut [f64]) {
        for (p, xi) in proto.iter_mut().zip(x.iter()) {
            *p = xi * xi;
        }
    }

    fn sampling_function(&self, proto: &[f64]) -> f64 {
        (-proto.iter().sum::<f64>()).exp()
    }

    fn acceptance_function(&self, proto_old: &[f64], proto_new: &[f64]) -> f64 {
        (proto_old.iter().sum::<f64>() - proto_new.iter().sum::<f64>()).exp()
    }

    fn updated_acceptance(
        &self,
        _xold: &[f64],
        xnew: &[f64],
        changed: &[usize],
        proto_old: &[f64],
        proto_new: &mut [f64],
    ) -> f64 {
        let mut expf = 0.0;
        for &i in changed {
            proto_new[i] = xnew[i] * xnew[i];
            expf += proto_new[i] - proto_old[i];
        }
        (-expf).exp()
    }
}

/// Exponential-modulus density `exp(-|x|)` in one dimension.
pub struct Exp1dPdf;

impl SamplingFunction for Exp1dPdf {
    fn ndim(&self) -> usize {
        1
    }

    fn nproto(&self) -> usize {
        1
    }

    fn proto_function(&self, x: &[f64], proto: &mut [f64]) {
        proto[0] = x[0].abs();
    }

    fn sampling_function(&self, proto: &[f64]) -> f64 {
        (-proto[0]).exp()
    }

    fn acceptance_function(&self, proto_old: &[f64], proto_new: &[f64]) -> f64 {
        (proto_old[0] - proto_new[0]).exp()
    }
}

/// Scalar observable `sum x_i^2`.
pub struct X2Sum {
    ndim: usize,
}

impl X2Sum {
    pub fn new(ndim: usize) -> Self {
        Self { ndim }
    }
}

impl ObservableFunction for X2Sum {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn nobs(&self) -> usize {
        1
    }

    fn observable_function(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x.iter().map(|xi| xi * xi).sum();
    }

    fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
        Box::new(X2Sum { ndim: self.ndim })
    }
}

/// Vector observable `(x_0^2, ..., x_{n-1}^2)`, full evaluation only.
pub struct X2Each {
    ndim: usize,
}

impl X2Each {
    pub fn new(ndim: usize) -> Self {
        Self { ndim }
    }
}

impl ObservableFunction for X2Each {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn nobs(&self) -> usize {
        self.ndim
    }

    fn observable_function(&self, x: &[f64], out: &mut [f64]) {
        for (o, xi) in out.iter_mut().zip(x.iter()) {
            *o = xi * xi;
        }
    }

    fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
        Box::new(X2Each { ndim: self.ndim })
    }
}

/// Selective-update twin of [`X2Each`].
pub struct X2EachSelective {
    ndim: usize,
}

impl X2EachSelective {
    pub fn new(ndim: usize) -> Self {
        Self { ndim }
    }
}

impl ObservableFunction for X2EachSelective {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn nobs(&self) -> usize {
        self.ndim
    }

    fn observable_function(&self, x: &[f64], out: &mut [f64]) {
        for (o, xi) in out.iter_mut().zip(x.iter()) {
            *o = xi * xi;
        }
    }

    fn is_updateable(&self) -> bool {
        true
    }

    fn updated_observable(&self, x: &[f64], _nchanged: usize, flags: &[bool], out: &mut [f64]) {
        for (i, &flag) in flags.iter().enumerate() {
            if flag {
                out[i] = x[i] * x[i];
            }
        }
    }

    fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
        Box::new(X2EachSelective { ndim: self.ndim })
    }
}

/// The identity observable in one dimension.
pub struct X1d;

impl ObservableFunction for X1d {
    fn ndim(&self) -> usize {
        1
    }

    fn nobs(&self) -> usize {
        1
    }

    fn observable_function(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x[0];
    }

    fn clone_boxed(&self) -> Box<dyn ObservableFunction> {
        Box::new(X1d)
    }
}
