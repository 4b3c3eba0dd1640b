//! Observable functions: the integrands.
//!
//! An observable maps a walker position to one or more values. Observables
//! may optionally support selective re-evaluation along only the
//! coordinates that changed since the last full evaluation; implementations
//! without the fast path fall back to the full evaluation transparently.

/// An integrand evaluated at walker positions.
pub trait ObservableFunction {
    /// Walker dimension of the input.
    fn ndim(&self) -> usize;

    /// Number of values this observable produces.
    fn nobs(&self) -> usize;

    /// Evaluates the observable at `x` into `out` (length [`Self::nobs`]).
    fn observable_function(&self, x: &[f64], out: &mut [f64]);

    /// Whether [`Self::updated_observable`] is a genuine fast path.
    fn is_updateable(&self) -> bool {
        false
    }

    /// Selective re-evaluation: `flags[i]` is true iff coordinate `i`
    /// changed since the last evaluation, `nchanged` counts the true
    /// entries. `out` holds the previous values on entry and must hold the
    /// same result a full evaluation at `x` would produce on exit.
    fn updated_observable(&self, x: &[f64], _nchanged: usize, _flags: &[bool], out: &mut [f64]) {
        self.observable_function(x, out);
    }

    /// Whether this observable reads sampling-function state and therefore
    /// needs the PDF observation hook before evaluation.
    fn needs_pdf(&self) -> bool {
        false
    }

    /// Clones the observable into a fresh box. Used by the automatic
    /// equilibration loop to mirror flagged observables.
    fn clone_boxed(&self) -> Box<dyn ObservableFunction>;
}
