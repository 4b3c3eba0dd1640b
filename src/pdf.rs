//! Sampling functions (importance-sampling densities) and their container.
//!
//! A [`SamplingFunction`] maps walker positions to a set of proto-values
//! (persistent per-step temporaries) and from those to a non-negative
//! density. The container owns one old/new proto-value buffer pair per
//! density; after [`PdfContainer::initialize_proto_values`] both slots hold
//! the values of the starting position, and after every step they again
//! agree on the accepted position.
//!
//! The acceptance contract: `acceptance_function(old, new)` must equal
//! `sampling_function(new) / sampling_function(old)` whenever the
//! denominator is non-zero, and [`SamplingFunction::updated_acceptance`]
//! must compute the same ratio while touching only the proto entries
//! affected by the changed coordinates.

use crate::walker::WalkerState;

/// A non-negative density evaluated through cached proto-values.
pub trait SamplingFunction {
    /// Walker dimension of the input.
    fn ndim(&self) -> usize;

    /// Number of proto-values this density caches.
    fn nproto(&self) -> usize;

    /// Computes the proto-values for position `x`.
    fn proto_function(&self, x: &[f64], proto: &mut [f64]);

    /// The density, up to normalization, from its proto-values.
    fn sampling_function(&self, proto: &[f64]) -> f64;

    /// The ratio `sampling(new) / sampling(old)` from the two proto sets.
    fn acceptance_function(&self, proto_old: &[f64], proto_new: &[f64]) -> f64;

    /// Selective fast path: recompute only the proto entries affected by the
    /// changed coordinates (`changed` holds their indices, ascending) and
    /// return the same ratio as [`Self::acceptance_function`]. On entry
    /// `proto_new` equals `proto_old`; the default falls back to a full
    /// re-evaluation.
    fn updated_acceptance(
        &self,
        _xold: &[f64],
        xnew: &[f64],
        _changed: &[usize],
        proto_old: &[f64],
        proto_new: &mut [f64],
    ) -> f64 {
        self.proto_function(xnew, proto_new);
        self.acceptance_function(proto_old, proto_new)
    }

    /// Called once before the current step's density state is observed by a
    /// PDF-dependent observable.
    fn prepare_observation(&mut self, _x: &[f64]) {}

    /// Hook for densities keeping temporaries outside the proto buffers.
    fn commit(&mut self) {}

    /// Counterpart of [`Self::commit`] for rejected steps.
    fn rollback(&mut self) {}
}

struct ProtoPdf {
    pdf: Box<dyn SamplingFunction>,
    proto_old: Vec<f64>,
    proto_new: Vec<f64>,
}

/// Aggregates the installed sampling functions and manages their
/// proto-value commits. The joint acceptance is the product over densities.
#[derive(Default)]
pub struct PdfContainer {
    pdfs: Vec<ProtoPdf>,
}

impl PdfContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sampling_function(&mut self, pdf: Box<dyn SamplingFunction>) {
        let nproto = pdf.nproto();
        self.pdfs.push(ProtoPdf {
            pdf,
            proto_old: vec![0.0; nproto],
            proto_new: vec![0.0; nproto],
        });
    }

    pub fn has_pdf(&self) -> bool {
        !self.pdfs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pdfs.clear();
    }

    /// Computes proto-values for the starting position into both slots.
    pub fn initialize_proto_values(&mut self, x: &[f64]) {
        for entry in &mut self.pdfs {
            entry.pdf.proto_function(x, &mut entry.proto_old);
            entry.proto_new.copy_from_slice(&entry.proto_old);
        }
    }

    /// Joint density-acceptance factor for the proposed step, using the
    /// selective path whenever fewer than all coordinates changed.
    pub fn compute_acceptance(&mut self, wlk: &WalkerState) -> f64 {
        let ndim = wlk.ndim();
        let mut acc = 1.0;
        for entry in &mut self.pdfs {
            let ratio = if wlk.nchanged < ndim {
                entry.pdf.updated_acceptance(
                    &wlk.xold,
                    &wlk.xnew,
                    &wlk.changed_idx[..wlk.nchanged],
                    &entry.proto_old,
                    &mut entry.proto_new,
                )
            } else {
                entry.pdf.proto_function(&wlk.xnew, &mut entry.proto_new);
                entry
                    .pdf
                    .acceptance_function(&entry.proto_old, &entry.proto_new)
            };
            acc *= ratio;
        }
        acc
    }

    /// Commits every density's proto-values after an accepted step.
    pub fn new_to_old(&mut self) {
        for entry in &mut self.pdfs {
            entry.proto_old.copy_from_slice(&entry.proto_new);
            entry.pdf.commit();
        }
    }

    /// Rolls every density's proto-values back after a rejected step.
    pub fn old_to_new(&mut self) {
        for entry in &mut self.pdfs {
            entry.proto_new.copy_from_slice(&entry.proto_old);
            entry.pdf.rollback();
        }
    }

    /// Invokes the observation hook of every density.
    pub fn prepare_observation(&mut self, x: &[f64]) {
        for entry in &mut self.pdfs {
            entry.pdf.prepare_observation(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// exp(-sum x_i^2) with one proto-value per coordinate.
    struct GaussPdf {
        ndim: usize,
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

    #[test]
    fn acceptance_matches_density_ratio() {
        let pdf = GaussPdf { ndim: 2 };
        let (xa, xb) = ([0.3, -0.4], [0.1, 0.9]);
        let mut pa = [0.0; 2];
        let mut pb = [0.0; 2];
        pdf.proto_function(&xa, &mut pa);
        pdf.proto_function(&xb, &mut pb);
        let ratio = pdf.sampling_function(&pb) / pdf.sampling_function(&pa);
        assert_abs_diff_eq!(pdf.acceptance_function(&pa, &pb), ratio, epsilon = 1e-14);
    }

    #[test]
    fn selective_path_agrees_with_full_path() {
        let mut cont = PdfContainer::new();
        cont.add_sampling_function(Box::new(GaussPdf { ndim: 3 }));

        let mut wlk = WalkerState::new(3);
        wlk.xold.copy_from_slice(&[0.2, -0.1, 0.7]);
        wlk.initialize();
        cont.initialize_proto_values(&wlk.xold);

        // change only coordinate 1
        wlk.old_to_new();
        wlk.xnew[1] = 0.5;
        wlk.nchanged = 1;
        wlk.changed_idx[0] = 1;
        let selective = cont.compute_acceptance(&wlk);

        let expected = ((0.1f64 * 0.1) - (0.5f64 * 0.5)).exp();
        assert_abs_diff_eq!(selective, expected, epsilon = 1e-14);

        // rollback restores the proto invariant, full path gives the same
        cont.old_to_new();
        wlk.set_all_changed();
        let full = cont.compute_acceptance(&wlk);
        assert_abs_diff_eq!(full, expected, epsilon = 1e-14);
    }

    #[test]
    fn commit_keeps_slots_in_sync() {
        let mut cont = PdfContainer::new();
        cont.add_sampling_function(Box::new(GaussPdf { ndim: 1 }));
        let mut wlk = WalkerState::new(1);
        wlk.xold[0] = 1.0;
        wlk.initialize();
        cont.initialize_proto_values(&wlk.xold);

        wlk.xnew[0] = 2.0;
        cont.compute_acceptance(&wlk);
        cont.new_to_old();
        let entry = &cont.pdfs[0];
        assert_eq!(entry.proto_old, entry.proto_new);
        assert_abs_diff_eq!(entry.proto_old[0], 4.0);
    }
}
