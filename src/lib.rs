//! # SMO decomposition core for the soft-margin SVM dual
//!
//! This crate is the inner optimization engine of a Support Vector Machine
//! trainer: working-set selection, the analytic two-variable QP subproblem,
//! gradient maintenance, kernel-matrix caching, shrinking of provably
//! inactive examples, and final re-activation of wrongly-shrunk variables.
//! It is a classical SMO-style decomposition method with SVMlight-style
//! shrinking.
//!
//! Deliberately out of scope: parsing training files, command-line
//! handling, model (de)serialization, the kernel function and feature
//! representation themselves (the caller supplies a [`KernelFunction`]),
//! and the general-purpose classifier used downstream of a fit model. The
//! only classifier this crate contains is the minimal linear-expansion one
//! the reactivation pass needs internally.
//!
//! ## Example
//!
//! ```
//! use svm_smo_core::{KernelFunction, Solver, SolverParams};
//! use ndarray::Array1;
//!
//! struct TwoPointLinear;
//!
//! impl KernelFunction<f64> for TwoPointLinear {
//!     fn len(&self) -> usize { 2 }
//!     fn label(&self, i: usize) -> i8 { if i == 0 { 1 } else { -1 } }
//!     fn kernel(&self, i: usize, j: usize) -> f64 {
//!         let x = [1.0, -1.0];
//!         x[i] * x[j]
//!     }
//! }
//!
//! let kernel = TwoPointLinear;
//! let params = SolverParams::new(1.0, 1e-6);
//! let b = Array1::zeros(2);
//! let mut alpha = Array1::zeros(2);
//! let mut g = Array1::zeros(2);
//!
//! let outcome = Solver::new(&kernel, params)
//!     .solve(b.view(), alpha.view_mut(), g.view_mut())
//!     .unwrap();
//!
//! assert!((alpha[0] - 0.5).abs() < 1e-4);
//! assert!((outcome.rho).abs() < 1e-4);
//! ```

mod classifier;
mod kernel_cache;
pub mod solver_smo;

pub use solver_smo::{ExitReason, Solver, SolveOutcome};

use std::fmt::Debug;

/// Numeric type the solver operates over. Implemented for `f32` and `f64`
/// via the blanket impl below; callers never implement it themselves.
pub trait Float:
    num_traits::Float
    + num_traits::FromPrimitive
    + num_traits::ToPrimitive
    + num_traits::NumAssign
    + Debug
    + 'static
{
}

impl<T> Float for T where
    T: num_traits::Float
        + num_traits::FromPrimitive
        + num_traits::ToPrimitive
        + num_traits::NumAssign
        + Debug
        + 'static
{
}

/// The caller-supplied collaborator that evaluates the kernel between two
/// examples. Feature handles never cross this boundary; only the already
/// evaluated kernel value does, keeping the feature representation and the
/// kernel function itself outside this crate's scope.
pub trait KernelFunction<F: Float> {
    /// Number of training examples.
    fn len(&self) -> usize;

    /// Label of example `i` in original index order, either `1` or `-1`.
    fn label(&self, i: usize) -> i8;

    /// `K(x_i, x_j)`, the raw (unsigned) kernel value between two examples
    /// addressed by their *original* index.
    fn kernel(&self, i: usize, j: usize) -> F;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Status of a multiplier relative to its box constraint `[0, C]`.
///
/// The sign table used by the shrinking predicate (`lambda_up * sign(status)
/// > shrink_eps`) is exactly: `LowerBound -> +1`, `UpperBound -> -1`,
/// `Free -> 0`. A free variable's contribution is always zero, so it can
/// never satisfy the predicate for a positive `shrink_eps` and is therefore
/// never shrunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    LowerBound,
    UpperBound,
    Free,
}

impl Status {
    pub fn of<F: Float>(alpha: F, c: F) -> Status {
        if alpha <= F::zero() {
            Status::LowerBound
        } else if alpha >= c {
            Status::UpperBound
        } else {
            Status::Free
        }
    }

    pub fn sign<F: Float>(self) -> F {
        match self {
            Status::LowerBound => F::one(),
            Status::UpperBound => -F::one(),
            Status::Free => F::zero(),
        }
    }
}

/// Errors rejected before any solver work begins. Internal-invariant
/// violations (an out-of-range active index, a desynchronized permutation)
/// are programming errors checked with `debug_assert!` rather than members
/// of this enum.
#[derive(Debug, thiserror::Error)]
pub enum SvmCoreError {
    #[error("C must be positive, got {0}")]
    InvalidC(f64),
    #[error("eps must be positive, got {0}")]
    InvalidEps(f64),
    #[error("dataset must contain at least one example")]
    EmptyDataset,
    #[error("buffer length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Hyperparameters controlling one `solve` call.
///
/// Builder-style, mirroring the `SvmParams::eps()` / `SvmParams::shrinking()`
/// chain this crate was generalized from.
#[derive(Debug, Clone)]
pub struct SolverParams<F> {
    pub(crate) c: F,
    pub(crate) eps: F,
    pub(crate) shrink_size: u32,
    pub(crate) shrink_eps: F,
    pub(crate) final_check: bool,
    pub(crate) cache_size_mb: f64,
    pub(crate) max_iterations: Option<usize>,
}

impl<F: Float> SolverParams<F> {
    /// `shrink_eps` defaults to `eps`, the libsvm/SVMlight convention of
    /// starting the shrink threshold at the KKT tolerance.
    pub fn new(c: F, eps: F) -> Self {
        SolverParams {
            c,
            eps,
            shrink_size: 0,
            shrink_eps: eps,
            final_check: false,
            cache_size_mb: 100.0,
            max_iterations: None,
        }
    }

    pub fn shrink_size(mut self, shrink_size: u32) -> Self {
        self.shrink_size = shrink_size;
        self
    }

    pub fn shrink_eps(mut self, shrink_eps: F) -> Self {
        self.shrink_eps = shrink_eps;
        self
    }

    pub fn final_check(mut self, final_check: bool) -> Self {
        self.final_check = final_check;
        self
    }

    pub fn cache_size_mb(mut self, cache_size_mb: f64) -> Self {
        self.cache_size_mb = cache_size_mb;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SvmCoreError> {
        if self.c <= F::zero() {
            return Err(SvmCoreError::InvalidC(self.c.to_f64().unwrap_or(f64::NAN)));
        }
        if self.eps <= F::zero() {
            return Err(SvmCoreError::InvalidEps(
                self.eps.to_f64().unwrap_or(f64::NAN),
            ));
        }
        Ok(())
    }
}
