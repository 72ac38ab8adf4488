//! Minimal linear-expansion classifier used only by the reactivation pass.
//!
//! This is deliberately not the general-purpose classification front-end
//! named out of scope in the crate docs: it has no notion of C, Nu, or
//! regression targets, only `f(x) = sum(c_i * K(x_i, x)) + b`. It borrows
//! the caller's kernel rather than owning a copy of anything, and lives for
//! exactly one reactivation check.

use crate::{Float, KernelFunction};

pub struct Classifier<'a, F, K> {
    kernel: &'a K,
    terms: Vec<(usize, F)>,
    bias: F,
}

impl<'a, F: Float, K: KernelFunction<F>> Classifier<'a, F, K> {
    pub fn new(kernel: &'a K, bias: F) -> Self {
        Classifier {
            kernel,
            terms: Vec::new(),
            bias,
        }
    }

    /// Adds a support-vector term `coefficient * K(index, .)` to the
    /// expansion. `index` is an original example index.
    pub fn add(&mut self, coefficient: F, index: usize) {
        self.terms.push((index, coefficient));
    }

    /// Raw decision value `f(x)` for the example at original `index`,
    /// including the bias term.
    pub fn classify(&self, index: usize) -> F {
        self.terms
            .iter()
            .fold(self.bias, |acc, &(j, c)| acc + c * self.kernel.kernel(index, j))
    }
}
