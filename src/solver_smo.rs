//! Working-set selection, the analytic two-variable subproblem, gradient
//! maintenance, shrinking and reactivation: the SMO decomposition loop
//! itself.
//!
//! All arrays here are indexed by *active position*, not original example
//! index — [`Solver::active2index`] is the permutation back to the caller's
//! world, and every position swap (shrink, reactivation) goes through
//! [`Solver::swap_index`] so the parallel arrays and the kernel cache never
//! drift out of sync.

use ndarray::{ArrayView1, ArrayViewMut1};

use crate::classifier::Classifier;
use crate::kernel_cache::KernelCache;
use crate::{Float, KernelFunction, SolverParams, Status, SvmCoreError};

/// Why the inner loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The KKT violation fell below `eps`.
    ReachedThreshold,
    /// `SolverParams::max_iterations` was reached first (ambient extension;
    /// the source this was generalized from has no such cap).
    ReachedIterations,
}

/// Everything `solve` reports beyond the alpha/gradient buffers it writes
/// back in place.
#[derive(Debug, Clone)]
pub struct SolveOutcome<F> {
    /// Equal to `lambda_eq` at termination.
    pub rho: F,
    /// Final dual objective, `(1/2) * sum(alpha[k] * (G[k] + b[k]))`.
    pub obj: F,
    pub iterations: usize,
    /// Total examples restored to the active set across all reactivation
    /// passes. Unlike the source this is generalized from, this counter is
    /// genuinely incremented and returned (see design notes).
    pub reactivations: usize,
    pub exit_reason: ExitReason,
}

/// Owns all per-example state and the kernel cache for the duration of one
/// `solve` call.
pub struct Solver<'a, F, K> {
    kernel: &'a K,
    params: SolverParams<F>,
    l: usize,
    active_size: usize,
    y: Vec<F>,
    alpha: Vec<F>,
    g: Vec<F>,
    b: Vec<F>,
    status: Vec<Status>,
    shrink_iter: Vec<u32>,
    active2index: Vec<usize>,
    lambda_eq: F,
    shrink_eps: F,
    cache: KernelCache<F>,
    iter: usize,
    hit_old: u64,
    reactivations: usize,
}

impl<'a, F: Float, K: KernelFunction<F>> Solver<'a, F, K> {
    pub fn new(kernel: &'a K, params: SolverParams<F>) -> Self {
        let l = kernel.len();
        let shrink_eps = params.shrink_eps;
        let cache = KernelCache::new(l.max(1), params.cache_size_mb);
        Solver {
            kernel,
            params,
            l,
            active_size: l,
            y: Vec::new(),
            alpha: Vec::new(),
            g: Vec::new(),
            b: Vec::new(),
            status: Vec::new(),
            shrink_iter: Vec::new(),
            active2index: Vec::new(),
            lambda_eq: F::zero(),
            shrink_eps,
            cache,
            iter: 0,
            hit_old: 0,
            reactivations: 0,
        }
    }

    /// Runs the full outer loop (inner optimization, optionally followed by
    /// reactivation passes) to convergence and writes `alpha`/`G` back in
    /// original-index order.
    pub fn solve(
        mut self,
        b_in: ArrayView1<F>,
        mut alpha_inout: ArrayViewMut1<F>,
        mut g_inout: ArrayViewMut1<F>,
    ) -> Result<SolveOutcome<F>, SvmCoreError> {
        self.params.validate()?;
        if self.l == 0 {
            return Err(SvmCoreError::EmptyDataset);
        }
        if b_in.len() != self.l {
            return Err(SvmCoreError::DimensionMismatch {
                expected: self.l,
                actual: b_in.len(),
            });
        }
        if alpha_inout.len() != self.l {
            return Err(SvmCoreError::DimensionMismatch {
                expected: self.l,
                actual: alpha_inout.len(),
            });
        }
        if g_inout.len() != self.l {
            return Err(SvmCoreError::DimensionMismatch {
                expected: self.l,
                actual: g_inout.len(),
            });
        }

        let c = self.params.c;
        self.y = (0..self.l)
            .map(|k| F::from_i8(self.kernel.label(k)).unwrap())
            .collect();
        self.alpha = alpha_inout.iter().copied().collect();
        self.g = g_inout.iter().copied().collect();
        self.b = b_in.iter().copied().collect();
        self.status = self.alpha.iter().map(|&a| Status::of(a, c)).collect();
        self.shrink_iter = vec![0; self.l];
        self.active2index = (0..self.l).collect();
        self.active_size = self.l;

        let exit_reason = loop {
            let reason = self.learn_sub();
            if reason == ExitReason::ReachedIterations {
                break reason;
            }
            if !self.params.final_check {
                break reason;
            }
            let reactivated = self.reactivate();
            log::info!("reactivation pass restored {} examples", reactivated);
            if reactivated == 0 {
                break reason;
            }
            self.reactivations += reactivated;
            self.cache.rebuild(self.active_size);
            self.shrink_eps = self.params.shrink_eps;
        };

        for k in 0..self.l {
            let orig = self.active2index[k];
            alpha_inout[orig] = self.alpha[k];
            g_inout[orig] = self.g[k];
        }

        let obj = (0..self.l)
            .fold(F::zero(), |acc, k| acc + self.alpha[k] * (self.g[k] + self.b[k]))
            / F::from_f64(2.0).unwrap();

        Ok(SolveOutcome {
            rho: self.lambda_eq,
            obj,
            iterations: self.iter,
            reactivations: self.reactivations,
            exit_reason,
        })
    }

    fn is_upper_bound(&self, k: usize) -> bool {
        self.status[k] == Status::UpperBound
    }

    fn is_lower_bound(&self, k: usize) -> bool {
        self.status[k] == Status::LowerBound
    }

    fn is_free(&self, k: usize) -> bool {
        self.status[k] == Status::Free
    }

    /// Swaps active positions `i` and `j` across every parallel array and
    /// the kernel cache, keeping them all consistent (invariant 5, §8).
    fn swap_index(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.y.swap(i, j);
        self.alpha.swap(i, j);
        self.status.swap(i, j);
        self.g.swap(i, j);
        self.b.swap(i, j);
        self.shrink_iter.swap(i, j);
        self.active2index.swap(i, j);
        self.cache.swap_index(i, j);
    }

    /// Runs the inner decomposition loop until the KKT violation falls
    /// below `eps`, or (ambient extension) `max_iterations` is exhausted.
    fn learn_sub(&mut self) -> ExitReason {
        log::debug!(
            "{} examples active, cache budget in floats unchanged",
            self.active_size
        );

        loop {
            let (i, j) = match self.select_working_set() {
                Some(pair) => pair,
                None => return ExitReason::ReachedThreshold,
            };

            self.iter += 1;
            if let Some(max_iter) = self.params.max_iterations {
                if self.iter > max_iter {
                    return ExitReason::ReachedIterations;
                }
            }

            let stepped = self.take_step_and_update_gradient(i, j);

            let viol = self.shrink_sweep(stepped);

            if self.iter % 1000 == 0 {
                let total = self.cache.hit + self.cache.miss;
                log::trace!(
                    "iter {} active {} viol {:.6} recent_hits {} hit_rate {:.1}%",
                    self.iter,
                    self.active_size,
                    viol.to_f64().unwrap_or(f64::NAN),
                    self.cache.hit - self.hit_old,
                    100.0 * self.cache.hit as f64 / total.max(1) as f64
                );
                self.hit_old = self.cache.hit;
                // Shrink-eps adaptation rule borrowed from SVMlight.
                self.shrink_eps =
                    self.shrink_eps * F::from_f64(0.7).unwrap() + viol * F::from_f64(0.3).unwrap();
            }

            if viol < self.params.eps {
                return ExitReason::ReachedThreshold;
            }
        }
    }

    /// Maximal-violating-pair selection, sign-aware on labels (§4.3).
    /// Returns `None` when no feasible working pair exists.
    fn select_working_set(&self) -> Option<(usize, usize)> {
        let mut gmax1 = F::neg_infinity();
        let mut gmax2 = F::neg_infinity();
        let mut i = None;
        let mut j = None;

        for k in 0..self.active_size {
            if self.y[k] > F::zero() {
                if !self.is_upper_bound(k) && -self.g[k] > gmax1 {
                    gmax1 = -self.g[k];
                    i = Some(k);
                }
                if !self.is_lower_bound(k) && self.g[k] > gmax2 {
                    gmax2 = self.g[k];
                    j = Some(k);
                }
            } else {
                if !self.is_upper_bound(k) && -self.g[k] > gmax2 {
                    gmax2 = -self.g[k];
                    j = Some(k);
                }
                if !self.is_lower_bound(k) && self.g[k] > gmax1 {
                    gmax1 = self.g[k];
                    i = Some(k);
                }
            }
        }

        match (i, j) {
            (Some(i), Some(j)) => Some((i, j)),
            _ => None,
        }
    }

    /// Solves the analytic two-variable QP subproblem for `(i, j)` (§4.3)
    /// and immediately propagates the resulting multiplier deltas into `G`
    /// for every active position. A degenerate column (`eta <= 0`) is
    /// treated as a no-op step: no multiplier change, no gradient update.
    /// Returns whether a real step was taken, so the caller can skip shrink
    /// bookkeeping for an iteration that changed nothing.
    fn take_step_and_update_gradient(&mut self, i: usize, j: usize) -> bool {
        let active_size = self.active_size;
        // Borrow individual fields rather than `self` as a whole so the
        // closures below don't conflict with the mutable borrow of
        // `self.cache` that `get_column` needs.
        let y = &self.y;
        let active2index = &self.active2index;
        let kernel = self.kernel;
        let q_i: Vec<F> = self
            .cache
            .get_column(i, active_size, |row| {
                y[i] * y[row] * kernel.kernel(active2index[i], active2index[row])
            })
            .to_vec();
        let q_j: Vec<F> = self
            .cache
            .get_column(j, active_size, |row| {
                y[j] * y[row] * kernel.kernel(active2index[j], active2index[row])
            })
            .to_vec();

        let c = self.params.c;
        let old_alpha_i = self.alpha[i];
        let old_alpha_j = self.alpha[j];
        let two = F::from_f64(2.0).unwrap();

        let opposite_signs = self.y[i] * self.y[j] < F::zero();
        let eta = if opposite_signs {
            q_i[i] + q_j[j] + two * q_i[j]
        } else {
            q_i[i] + q_j[j] - two * q_i[j]
        };

        if eta <= F::zero() {
            log::debug!("degenerate step at active ({}, {}): eta <= 0, skipping", i, j);
            return false;
        }

        if opposite_signs {
            let l_bound = F::zero().max(self.alpha[j] - self.alpha[i]);
            let h_bound = c.min(c + self.alpha[j] - self.alpha[i]);
            self.alpha[j] = (self.alpha[j] + (-self.g[i] - self.g[j]) / eta)
                .max(l_bound)
                .min(h_bound);
            self.alpha[i] = self.alpha[i] + (self.alpha[j] - old_alpha_j);
        } else {
            let l_bound = F::zero().max(self.alpha[i] + self.alpha[j] - c);
            let h_bound = c.min(self.alpha[i] + self.alpha[j]);
            self.alpha[j] = (self.alpha[j] + (self.g[i] - self.g[j]) / eta)
                .max(l_bound)
                .min(h_bound);
            self.alpha[i] = self.alpha[i] - (self.alpha[j] - old_alpha_j);
        }

        self.status[i] = Status::of(self.alpha[i], c);
        self.status[j] = Status::of(self.alpha[j], c);

        debug_assert!(self.alpha[i] >= F::zero() && self.alpha[i] <= c);
        debug_assert!(self.alpha[j] >= F::zero() && self.alpha[j] <= c);

        let delta_i = self.alpha[i] - old_alpha_i;
        let delta_j = self.alpha[j] - old_alpha_j;
        for k in 0..active_size {
            self.g[k] += q_i[k] * delta_i + q_j[k] * delta_j;
        }
        true
    }

    /// Recomputes `lambda_eq` over the FREE set and scans the shrink
    /// predicate across every active position to find the KKT violation
    /// (§4.4). When `stepped` is `false` (the preceding step was degenerate
    /// and changed nothing), the shrink-iteration counters and eviction are
    /// skipped entirely: §4.3 requires that a no-op step not count towards
    /// shrinking any example.
    fn shrink_sweep(&mut self, stepped: bool) -> F {
        let mut lambda_eq = F::zero();
        let mut free_count = 0usize;
        for k in 0..self.active_size {
            if self.is_free(k) {
                lambda_eq -= self.g[k] * self.y[k];
                free_count += 1;
            }
        }
        self.lambda_eq = if free_count > 0 {
            lambda_eq / F::from_usize(free_count).unwrap()
        } else {
            F::zero()
        };

        let mut viol = F::zero();
        let mut k = 0;
        while k < self.active_size {
            let lambda_up = -(self.g[k] + self.y[k] * self.lambda_eq);

            if !self.is_lower_bound(k) && lambda_up < -viol {
                viol = -lambda_up;
            }
            if !self.is_upper_bound(k) && lambda_up > viol {
                viol = lambda_up;
            }

            if !stepped {
                k += 1;
                continue;
            }

            if lambda_up * self.status[k].sign::<F>() > self.shrink_eps {
                self.shrink_iter[k] += 1;
                if self.shrink_iter[k] > self.params.shrink_size {
                    self.active_size -= 1;
                    let new_active_size = self.active_size;
                    self.swap_index(k, new_active_size);
                    self.cache.update(new_active_size);
                    continue; // re-examine the example now sitting at k
                }
            } else {
                self.shrink_iter[k] = 0;
            }
            k += 1;
        }

        viol
    }

    /// Verifies and reactivates shrunk examples after apparent convergence
    /// (§4.5). Returns the number reactivated; zero confirms optimality.
    fn reactivate(&mut self) -> usize {
        log::info!("checking optimality of {} inactive examples", self.l - self.active_size);

        let mut clf = Classifier::new(self.kernel, -self.lambda_eq);
        for i in 0..self.l {
            if !self.is_lower_bound(i) {
                clf.add(self.alpha[i] * self.y[i], self.active2index[i]);
            }
        }

        let mut reactivated = 0usize;
        let mut k = self.l;
        while k > self.active_size {
            k -= 1;
            let orig_k = self.active2index[k];
            let u = F::one() - self.y[k] * clf.classify(orig_k);

            let violates = (!self.is_upper_bound(k) && u < -self.params.eps)
                || (!self.is_lower_bound(k) && u > self.params.eps);

            if violates {
                let new_active_size = self.active_size;
                self.swap_index(k, new_active_size);
                self.active_size += 1;
                reactivated += 1;
                k += 1; // re-examine the position k now holds
            }
        }

        reactivated
    }
}
