//! LRU-evicting cache of kernel-matrix columns.
//!
//! This is the leaf component of the solver: it knows nothing about labels,
//! examples or the kernel function itself. Callers hand it a closure that
//! computes a single row of a column on demand; the cache only decides
//! which prefixes of which columns are worth keeping around.
//!
//! The eviction policy is the classic libsvm/SVMlight `Cache` design: a
//! fixed column budget, least-recently-used eviction of whole columns, and
//! an O(1) `swap_index` that relabels two columns in place instead of
//! invalidating them. Where the original uses an intrusive doubly-linked
//! list of pointer-based nodes, this implementation threads the same list
//! through plain index slots so it stays within safe Rust.

use crate::Float;

const SENTINEL: usize = usize::MAX;

/// A bounded, swap-aware cache over columns of a symmetric kernel matrix.
pub struct KernelCache<F> {
    columns: Vec<Vec<F>>,
    prev: Vec<usize>,
    next: Vec<usize>,
    mru: usize,
    lru: usize,
    total_len: usize,
    budget: usize,
    /// Column queries that were already fully cached. Logging only.
    pub hit: u64,
    /// Column queries that required at least one kernel evaluation. Logging only.
    pub miss: u64,
}

impl<F: Float> KernelCache<F> {
    /// `cache_size_mb` is the caller's memory budget; it is converted to a
    /// column-entry budget using `size_of::<F>()`, mirroring the `-m`
    /// cache-size option of libsvm-family solvers.
    pub fn new(l: usize, cache_size_mb: f64) -> Self {
        let bytes = (cache_size_mb.max(0.0) * 1e6) as usize;
        let budget = (bytes / std::mem::size_of::<F>().max(1)).max(1);
        KernelCache {
            columns: vec![Vec::new(); l],
            prev: vec![SENTINEL; l],
            next: vec![SENTINEL; l],
            mru: SENTINEL,
            lru: SENTINEL,
            total_len: 0,
            budget,
            hit: 0,
            miss: 0,
        }
    }

    fn unlink(&mut self, i: usize) {
        if self.prev[i] == SENTINEL && self.next[i] == SENTINEL && self.mru != i {
            return; // not currently in the list
        }
        let (p, n) = (self.prev[i], self.next[i]);
        if p != SENTINEL {
            self.next[p] = n;
        } else {
            self.mru = n;
        }
        if n != SENTINEL {
            self.prev[n] = p;
        } else {
            self.lru = p;
        }
        self.prev[i] = SENTINEL;
        self.next[i] = SENTINEL;
    }

    fn push_front(&mut self, i: usize) {
        self.prev[i] = SENTINEL;
        self.next[i] = self.mru;
        if self.mru != SENTINEL {
            self.prev[self.mru] = i;
        }
        self.mru = i;
        if self.lru == SENTINEL {
            self.lru = i;
        }
    }

    fn touch(&mut self, i: usize) {
        if self.mru == i {
            return;
        }
        self.unlink(i);
        self.push_front(i);
    }

    /// Evict least-recently-used columns (never `keep`) until `extra` more
    /// entries fit inside the budget.
    fn make_room(&mut self, keep: usize, extra: usize) {
        while self.total_len + extra > self.budget {
            let victim = self.lru;
            if victim == SENTINEL || victim == keep {
                break;
            }
            self.unlink(victim);
            self.total_len -= self.columns[victim].len();
            self.columns[victim].clear();
        }
    }

    /// Returns the first `active_size` entries of column `i`, computing any
    /// rows beyond the previously filled prefix via `compute(row)`. The
    /// slice is only valid until the next call that mutates the cache.
    pub fn get_column(
        &mut self,
        i: usize,
        active_size: usize,
        mut compute: impl FnMut(usize) -> F,
    ) -> &[F] {
        let old_len = self.columns[i].len();
        if old_len >= active_size {
            self.hit += 1;
        } else {
            self.miss += 1;
            self.make_room(i, active_size - old_len);
            self.columns[i].reserve(active_size - old_len);
            for row in old_len..active_size {
                self.columns[i].push(compute(row));
            }
            self.total_len += active_size - old_len;
        }
        self.touch(i);
        &self.columns[i][..active_size]
    }

    /// Relabels columns `i` and `j`: a future query at `i` returns what
    /// would previously have been returned for `j`, and vice versa. Every
    /// retained column — including the two just relabeled — has its row
    /// `i` and row `j` entries swapped to stay consistent with the
    /// symmetric matrix; columns too short to contain both rows are
    /// dropped rather than left stale.
    pub fn swap_index(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.unlink(i);
        self.unlink(j);
        self.columns.swap(i, j);
        if !self.columns[i].is_empty() {
            self.push_front(i);
        }
        if !self.columns[j].is_empty() {
            self.push_front(j);
        }

        // Every retained column, including the two just relabeled above,
        // still needs its row `lo`/`hi` entries swapped: libsvm's canonical
        // `Cache::swap_index` re-inserts the relabeled nodes before running
        // this sweep and does not exempt them from it either.
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        for k in 0..self.columns.len() {
            let len = self.columns[k].len();
            if len > hi {
                self.columns[k].swap(lo, hi);
            } else if len > lo {
                self.total_len -= len;
                self.columns[k].clear();
                self.unlink(k);
            }
        }
    }

    /// Entries at positions `>= new_active_size` no longer need to be kept.
    pub fn update(&mut self, new_active_size: usize) {
        for col in self.columns.iter_mut() {
            if col.len() > new_active_size {
                self.total_len -= col.len() - new_active_size;
                col.truncate(new_active_size);
            }
        }
    }

    /// Discards all cached columns, used after a reactivation pass expands
    /// the active set and cached prefixes can no longer be trusted.
    /// `active_size` is the active set size the cache will be queried
    /// against from this point on (libsvm's `Cache::rebuildCache` takes the
    /// same argument); every cached prefix is shorter than that by
    /// construction, so there is nothing to resize, only to discard.
    pub fn rebuild(&mut self, active_size: usize) {
        debug_assert!(active_size <= self.columns.len());
        for col in self.columns.iter_mut() {
            col.clear();
        }
        self.prev.iter_mut().for_each(|p| *p = SENTINEL);
        self.next.iter_mut().for_each(|n| *n = SENTINEL);
        self.mru = SENTINEL;
        self.lru = SENTINEL;
        self.total_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(i: usize, j: usize) -> f64 {
        (i as f64) * 10.0 + (j as f64)
    }

    #[test]
    fn fills_requested_prefix_and_counts_miss() {
        let mut cache = KernelCache::<f64>::new(4, 100.0);
        let col = cache.get_column(1, 3, |row| linear(1, row));
        assert_eq!(col, &[10.0, 11.0, 12.0]);
        assert_eq!(cache.miss, 1);
        assert_eq!(cache.hit, 0);
    }

    #[test]
    fn repeated_query_within_prefix_is_a_hit() {
        let mut cache = KernelCache::<f64>::new(4, 100.0);
        cache.get_column(1, 3, |row| linear(1, row));
        let col = cache.get_column(1, 2, |row| linear(1, row));
        assert_eq!(col, &[10.0, 11.0]);
        assert_eq!(cache.hit, 1);
    }

    #[test]
    fn extending_prefix_only_computes_new_rows() {
        let mut cache = KernelCache::<f64>::new(4, 100.0);
        cache.get_column(1, 2, |row| linear(1, row));
        let mut calls = Vec::new();
        let col = cache.get_column(1, 4, |row| {
            calls.push(row);
            linear(1, row)
        });
        assert_eq!(col, &[10.0, 11.0, 12.0, 13.0]);
        assert_eq!(calls, vec![2, 3]);
    }

    /// A genuinely symmetric stand-in for `Q[a][b] = y_a y_b K(a, b)`, so
    /// this test can check `Q[a][b] == Q[b][a]` post-swap instead of just
    /// tracking opaque row movement.
    fn sym(i: usize, j: usize) -> f64 {
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        (lo as f64) * 10.0 + (hi as f64)
    }

    #[test]
    fn swap_index_relabels_columns_symmetrically() {
        let mut cache = KernelCache::<f64>::new(4, 100.0);
        cache.get_column(0, 4, |row| sym(0, row));
        cache.get_column(1, 4, |row| sym(1, row));
        cache.swap_index(0, 1);

        // Position 0 now holds what position 1 used to (and vice versa), so
        // every row in both relabeled columns must be permuted too, not just
        // the *other* cached columns.
        let col0 = cache.get_column(0, 4, |_| panic!("should be cached")).to_vec();
        let col1 = cache.get_column(1, 4, |_| panic!("should be cached")).to_vec();
        assert_eq!(col0, vec![11.0, 1.0, 12.0, 13.0]);
        assert_eq!(col1, vec![1.0, 0.0, 2.0, 3.0]);
        // Q[a][b] == Q[b][a] still holds at the relabeled positions.
        assert_eq!(col0[1], col1[0]);
    }

    #[test]
    fn update_truncates_beyond_new_active_size() {
        let mut cache = KernelCache::<f64>::new(4, 100.0);
        cache.get_column(0, 4, |row| linear(0, row));
        cache.update(2);
        let mut calls = Vec::new();
        let col = cache.get_column(0, 4, |row| {
            calls.push(row);
            linear(0, row)
        });
        assert_eq!(col, &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(calls, vec![2, 3]);
    }

    #[test]
    fn rebuild_discards_everything() {
        let mut cache = KernelCache::<f64>::new(4, 100.0);
        cache.get_column(0, 4, |row| linear(0, row));
        cache.rebuild(4);
        let mut calls = 0;
        cache.get_column(0, 4, |row| {
            calls += 1;
            linear(0, row)
        });
        assert_eq!(calls, 4);
    }

    #[test]
    fn eviction_respects_a_tight_budget() {
        // budget of 4 floats can hold exactly one length-4 column.
        let mut cache = KernelCache::<f64>::new(4, 0.000032);
        cache.get_column(0, 4, |row| linear(0, row));
        cache.get_column(1, 4, |row| linear(1, row));
        // column 0 must have been evicted to make room for column 1.
        let mut recomputed = false;
        cache.get_column(0, 4, |_| {
            recomputed = true;
            0.0
        });
        assert!(recomputed);
    }
}
