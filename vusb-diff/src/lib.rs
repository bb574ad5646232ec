// Copyright 2024-Present vusb-analyzer Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Streaming longest-common-subsequence diff over two fingerprinted
//! `Transaction` streams (§4.5). [`DiffEngine::run`] computes matching
//! blocks with a patience-diff-style algorithm, committing blocks to its
//! caller as soon as they are found rather than only at the end, with
//! cooperative cancellation and a progress estimate derived from the last
//! committed block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vusb_model::Transaction;

/// One matching run: the `n` elements starting at `a[i]` equal those
/// starting at `b[j]`, non-overlapping and chronologically ordered. The
/// canonical sentinel `(len_a, len_b, 0)` marks completion and is never
/// surfaced to [`DiffEngine::run`]'s callback (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchBlock {
    pub i: usize,
    pub j: usize,
    pub n: usize,
}

/// Cooperative stop flag shared between the engine's compute thread and
/// whatever wants to cancel it (§5).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Computes matching blocks between two fingerprint sequences and reports
/// progress as blocks are committed (§4.5).
#[derive(Debug, Default)]
pub struct DiffEngine {
    last_i: usize,
    last_j: usize,
    total: usize,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[0, 1]`, derived from the last emitted block as
    /// `(i_last + j_last) / (|A| + |B|)`; `1.0` once the run has completed.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        ((self.last_i + self.last_j) as f64 / self.total as f64).min(1.0)
    }

    /// Runs the diff over `a` and `b`, calling `on_block` for every
    /// non-sentinel matching block as soon as it is found, in chronological
    /// order. Returns `true` if the run completed, `false` if `cancel` was
    /// observed first (§5: "abandon the computation promptly without
    /// corrupting already-emitted blocks" — blocks already passed to
    /// `on_block` stand regardless of how the run ends).
    pub fn run<F, K>(
        &mut self,
        a: &[K],
        b: &[K],
        cancel: &CancelToken,
        mut on_block: F,
    ) -> bool
    where
        K: std::hash::Hash + Eq + Clone,
        F: FnMut(MatchBlock),
    {
        self.total = a.len() + b.len();
        self.last_i = 0;
        self.last_j = 0;

        let mut stack = vec![(0usize, a.len(), 0usize, b.len())];
        // Collected out of order (recursive bisection visits the middle of
        // a range before its tail), then sorted once so blocks reach the
        // caller in chronological order, matching the streaming contract.
        let mut found = Vec::new();

        while let Some((a_lo, a_hi, b_lo, b_hi)) = stack.pop() {
            if cancel.is_cancelled() {
                tracing::debug!("diff engine cancelled mid-run");
                return false;
            }
            if a_lo >= a_hi || b_lo >= b_hi {
                continue;
            }
            match longest_match(&a[a_lo..a_hi], &b[b_lo..b_hi]) {
                Some((rel_i, rel_j, n)) => {
                    let i = a_lo + rel_i;
                    let j = b_lo + rel_j;
                    found.push(MatchBlock { i, j, n });
                    stack.push((a_lo, i, b_lo, j));
                    stack.push((i + n, a_hi, j + n, b_hi));
                }
                None => continue,
            }
        }

        found.sort_by_key(|m| (m.i, m.j));
        for block in found {
            self.last_i = block.i + block.n;
            self.last_j = block.j + block.n;
            on_block(block);
        }
        self.last_i = a.len();
        self.last_j = b.len();
        true
    }
}

/// Finds the longest run common to `a` and `b`, preferring the
/// earliest-starting match in `a` and, among ties, the earliest in `b` —
/// the same tie-break a patience-diff implementation uses so the result is
/// deterministic (§4.5 "Determinism").
fn longest_match<K: std::hash::Hash + Eq + Clone>(a: &[K], b: &[K]) -> Option<(usize, usize, usize)> {
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut b_index: HashMap<&K, Vec<usize>> = HashMap::new();
    for (j, k) in b.iter().enumerate() {
        b_index.entry(k).or_default().push(j);
    }

    // `run_ending_at[j]` is the length of the match ending at `b[j]` for
    // the current `a[i]`, i.e. the classic O(|a|*|b|)-worst-case but
    // typically-sparse longest-common-substring DP over hashed positions.
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();
    let mut best = (0usize, 0usize, 0usize);

    for (i, a_item) in a.iter().enumerate() {
        let mut next_run: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b_index.get(a_item) {
            for &j in positions {
                let run = run_ending_at.get(&j.wrapping_sub(1)).copied().unwrap_or(0) + 1;
                next_run.insert(j, run);
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        run_ending_at = next_run;
    }

    if best.2 == 0 {
        None
    } else {
        Some(best)
    }
}

/// Fingerprint-level key for one transaction, derived from
/// `Transaction::get_diff_summary` (§4.1, §4.5).
pub fn fingerprint(t: &Transaction) -> vusb_model::DiffSummary {
    t.get_diff_summary()
}

/// Bidirectional correlation between two diffed sessions: for every
/// transaction that matched, the other side and the index of its match
/// (§4.5 "Correlation"). Keyed by `(side, index)` into the two parallel
/// streams the caller owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Default)]
pub struct CorrelationMap {
    links: HashMap<(Side, usize), (Side, usize)>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every index pair covered by one matching block (`n > 0`
    /// blocks only — the sentinel is never passed here).
    pub fn record_block(&mut self, block: MatchBlock) {
        for offset in 0..block.n {
            let a_idx = block.i + offset;
            let b_idx = block.j + offset;
            self.links.insert((Side::A, a_idx), (Side::B, b_idx));
            self.links.insert((Side::B, b_idx), (Side::A, a_idx));
        }
    }

    pub fn peer(&self, side: Side, index: usize) -> Option<(Side, usize)> {
        self.links.get(&(side, index)).copied()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_completion(a: &[i32], b: &[i32]) -> (Vec<MatchBlock>, bool) {
        let mut engine = DiffEngine::new();
        let cancel = CancelToken::new();
        let mut blocks = Vec::new();
        let completed = engine.run(a, b, &cancel, |blk| blocks.push(blk));
        (blocks, completed)
    }

    #[test]
    fn identical_sequences_match_in_one_block() {
        let (blocks, completed) = run_to_completion(&[1, 2, 3], &[1, 2, 3]);
        assert!(completed);
        assert_eq!(blocks, vec![MatchBlock { i: 0, j: 0, n: 3 }]);
    }

    #[test]
    fn disjoint_sequences_have_no_matches() {
        let (blocks, completed) = run_to_completion(&[1, 2, 3], &[4, 5, 6]);
        assert!(completed);
        assert!(blocks.is_empty());
    }

    #[test]
    fn blocks_are_emitted_in_chronological_order() {
        let (blocks, _) = run_to_completion(&[0, 1, 2, 9, 3, 4, 5], &[1, 2, 9, 3, 4, 8]);
        for pair in blocks.windows(2) {
            assert!(pair[0].i < pair[1].i);
            assert!(pair[0].j < pair[1].j);
        }
    }

    #[test]
    fn concatenated_slices_form_a_common_subsequence() {
        let a = vec![1, 2, 3, 9, 4, 5, 8, 6, 7];
        let b = vec![0, 1, 2, 3, 4, 5, 6, 7, 10];
        let (blocks, _) = run_to_completion(&a, &b);

        let mut a_common = Vec::new();
        let mut b_common = Vec::new();
        for blk in &blocks {
            a_common.extend_from_slice(&a[blk.i..blk.i + blk.n]);
            b_common.extend_from_slice(&b[blk.j..blk.j + blk.n]);
        }
        assert_eq!(a_common, b_common);
    }

    #[test]
    fn progress_reaches_one_on_completion() {
        let mut engine = DiffEngine::new();
        let cancel = CancelToken::new();
        engine.run(&[1, 2, 3], &[1, 2, 3], &cancel, |_| {});
        assert_eq!(engine.progress(), 1.0);
    }

    #[test]
    fn cancellation_stops_the_run_early() {
        let mut engine = DiffEngine::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let completed = engine.run(&[1, 2, 3], &[1, 2, 3], &cancel, |_| {});
        assert!(!completed);
    }

    #[test]
    fn determinism_across_repeated_runs() {
        let a = [1, 2, 2, 3, 4];
        let b = [2, 1, 2, 3, 4];
        let (first, _) = run_to_completion(&a, &b);
        let (second, _) = run_to_completion(&a, &b);
        assert_eq!(first, second);
    }

    #[test]
    fn correlation_map_is_bidirectional() {
        let mut map = CorrelationMap::new();
        map.record_block(MatchBlock { i: 2, j: 5, n: 3 });
        assert_eq!(map.peer(Side::A, 2), Some((Side::B, 5)));
        assert_eq!(map.peer(Side::B, 7), Some((Side::A, 4)));
        assert_eq!(map.peer(Side::A, 0), None);
    }

    #[test]
    fn empty_inputs_complete_immediately_with_no_blocks() {
        let (blocks, completed) = run_to_completion(&[], &[]);
        assert!(completed);
        assert!(blocks.is_empty());
    }
}
