// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Multi-map novelty orchestration: the protocol that talks to a [`PathScheduler`] to turn a raw
//! trace into a `(primary, diversity)` novelty tag and a new-path flag.

use crate::classify;
use crate::novelty::{self, LEVEL_NONE};
use crate::scheduler::{NewPathContext, PathScheduler};

const PRIMARY_SHIFT: u8 = 0;
const DIVERSITY_SHIFT: u8 = 2;

/// Which fringe-expansion protocol to run. `TwoPass` is the default; `SinglePass` trades a
/// possibly-stale virgin set for one fewer round trip to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiMapStrategy {
    TwoPass,
    SinglePass,
}

/// Result of one multi-map novelty pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoveltyOutcome {
    /// Bits 0..1 primary level, bits 2..3 max diversity level across non-primary clusters.
    pub tag: u8,
    pub new_paths: bool,
}

impl NoveltyOutcome {
    pub fn none() -> Self {
        Self {
            tag: 0,
            new_paths: false,
        }
    }

    pub fn is_interesting(&self) -> bool {
        self.tag != 0 || self.new_paths
    }
}

fn fold_tag(new_bits: &[u8]) -> u8 {
    let primary = new_bits.first().copied().unwrap_or(LEVEL_NONE);
    let diversity = new_bits.iter().skip(1).copied().max().unwrap_or(LEVEL_NONE);
    (primary << PRIMARY_SHIFT) | (diversity << DIVERSITY_SHIFT)
}

fn run_discover_pass(trace: &[u8], virgins: &mut [crate::scheduler::VirginHandle<'_>], new_bits: &mut [u8], modify: bool) {
    let mut word_start = 0usize;
    while word_start < trace.len() {
        let word_end = (word_start + novelty::WORD_SIZE).min(trace.len());
        let current_word = &trace[word_start..word_end];

        let mut windows: Vec<&mut [u8]> = virgins
            .iter_mut()
            .map(|v| {
                let end = word_end.min(v.bits.len());
                let start = word_start.min(end);
                &mut v.bits[start..end]
            })
            .collect();

        novelty::discover_word_mul(new_bits, current_word, &mut windows, modify);
        word_start += novelty::WORD_SIZE;
    }
}

/// Assembles this pass's full virgin-map list: the engine-owned primary map at index 0, cluster
/// 0, followed by whatever non-primary clusters the scheduler currently considers relevant to
/// `targets`. Mirrors the reference implementation's `afl->virgins[0] = afl->virgin_bits;` followed
/// by `aflrun_get_virgins(..., afl->virgins + 1, afl->clusters + 1)`.
fn collect_virgins<'p, S: PathScheduler>(
    scheduler: &mut S,
    primary: &'p mut [u8],
    targets: &[u8],
) -> Vec<crate::scheduler::VirginHandle<'p>> {
    let extra = scheduler.get_virgins(targets);
    let mut virgins = Vec::with_capacity(extra.len() + 1);
    virgins.push(crate::scheduler::VirginHandle {
        cluster: 0,
        bits: primary,
    });
    virgins.extend(extra);
    virgins
}

/// Runs the dry-run/re-query/commit protocol against `scheduler` for one execution's `trace`,
/// classifying it in place if (and only if) the read-only skim suggests novelty.
///
/// `primary` is the engine's own primary virgin map (cluster 0); `targets` selects which
/// additional virgin maps the scheduler considers relevant; `freachables`, `reachables`, and
/// `ctx` are the instrumentation vectors forwarded verbatim to `PathScheduler::has_new_path`.
#[allow(clippy::too_many_arguments)]
pub fn detect<S: PathScheduler>(
    scheduler: &mut S,
    primary: &mut [u8],
    trace: &mut [u8],
    targets: &[u8],
    freachables: &[u8],
    reachables: &[u8],
    ctx: &[u8],
    queued_items: usize,
    inc: bool,
    strategy: MultiMapStrategy,
) -> NoveltyOutcome {
    {
        let mut virgins = collect_virgins(scheduler, primary, targets);
        let refs: Vec<&[u8]> = virgins.iter_mut().map(|v| &*v.bits).collect();
        if !novelty::skim(&refs, trace) {
            return NoveltyOutcome::none();
        }
    }

    classify::classify(trace);

    let single_pass_commits_now = strategy == MultiMapStrategy::SinglePass;
    let (tag_first, has_new_bits) = {
        let mut virgins = collect_virgins(scheduler, primary, targets);
        let mut new_bits = vec![LEVEL_NONE; virgins.len()];
        run_discover_pass(trace, &mut virgins, &mut new_bits, single_pass_commits_now);
        (fold_tag(&new_bits), new_bits.iter().any(|&b| b > LEVEL_NONE))
    };

    let path_ctx = NewPathContext {
        tag: tag_first,
        freachables,
        reachables,
        ctx,
        queued_items,
        inc,
    };
    let new_paths = scheduler.has_new_path(&path_ctx);

    if !has_new_bits && !new_paths {
        return NoveltyOutcome::none();
    }

    match strategy {
        MultiMapStrategy::SinglePass => NoveltyOutcome {
            tag: tag_first,
            new_paths,
        },
        MultiMapStrategy::TwoPass => {
            let mut virgins = collect_virgins(scheduler, primary, targets);
            let mut new_bits = vec![LEVEL_NONE; virgins.len()];
            run_discover_pass(trace, &mut virgins, &mut new_bits, true);
            NoveltyOutcome {
                tag: fold_tag(&new_bits),
                new_paths,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scheduler::VirginHandle;

    /// Only models the scheduler's *own* (non-primary) clusters; the primary map is supplied
    /// directly to `detect` by the caller, matching the reference implementation's
    /// `afl->virgins[0] = afl->virgin_bits`.
    struct FakeScheduler {
        diversity: Vec<u8>,
        new_path: bool,
    }

    impl PathScheduler for FakeScheduler {
        fn get_virgins(&mut self, _targets: &[u8]) -> Vec<VirginHandle<'_>> {
            vec![VirginHandle {
                cluster: 1,
                bits: &mut self.diversity,
            }]
        }
        fn has_new_path(&mut self, _ctx: &NewPathContext) -> bool {
            self.new_path
        }
        fn max_clusters(&mut self, _queued_items: usize) -> usize {
            1
        }
        fn get_seed_virgins(&mut self, _queued_items: usize) -> Vec<VirginHandle<'_>> {
            self.get_virgins(&[])
        }
        fn queue_cycle(&mut self) -> u32 {
            0
        }
        fn recover_virgin(&mut self) {}
    }

    #[test]
    fn reports_no_novelty_when_skim_is_clean() {
        let mut sched = FakeScheduler {
            diversity: vec![0; 8],
            new_path: false,
        };
        let mut primary = vec![0u8; 8];
        let mut trace = vec![0u8; 8];
        let out = detect(
            &mut sched,
            &mut primary,
            &mut trace,
            &[],
            &[],
            &[],
            &[],
            1,
            false,
            MultiMapStrategy::TwoPass,
        );
        assert_eq!(out, NoveltyOutcome::none());
    }

    #[test]
    fn two_pass_commits_on_primary_novelty() {
        let mut sched = FakeScheduler {
            diversity: vec![0; 8],
            new_path: false,
        };
        let mut primary = vec![0xffu8; 8];
        let mut trace = vec![0u8; 8];
        trace[2] = 4; // classified to bucket 8
        let out = detect(
            &mut sched,
            &mut primary,
            &mut trace,
            &[],
            &[],
            &[],
            &[],
            1,
            false,
            MultiMapStrategy::TwoPass,
        );
        assert!(out.is_interesting());
        assert_eq!(out.tag & 0x03, 2);
        assert_eq!(primary[2], 0xf7);
    }

    #[test]
    fn diversity_only_novelty_is_reported_without_primary_bits() {
        let mut sched = FakeScheduler {
            diversity: vec![0xffu8; 8],
            new_path: false,
        };
        let mut primary = vec![0u8; 8]; // already fully seen: no primary novelty possible
        let mut trace = vec![0u8; 8];
        trace[5] = 2;
        let out = detect(
            &mut sched,
            &mut primary,
            &mut trace,
            &[],
            &[],
            &[],
            &[],
            1,
            false,
            MultiMapStrategy::TwoPass,
        );
        assert!(out.is_interesting());
        assert_eq!(out.tag & 0x03, 0);
        assert_eq!((out.tag >> 2) & 0x03, 2);
    }

    #[test]
    fn single_pass_commits_on_first_pass() {
        let mut sched = FakeScheduler {
            diversity: vec![0; 8],
            new_path: false,
        };
        let mut primary = vec![0xffu8; 8];
        let mut trace = vec![0u8; 8];
        trace[0] = 1;
        let out = detect(
            &mut sched,
            &mut primary,
            &mut trace,
            &[],
            &[],
            &[],
            &[],
            1,
            false,
            MultiMapStrategy::SinglePass,
        );
        assert!(out.is_interesting());
        assert_eq!(primary[0], 0xfe);
    }
}
