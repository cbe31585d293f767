// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! The path-scheduler collaborator: owns the per-cluster virgin maps and the directed-mode
//! fringe, and decides whether a discovery counts as a new *path* as distinct from a new edge.
//! Only the operations the save pipeline consumes are modeled here; the scheduling policy itself
//! (how clusters are formed, how the fringe grows) is out of scope for this crate.

/// A handle to one of the scheduler's virgin maps, borrowed for the duration of a single novelty
/// pass. Cluster `0` is reserved for the engine's own primary map, which the pipeline supplies
/// directly to [`crate::multimap::detect`] rather than obtaining it from the scheduler; handles
/// returned by [`PathScheduler::get_virgins`]/[`PathScheduler::get_seed_virgins`] are always
/// non-primary (cluster `>= 1`).
pub struct VirginHandle<'a> {
    pub cluster: usize,
    pub bits: &'a mut [u8],
}

/// Context passed to [`PathScheduler::has_new_path`]: the tag produced by the read-only novelty
/// pass, plus the instrumentation vectors for the current execution.
pub struct NewPathContext<'a> {
    pub tag: u8,
    pub freachables: &'a [u8],
    pub reachables: &'a [u8],
    pub ctx: &'a [u8],
    pub queued_items: usize,
    pub inc: bool,
}

/// The six operations the save-if-interesting pipeline consumes from the path scheduler.
pub trait PathScheduler {
    /// Virgin maps relevant to `targets`, primary first. May grow between calls as the
    /// scheduler's fringe expands.
    fn get_virgins(&mut self, targets: &[u8]) -> Vec<VirginHandle<'_>>;

    /// Whether this execution opened a new path, independent of raw edge novelty.
    fn has_new_path(&mut self, ctx: &NewPathContext) -> bool;

    /// Upper bound on the number of clusters the scheduler will ever expose, given the current
    /// queue size. Used to size `new_bits` buffers ahead of a call to `get_virgins`.
    fn max_clusters(&mut self, queued_items: usize) -> usize;

    /// Virgin maps to seed a freshly queued entry against, independent of `targets`.
    fn get_seed_virgins(&mut self, queued_items: usize) -> Vec<VirginHandle<'_>>;

    /// Advance the scheduler's queue cycle counter, returning the new value.
    fn queue_cycle(&mut self) -> u32;

    /// Roll back virgin-map state after a dropped (e.g. empty) input.
    fn recover_virgin(&mut self);
}

/// The only hook the naming subsystem consumes from a custom mutator plugin.
pub trait CustomMutator {
    /// A short, comma-free fragment describing the mutation just applied, or `None` if the
    /// mutator has nothing to add for this execution.
    fn describe(&self) -> Option<String>;
}
