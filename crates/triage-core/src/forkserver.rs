// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! The forkserver collaborator: the main-target execution surface the pipeline drives and reads
//! from. Only defined here as a trait — the forkserver implementation itself (process spawn,
//! shared-memory trace map, persistent-mode loop) is out of scope for this crate.

/// Outcome of one target execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Ok,
    Crash,
    Tmout,
    Error,
}

/// The state and operations the save pipeline reads from or drives on the forkserver.
///
/// `trace_virgin` is the forkserver's own single-bitmap virgin map, kept for parity with
/// deployments that run without a path-scheduler; the multi-map novelty protocol (`multimap`)
/// consults the scheduler's per-cluster maps instead and does not read it.
pub trait Forkserver {
    /// Raw (pre-classification) hit-count trace for the last execution.
    fn trace_bits(&self) -> &[u8];
    fn trace_bits_mut(&mut self) -> &mut [u8];

    fn map_size(&self) -> usize;

    /// Instrumentation-provided target vector for the last execution (directed-mode distance or
    /// reachability targets).
    fn trace_targets(&self) -> &[u8];
    fn trace_freachables(&self) -> &[u8];
    fn trace_reachables(&self) -> &[u8];
    fn trace_ctx(&self) -> &[u8];

    fn trace_virgin(&mut self) -> &mut [u8];

    /// Run the target on the currently staged input under `timeout_ms`.
    fn fuzz_run_target(&mut self, timeout_ms: u32) -> Fault;

    /// Re-materialize `mem` as the on-disk testcase the target reads from. `hnb` indicates
    /// whether the caller already knows this input discovered new bits (some forkservers skip a
    /// redundant trim pass when it did). Returns the number of bytes written.
    fn write_to_testcase(&mut self, mem: &[u8], hnb: bool) -> usize;

    fn uses_asan(&self) -> bool;

    /// Signal number that killed the most recent crashing run.
    fn last_kill_signal(&self) -> i32;
}
