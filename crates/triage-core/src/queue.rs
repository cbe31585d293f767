// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! The queue model: the record the save pipeline populates per accepted input, and the narrow
//! interface it calls back into. Queue storage, scheduling order, and trimming are owned by the
//! consumer; this crate only describes the fields it writes and the calls it makes.

use getters::Getters;
use typed_builder::TypedBuilder;

/// One accepted queue entry, as populated by the save-if-interesting pipeline.
///
/// Never freed by this crate; the consumer owns the entry's lifetime once `add_to_queue` returns.
#[derive(Debug, Clone, TypedBuilder, Getters)]
pub struct QueueEntry {
    /// Path under `<out>/queue/` this entry was persisted to.
    fname: String,
    len: usize,
    #[builder(default = false)]
    tested: bool,
    path_cksum: u64,
    exec_cksum: u64,
    #[builder(default = false)]
    has_new_cov: bool,
    /// Set when the entry was accepted on diversity/new-path grounds alone, with no new primary
    /// edge.
    #[builder(default = false)]
    aflrun_extra: bool,
    /// Index into the `n_fuzz` frequency table this entry seeded, if the active schedule tracks
    /// one.
    #[builder(default)]
    n_fuzz_entry: Option<usize>,
}

/// The pipeline's one-way calls into queue storage and calibration. Deliberately excludes
/// anything the scheduler or forkserver already own.
pub trait QueueSink {
    /// Register `entry` as a new queue member, returning its assigned `id:NNNNNN` sequence
    /// number.
    fn add_to_queue(&mut self, entry: QueueEntry) -> u64;

    /// Re-run the just-queued entry to establish stable calibration (exec time, map
    /// variability). A calibration failure is fatal to the caller.
    fn calibrate_case(&mut self, id: u64, mem: &[u8]) -> anyhow::Result<()>;

    /// Cache `mem` alongside the queue entry so later stages can re-read it without touching
    /// disk.
    fn queue_testcase_store_mem(&mut self, id: u64, mem: &[u8]);
}
