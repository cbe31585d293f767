// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! The `Engine` context: the single mutable state object the save pipeline operates on.

use std::path::{Path, PathBuf};

use crate::config::{Configuration, N_FUZZ_SIZE};
use crate::valuation::ValuationState;

/// Owns the primary/tmout/crash virgin maps, the saturated `n_fuzz` frequency table, the
/// execution counters, the valuation subsystem's state, and the active [`Configuration`].
///
/// Constructed once and passed by mutable reference into the save pipeline. The classification
/// tables in [`crate::classify`] are deliberately *not* owned here: they are pure, read-only data
/// with no engine-specific state, so they live behind a process-wide [`std::sync::OnceLock`]
/// instead.
pub struct Engine {
    config: Configuration,

    virgin_bits: Vec<u8>,
    virgin_tmout: Vec<u8>,
    virgin_crash: Vec<u8>,
    bitmap_changed: bool,

    n_fuzz: Vec<u32>,

    total_execs: u64,
    total_crashes: u64,
    total_tmouts: u64,
    saved_hangs: u64,
    saved_crashes: u64,
    queued_with_cov: u64,
    total_queued: u64,
    saved_valuation_crashes: u64,
    saved_valuation_positives: u64,
    last_crash_time_ms: Option<u64>,
    last_crash_execs: Option<u64>,
    last_hang_time_ms: Option<u64>,

    valuation: ValuationState,
}

impl Engine {
    pub fn new(map_size: usize, config: Configuration) -> Self {
        Self {
            config,
            virgin_bits: vec![0xff; map_size],
            virgin_tmout: vec![0xff; map_size],
            virgin_crash: vec![0xff; map_size],
            bitmap_changed: false,
            n_fuzz: vec![0; N_FUZZ_SIZE],
            total_execs: 0,
            total_crashes: 0,
            total_tmouts: 0,
            saved_hangs: 0,
            saved_crashes: 0,
            queued_with_cov: 0,
            total_queued: 0,
            saved_valuation_crashes: 0,
            saved_valuation_positives: 0,
            last_crash_time_ms: None,
            last_crash_execs: None,
            last_hang_time_ms: None,
            valuation: ValuationState::new(),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn virgin_bits(&self) -> &[u8] {
        &self.virgin_bits
    }

    pub fn virgin_bits_mut(&mut self) -> &mut [u8] {
        &mut self.virgin_bits
    }

    pub fn virgin_tmout_mut(&mut self) -> &mut [u8] {
        &mut self.virgin_tmout
    }

    pub fn virgin_crash_mut(&mut self) -> &mut [u8] {
        &mut self.virgin_crash
    }

    pub fn bitmap_changed(&self) -> bool {
        self.bitmap_changed
    }

    pub fn mark_bitmap_changed(&mut self) {
        self.bitmap_changed = true;
    }

    /// Saturating increment of the `n_fuzz` counter for `index`, wrapped to the table's fixed
    /// size.
    pub fn bump_n_fuzz(&mut self, index: u64) -> u32 {
        let idx = (index as usize) % self.n_fuzz.len();
        self.n_fuzz[idx] = self.n_fuzz[idx].saturating_add(1);
        self.n_fuzz[idx]
    }

    pub fn reset_n_fuzz(&mut self, index: u64, value: u32) {
        let idx = (index as usize) % self.n_fuzz.len();
        self.n_fuzz[idx] = value;
    }

    pub fn total_execs(&self) -> u64 {
        self.total_execs
    }

    pub fn bump_total_execs(&mut self) {
        self.total_execs += 1;
    }

    pub fn total_crashes(&self) -> u64 {
        self.total_crashes
    }

    pub fn bump_total_crashes(&mut self) {
        self.total_crashes += 1;
    }

    pub fn total_tmouts(&self) -> u64 {
        self.total_tmouts
    }

    pub fn bump_total_tmouts(&mut self) {
        self.total_tmouts += 1;
    }

    pub fn saved_hangs(&self) -> u64 {
        self.saved_hangs
    }

    pub fn bump_saved_hangs(&mut self) {
        self.saved_hangs += 1;
    }

    pub fn saved_crashes(&self) -> u64 {
        self.saved_crashes
    }

    pub fn bump_saved_crashes(&mut self) {
        self.saved_crashes += 1;
    }

    pub fn queued_with_cov(&self) -> u64 {
        self.queued_with_cov
    }

    pub fn bump_queued_with_cov(&mut self) {
        self.queued_with_cov += 1;
    }

    /// Total number of entries ever handed to the queue sink, regardless of whether they carried
    /// new coverage. This is the "current queue size" the scheduler's `has_new_path`/`max_clusters`
    /// calls expect, distinct from [`Self::queued_with_cov`]'s new-coverage-only subset.
    pub fn total_queued(&self) -> u64 {
        self.total_queued
    }

    pub fn bump_total_queued(&mut self) {
        self.total_queued += 1;
    }

    pub fn record_crash(&mut self, elapsed_ms: u64) {
        self.last_crash_time_ms = Some(elapsed_ms);
        self.last_crash_execs = Some(self.total_execs);
    }

    pub fn record_hang(&mut self, elapsed_ms: u64) {
        self.last_hang_time_ms = Some(elapsed_ms);
    }

    pub fn valuation_counters_mut(&mut self) -> (&mut u64, &mut u64) {
        (&mut self.saved_valuation_crashes, &mut self.saved_valuation_positives)
    }

    pub fn valuation_mut(&mut self) -> &mut ValuationState {
        &mut self.valuation
    }

    pub fn out_dir(&self) -> &Path {
        self.config.out_dir()
    }

    /// Writes the primary virgin map out to `<out>/fuzz_bitmap`, clearing `bitmap_changed`.
    pub fn persist_bitmap(&mut self) -> std::io::Result<()> {
        let path = self.fuzz_bitmap_path();
        std::fs::write(&path, &self.virgin_bits)?;
        self.bitmap_changed = false;
        Ok(())
    }

    /// Restores the primary virgin map from `<out>/fuzz_bitmap`, if present.
    pub fn restore_bitmap(&mut self) -> std::io::Result<()> {
        let path = self.fuzz_bitmap_path();
        if !path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(&path)?;
        if bytes.len() == self.virgin_bits.len() {
            self.virgin_bits.copy_from_slice(&bytes);
        }
        Ok(())
    }

    fn fuzz_bitmap_path(&self) -> PathBuf {
        self.config.out_dir().join("fuzz_bitmap")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Schedule;

    fn test_config() -> Configuration {
        Configuration::builder()
            .schedule(Schedule::Explore)
            .hang_timeout_ms(1_000)
            .exec_timeout_ms(1_000)
            .out_dir(std::env::temp_dir())
            .build()
    }

    #[test]
    fn new_engine_starts_all_virgin() {
        let engine = Engine::new(64, test_config());
        assert!(engine.virgin_bits().iter().all(|&b| b == 0xff));
        assert!(!engine.bitmap_changed());
    }

    #[test]
    fn total_queued_counts_every_enqueue_not_just_new_coverage() {
        let mut engine = Engine::new(64, test_config());
        engine.bump_total_queued();
        engine.bump_total_queued();
        engine.bump_queued_with_cov();
        assert_eq!(engine.total_queued(), 2);
        assert_eq!(engine.queued_with_cov(), 1);
    }

    #[test]
    fn n_fuzz_wraps_and_saturates() {
        let mut engine = Engine::new(64, test_config());
        let before = engine.bump_n_fuzz(5);
        assert_eq!(before, 1);
        engine.reset_n_fuzz(5, u32::MAX);
        assert_eq!(engine.bump_n_fuzz(5), u32::MAX);
    }

    #[test]
    fn bitmap_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Configuration::builder()
            .schedule(Schedule::Explore)
            .hang_timeout_ms(1_000)
            .exec_timeout_ms(1_000)
            .out_dir(dir.path().to_path_buf())
            .build();
        let mut engine = Engine::new(16, cfg);
        engine.virgin_bits_mut()[3] = 0x00;
        engine.persist_bitmap().unwrap();
        assert!(!engine.bitmap_changed());

        let mut reloaded = Engine::new(16, Configuration::builder()
            .schedule(Schedule::Explore)
            .hang_timeout_ms(1_000)
            .exec_timeout_ms(1_000)
            .out_dir(dir.path().to_path_buf())
            .build());
        reloaded.restore_bitmap().unwrap();
        assert_eq!(reloaded.virgin_bits()[3], 0x00);
    }
}
