// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration: schedule policy, timeouts, output layout, and the environment-derived
//! toggles the reference implementation reads as `AFL_*`/`PACFIX_*` variables.

use std::env;
use std::path::PathBuf;

use typed_builder::TypedBuilder;

use getters::Getters;

/// Queue scheduling policy. The frequency-weighted variants (`Fast` through `Rare`) are the ones
/// that consult the `n_fuzz` table; `Directed` never does, regardless of this setting, once
/// `directed_mode` is set on [`Configuration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Plain round-robin scheduling; never consults `n_fuzz`.
    Plain,
    Fast,
    Coe,
    Lin,
    Quad,
    Explore,
    Exploit,
    Mmopt,
    Rare,
}

impl Schedule {
    /// Whether this schedule consults the `n_fuzz` frequency table.
    pub fn is_frequency_weighted(self) -> bool {
        matches!(
            self,
            Schedule::Fast
                | Schedule::Coe
                | Schedule::Lin
                | Schedule::Quad
                | Schedule::Explore
                | Schedule::Exploit
                | Schedule::Mmopt
                | Schedule::Rare
        )
    }
}

pub const KEEP_UNIQUE_HANG: u64 = 500;
pub const KEEP_UNIQUE_CRASH: u64 = 5000;
pub const N_FUZZ_SIZE: usize = 1 << 21;
pub const VALUATION_TIMEOUT_SECS: u32 = 10;
pub const VALUATION_HASH_READ_CAP: usize = 32 * 1024 * 1024;

/// Engine-wide configuration, assembled once at startup.
#[derive(Debug, Clone, TypedBuilder, Getters)]
pub struct Configuration {
    schedule: Schedule,
    #[builder(default = false)]
    directed_mode: bool,
    #[builder(default = false)]
    keep_timeouts: bool,
    hang_timeout_ms: u32,
    exec_timeout_ms: u32,
    #[builder(default = false)]
    simple_files: bool,
    out_dir: PathBuf,
    #[builder(default = false)]
    no_crash_readme: bool,
    #[builder(default, setter(strip_option))]
    infoexec: Option<PathBuf>,
    #[builder(default, setter(strip_option))]
    valuation: Option<ValuationConfig>,
}

/// Valuation subsystem settings, present only when both `PACFIX_VAL_EXE` and `PACFIX_COV_DIR`
/// were set at construction time.
#[derive(Debug, Clone, Getters)]
pub struct ValuationConfig {
    val_exe: PathBuf,
    cov_dir: PathBuf,
}

impl Configuration {
    /// Reads `AFL_KEEP_TIMEOUTS`, `AFL_NO_CRASH_README`, `AFL_INFOEXEC`, `PACFIX_VAL_EXE`, and
    /// `PACFIX_COV_DIR` from the process environment and folds them into `builder`'s defaults.
    ///
    /// Call this after `Configuration::builder()...` but before `.build()` by applying its
    /// return value's setters, or simply prefer this over `builder()` directly when the
    /// environment should take precedence over code defaults.
    pub fn keep_timeouts_from_env() -> bool {
        env::var_os("AFL_KEEP_TIMEOUTS").is_some()
    }

    pub fn no_crash_readme_from_env() -> bool {
        env::var_os("AFL_NO_CRASH_README").is_some()
    }

    pub fn infoexec_from_env() -> Option<PathBuf> {
        env::var_os("AFL_INFOEXEC").map(PathBuf::from)
    }

    /// Builds a [`ValuationConfig`] iff both `PACFIX_VAL_EXE` and `PACFIX_COV_DIR` are set.
    pub fn valuation_from_env() -> Option<ValuationConfig> {
        let val_exe = env::var_os("PACFIX_VAL_EXE")?;
        let cov_dir = env::var_os("PACFIX_COV_DIR")?;
        Some(ValuationConfig {
            val_exe: PathBuf::from(val_exe),
            cov_dir: PathBuf::from(cov_dir),
        })
    }
}
