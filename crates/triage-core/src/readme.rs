// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! One-shot crash README writer.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Renders `bytes` as a human-readable size (`"50.0 MB"`, `"1.0 GB"`, ...), matching the units the
/// reference implementation's status screen uses for the memory limit.
pub fn describe_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Creates `<out>/crashes/README.txt` exclusively, skipping silently if it already exists or the
/// create otherwise fails (best-effort, per the recoverable-silent error policy).
pub fn write_crash_readme(crashes_dir: &Path, cmdline: &str, mem_limit_bytes: u64) {
    let path = crashes_dir.join("README.txt");
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(err) => {
            log::warn!("crash README not written at {}: {err}", path.display());
            return;
        }
    };

    let body = format!(
        "Command line used to find this crash:\n\n{cmdline}\n\n\
         If you can't reproduce a bug outside of afl-fuzz, be sure to set the same\n\
         memory limit. The limit used for this fuzzing session was {}.\n",
        describe_bytes(mem_limit_bytes)
    );

    if let Err(err) = file.write_all(body.as_bytes()) {
        log::warn!("crash README write failed at {}: {err}", path.display());
    }
}
