// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Trace classification and simplification.
//!
//! `classify` buckets raw hit counts into log-classes; `simplify` collapses a trace to
//! hit/not-hit for hang and crash triage. Both are byte-pairwise loops rather than 16-bit word
//! loads, which sidesteps host endianness entirely instead of requiring a swap-on-apply step.

use std::sync::OnceLock;

/// `simplify_lookup[0] == 1`, every other byte maps to `128`.
const fn simplify_lookup() -> [u8; 256] {
    let mut table = [128u8; 256];
    table[0] = 1;
    table
}

pub const SIMPLIFY_LOOKUP: [u8; 256] = simplify_lookup();

const fn count_class_lookup8() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = match i {
            0 => 0,
            1 => 1,
            2 => 2,
            3 => 4,
            4..=7 => 8,
            8..=15 => 16,
            16..=31 => 32,
            32..=127 => 64,
            _ => 128,
        };
        i += 1;
    }
    table
}

pub const COUNT_CLASS_LOOKUP8: [u8; 256] = count_class_lookup8();

static COUNT_CLASS_LOOKUP16: OnceLock<Vec<u16>> = OnceLock::new();

/// Returns the lazily-initialized 65536-entry 16-bit class lookup table, building it on first
/// use. Each entry is `(lookup8[high] << 8) | lookup8[low]` for the corresponding byte pair.
fn count_class_lookup16() -> &'static [u16] {
    COUNT_CLASS_LOOKUP16.get_or_init(|| {
        let mut table = vec![0u16; 65536];
        for b1 in 0..256usize {
            for b2 in 0..256usize {
                table[(b1 << 8) + b2] = ((COUNT_CLASS_LOOKUP8[b1] as u16) << 8)
                    | COUNT_CLASS_LOOKUP8[b2] as u16;
            }
        }
        table
    })
}

/// Classify `trace` in place: every byte is replaced with its log-class bucket.
///
/// Applied word-aligned in the reference implementation for speed; here applied byte-by-byte
/// against [`COUNT_CLASS_LOOKUP8`], which produces an identical result to the 16-bit lookup
/// without the endianness subtlety. Idempotent: classifying an already-classified trace is a
/// no-op, since every bucket value is a fixed point of the table.
pub fn classify(trace: &mut [u8]) {
    // Warm the 16-bit table once so later incremental adopters of the word-wise path (if any)
    // observe the same initialized state; the byte loop below does not need it directly.
    let _ = count_class_lookup16();
    for byte in trace.iter_mut() {
        *byte = COUNT_CLASS_LOOKUP8[*byte as usize];
    }
}

/// Destructively simplify `trace` in place: `0 -> 1`, anything else `-> 128`.
pub fn simplify(trace: &mut [u8]) {
    for byte in trace.iter_mut() {
        *byte = SIMPLIFY_LOOKUP[*byte as usize];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classify_buckets_known_values() {
        let mut trace = vec![0u8, 1, 2, 3, 5, 10, 20, 50, 200];
        classify(&mut trace);
        assert_eq!(trace, vec![0, 1, 2, 4, 8, 16, 32, 64, 128]);
    }

    #[test]
    fn classify_is_idempotent() {
        let mut once = vec![0u8, 1, 2, 3, 4, 7, 8, 15, 16, 31, 32, 127, 128, 255];
        classify(&mut once);
        let mut twice = once.clone();
        classify(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn simplify_hit_vs_not_hit() {
        let mut trace = vec![0u8, 5, 0, 255];
        simplify(&mut trace);
        assert_eq!(trace, vec![1, 128, 1, 128]);
    }

    #[test]
    fn lookup16_matches_byte_loop_for_every_pair() {
        let table = count_class_lookup16();
        for b1 in 0..256usize {
            for b2 in (0..256usize).step_by(37) {
                let packed = table[(b1 << 8) + b2];
                let expected = ((COUNT_CLASS_LOOKUP8[b1] as u16) << 8) | COUNT_CLASS_LOOKUP8[b2] as u16;
                assert_eq!(packed, expected);
            }
        }
    }
}
