// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Single- and multi-map novelty detection over 64-bit words.
//!
//! Only the 64-bit word path is implemented; the reference implementation's 32-bit fallback is
//! explicitly unsupported here (it is marked `TODO: 32-bit` there too, and multi-map mode never
//! shipped it). Words are represented as byte windows rather than `u64` values so that the
//! multi-map variant can operate directly on the caller's (possibly externally-owned) virgin
//! byte slices without a pointer cast.

/// Per-edge novelty level: nothing new, a new hit-count bucket on a known edge, or a brand new
/// edge.
pub const LEVEL_NONE: u8 = 0;
pub const LEVEL_NEW_BUCKET: u8 = 1;
pub const LEVEL_NEW_EDGE: u8 = 2;

pub const WORD_SIZE: usize = 8;

/// Check one word of `current` against one virgin map's corresponding word, raising `tag` as
/// novelty is discovered and clearing the observed bits in `virgin`.
///
/// Byte order within the word does not matter: every byte position is inspected independently,
/// so this is correct on both big- and little-endian hosts.
pub fn discover_word(tag: &mut u8, current: &[u8], virgin: &mut [u8]) {
    debug_assert_eq!(current.len(), virgin.len());

    for i in 0..current.len() {
        let c = current[i];
        if c == 0 {
            continue;
        }
        if virgin[i] == 0xff {
            *tag = LEVEL_NEW_EDGE;
        } else if virgin[i] & c != 0 && *tag < LEVEL_NEW_BUCKET {
            *tag = LEVEL_NEW_BUCKET;
        }
        virgin[i] &= !c;
    }
}

/// Read-only pre-check: does any word in `current` still have a bit set in at least one of
/// `virgins`? No mutation is performed. If this returns `false`, classification and the full
/// novelty pass would not change the answer.
pub fn skim(virgins: &[&[u8]], current: &[u8]) -> bool {
    for (word_start, word) in current.chunks(WORD_SIZE).enumerate() {
        let start = word_start * WORD_SIZE;
        if word.iter().all(|&b| b == 0) {
            continue;
        }
        for virgin in virgins {
            let end = (start + word.len()).min(virgin.len());
            if start >= virgin.len() {
                continue;
            }
            let vword = &virgin[start..end];
            if word
                .iter()
                .zip(vword.iter())
                .any(|(&c, &v)| c & v != 0)
            {
                return true;
            }
        }
    }
    false
}

/// Multi-map variant of [`discover_word`], folding the per-edge novelty level for one word into
/// `new_bits[k]` via `max` for each virgin map `k`. `virgin_windows[k]` must already be sliced to
/// the word at the matching offset in virgin map `k`. When `modify` is set, the observed bits are
/// cleared in place in each window.
pub fn discover_word_mul(new_bits: &mut [u8], current: &[u8], virgin_windows: &mut [&mut [u8]], modify: bool) {
    if current.iter().all(|&b| b == 0) {
        return;
    }

    for (k, window) in virgin_windows.iter_mut().enumerate() {
        let mut level = LEVEL_NONE;

        for i in 0..current.len().min(window.len()) {
            let c = current[i];
            if c == 0 {
                continue;
            }
            if window[i] == 0xff {
                level = LEVEL_NEW_EDGE;
            } else if window[i] & c != 0 && level < LEVEL_NEW_BUCKET {
                level = LEVEL_NEW_BUCKET;
            }
            if modify {
                window[i] &= !c;
            }
        }

        if level > new_bits[k] {
            new_bits[k] = level;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn word(bytes: [u8; 8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn discover_word_flags_new_edge() {
        let mut tag = 0u8;
        let mut virgin = word([0xff; 8]);
        let current = word([0, 0, 4, 0, 0, 0, 0, 0]);
        discover_word(&mut tag, &current, &mut virgin);
        assert_eq!(tag, LEVEL_NEW_EDGE);
        assert_eq!(virgin[2], 0xfb);
    }

    #[test]
    fn discover_word_flags_new_bucket_only() {
        let mut tag = 0u8;
        let mut virgin = word([0xff; 8]);
        virgin[2] = 0xfb; // bit for class 0x04 already cleared
        let current = word([0, 0, 16, 0, 0, 0, 0, 0]);
        discover_word(&mut tag, &current, &mut virgin);
        assert_eq!(tag, LEVEL_NEW_BUCKET);
    }

    #[test]
    fn discover_word_no_novelty_when_fully_seen() {
        let mut tag = 0u8;
        let mut virgin = word([0; 8]);
        let current = word([0, 0, 4, 0, 0, 0, 0, 0]);
        discover_word(&mut tag, &current, &mut virgin);
        assert_eq!(tag, LEVEL_NONE);
    }

    #[test]
    fn skim_is_read_only_and_detects_novelty() {
        let virgin = word([0xff; 8]);
        let current = word([0, 0, 4, 0, 0, 0, 0, 0]);
        assert!(skim(&[&virgin], &current));
        // read-only: calling again gives the same answer
        assert!(skim(&[&virgin], &current));
    }

    #[test]
    fn skim_false_when_all_seen() {
        let virgin = word([0; 8]);
        let current = word([0, 0, 4, 0, 0, 0, 0, 0]);
        assert!(!skim(&[&virgin], &current));
    }

    #[test]
    fn discover_word_mul_folds_max_across_clusters() {
        let mut primary = word([0xff; 8]);
        let mut diversity = word([0; 8]); // already fully seen
        let mut new_bits = vec![0u8; 2];
        let current = word([0, 0, 4, 0, 0, 0, 0, 0]);

        let mut windows: Vec<&mut [u8]> = vec![&mut primary[..], &mut diversity[..]];
        discover_word_mul(&mut new_bits, &current, &mut windows, true);

        assert_eq!(new_bits[0], LEVEL_NEW_EDGE);
        assert_eq!(new_bits[1], LEVEL_NONE);
        assert_eq!(primary[2], 0xfb);
    }

    #[test]
    fn discover_word_mul_dry_run_does_not_mutate() {
        let mut primary = word([0xff; 8]);
        let mut new_bits = vec![0u8; 1];
        let current = word([0, 0, 4, 0, 0, 0, 0, 0]);
        let original = primary.clone();

        let mut windows: Vec<&mut [u8]> = vec![&mut primary[..]];
        discover_word_mul(&mut new_bits, &current, &mut windows, false);

        assert_eq!(new_bits[0], LEVEL_NEW_EDGE);
        assert_eq!(primary, original);
    }
}
