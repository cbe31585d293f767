// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Artifact naming: builds the comma-separated descriptor string embedded in queue, hang, and
//! crash filenames.

use crate::error::EngineError;

const TIMEOUT_BIT: u8 = 0x80;
const PRIMARY_MASK: u8 = 0x03;
const DIVERSITY_SHIFT: u8 = 2;
const DIVERSITY_MASK: u8 = 0x03;

/// The stage/value context for one execution, supplied by the mutator pipeline. Absent fields
/// mean the corresponding `,pos:`/`,val:`/`,rep:` fragment is omitted.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    pub stage_name: String,
    pub stage_cur_byte: i64,
    pub stage_val_delta: Option<i64>,
    pub stage_val_is_be: bool,
    pub stage_rep_val: Option<i64>,
}

/// Where this input's lineage comes from: a local mutation of the current queue entry (with an
/// optional splice partner), or a sync from a peer fuzzer instance.
#[derive(Debug, Clone)]
pub enum Lineage {
    Local {
        current_entry: u64,
        splice_with: Option<u64>,
        elapsed_ms: u64,
        total_execs: u64,
    },
    Sync {
        peer: String,
        case: u64,
    },
}

/// Builds the descriptor embedded in a persisted artifact's filename.
///
/// Returns [`EngineError::DescriptionTooLong`] if the result would exceed `max_len`, budgeted so
/// that the fixed `,+cov2`/`,+div2`/`,+path`/`,+tout` suffixes are guaranteed to still fit once
/// the caller appends them (they are appended by this function itself, so no extra budgeting is
/// required by callers).
pub fn describe_op(
    tag: u8,
    new_paths: bool,
    lineage: &Lineage,
    stage: Option<&StageContext>,
    mutator_describe: Option<&str>,
    max_len: usize,
) -> Result<String, EngineError> {
    let is_timeout = tag & TIMEOUT_BIT != 0;
    let primary = tag & PRIMARY_MASK;
    let diversity = (tag >> DIVERSITY_SHIFT) & DIVERSITY_MASK;

    let mut out = match lineage {
        Lineage::Sync { peer, case } => format!("sync:{peer},src:{case:06}"),
        Lineage::Local {
            current_entry,
            splice_with,
            elapsed_ms,
            total_execs,
        } => {
            let mut s = format!("src:{current_entry:06}");
            if let Some(splice) = splice_with {
                s.push_str(&format!("+{splice:06}"));
            }
            s.push_str(&format!(",time:{elapsed_ms},execs:{total_execs}"));
            s
        }
    };

    if let Some(describe) = mutator_describe {
        out.push(',');
        out.push_str(describe);
    } else if let Some(stage) = stage {
        out.push_str(&format!(",op:{}", stage.stage_name));
        if stage.stage_cur_byte >= 0 {
            out.push_str(&format!(",pos:{}", stage.stage_cur_byte));
            if let Some(delta) = stage.stage_val_delta {
                let sign = if delta >= 0 { "+" } else { "-" };
                if stage.stage_val_is_be {
                    out.push_str(&format!(",val:be:{sign}{}", delta.abs()));
                } else {
                    out.push_str(&format!(",val:{sign}{}", delta.abs()));
                }
            }
        } else if let Some(rep) = stage.stage_rep_val {
            out.push_str(&format!(",rep:{rep}"));
        }
    }

    if is_timeout {
        out.push_str(",+tout");
    }
    match primary {
        1 => out.push_str(",+cov"),
        2 => out.push_str(",+cov2"),
        _ => {}
    }
    match diversity {
        1 => out.push_str(",+div"),
        2 => out.push_str(",+div2"),
        _ => {}
    }
    if new_paths {
        out.push_str(",+path");
    }

    if out.len() > max_len {
        return Err(EngineError::DescriptionTooLong {
            describe: out.clone(),
            len: out.len(),
            max: max_len,
        });
    }

    Ok(out)
}
