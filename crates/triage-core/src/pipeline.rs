// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! The save-if-interesting pipeline: the top-level decision of whether one execution's input is
//! worth enqueuing, archiving as a hang, or archiving as a crash.

use std::fs;

use command_ext::CommandExtCheck;

use crate::classify;
use crate::config::{KEEP_UNIQUE_CRASH, KEEP_UNIQUE_HANG, N_FUZZ_SIZE};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::forkserver::{Fault, Forkserver};
use crate::hash;
use crate::multimap::{self, MultiMapStrategy, NoveltyOutcome};
use crate::naming::{describe_op, Lineage, StageContext};
use crate::novelty;
use crate::queue::{QueueEntry, QueueSink};
use crate::readme;
use crate::scheduler::{CustomMutator, PathScheduler};
use crate::valuation;

const TIMEOUT_TAG_BIT: u8 = 0x80;

/// Everything the pipeline needs about the current execution that isn't owned by `Engine`,
/// `PathScheduler`, or `Forkserver`.
pub struct ExecutionContext<'a> {
    pub inc: bool,
    pub lineage: Lineage,
    pub stage: Option<StageContext>,
    pub mutator: Option<&'a dyn CustomMutator>,
    pub elapsed_ms: u64,
    pub cmdline: String,
    pub mem_limit_bytes: u64,
}

fn artifact_filename(id: u64, desc: &str, sig: Option<i32>, simple_files: bool) -> String {
    if simple_files {
        match sig {
            Some(sig) => format!("id_{id:06}_{sig:02}"),
            None => format!("id_{id:06}"),
        }
    } else {
        match sig {
            Some(sig) => format!("id:{id:06},sig:{sig:02},{desc}"),
            None => format!("id:{id:06},{desc}"),
        }
    }
}

/// Runs the save-if-interesting decision for one execution. Returns `true` iff the input was
/// kept (enqueued, or escalated from a hang re-run into a crash).
pub fn save_if_interesting<S, F, Q>(
    engine: &mut Engine,
    scheduler: &mut S,
    forkserver: &mut F,
    queue: &mut Q,
    mem: &[u8],
    fault: Fault,
    ctx: &ExecutionContext<'_>,
) -> Result<bool, EngineError>
where
    S: PathScheduler,
    F: Forkserver,
    Q: QueueSink,
{
    if mem.is_empty() {
        scheduler.recover_virgin();
        return Ok(false);
    }

    match fault {
        Fault::Error => Err(EngineError::TargetExecute(
            "target execution reported a harness-level error".into(),
        )),
        Fault::Tmout => handle_tmout(engine, scheduler, forkserver, queue, mem, ctx),
        Fault::Ok | Fault::Crash => {
            let (kept, is_unique) =
                handle_ok_or_crash(engine, scheduler, forkserver, queue, mem, fault, ctx, false, 0)?;
            if fault == Fault::Crash {
                handle_crash_archive(engine, forkserver, mem, ctx, is_unique)?;
            }
            Ok(kept)
        }
    }
}

fn maybe_bump_n_fuzz(engine: &mut Engine, forkserver: &dyn Forkserver) -> Option<u64> {
    let cfg = engine.config();
    if *cfg.directed_mode() || !cfg.schedule().is_frequency_weighted() {
        return None;
    }
    let trace_hash = hash::hash64(forkserver.trace_bits());
    let index = trace_hash % N_FUZZ_SIZE as u64;
    engine.bump_n_fuzz(index);
    Some(index)
}

/// Runs the OK/CRASH branch of the save pipeline: `n_fuzz` bump, valuation, multi-map novelty,
/// and (if interesting) queue persistence.
///
/// `primary_only` restricts novelty detection to the engine's own primary virgin map, bypassing
/// the scheduler entirely - used by the hang-escalation path (`AFL_KEEP_TIMEOUTS`) per the save
/// pipeline's timeout-still-times-out branch. `extra_tag_bits` is OR'd into the resulting tag
/// before naming and queue-field derivation (the hang-escalation path sets the `0x80` timeout
/// bit here so the queued entry's descriptor still reads `,+tout`).
#[allow(clippy::too_many_arguments)]
fn handle_ok_or_crash<S, F, Q>(
    engine: &mut Engine,
    scheduler: &mut S,
    forkserver: &mut F,
    queue: &mut Q,
    mem: &[u8],
    fault: Fault,
    ctx: &ExecutionContext<'_>,
    primary_only: bool,
    extra_tag_bits: u8,
) -> Result<(bool, bool), EngineError>
where
    S: PathScheduler,
    F: Forkserver,
    Q: QueueSink,
{
    let n_fuzz_index = maybe_bump_n_fuzz(engine, forkserver);

    let is_unique = run_valuation_step(engine, forkserver, mem, fault == Fault::Crash, ctx);

    let trace_ctx_vec = forkserver.trace_ctx().to_vec();

    let mut outcome: NoveltyOutcome = if primary_only {
        let mut tag = 0u8;
        {
            let trace = forkserver.trace_bits().to_vec();
            novelty_against_single_map(&trace, engine.virgin_bits_mut(), &mut tag);
        }
        NoveltyOutcome {
            tag,
            new_paths: false,
        }
    } else {
        let targets = forkserver.trace_targets().to_vec();
        let freachables = forkserver.trace_freachables().to_vec();
        let reachables = forkserver.trace_reachables().to_vec();
        let queued_items = queue_len_hint(engine);

        let primary = engine.virgin_bits_mut();
        let trace = forkserver.trace_bits_mut();
        multimap::detect(
            scheduler,
            primary,
            trace,
            &targets,
            &freachables,
            &reachables,
            &trace_ctx_vec,
            queued_items,
            ctx.inc,
            MultiMapStrategy::TwoPass,
        )
    };
    outcome.tag |= extra_tag_bits;

    if !outcome.is_interesting() {
        if fault == Fault::Crash {
            engine.bump_total_crashes();
        }
        return Ok((false, is_unique));
    }

    if outcome.tag & 0x03 != 0 {
        // Any nonzero primary level, not just a brand new edge, means `discover_word` actually
        // cleared a bit in the primary virgin map (a new bucket on a known edge still clears the
        // bit for that bucket) - see the data model's `bitmap_changed` invariant.
        engine.mark_bitmap_changed();
    }

    let id = scheduler.queue_cycle() as u64;
    let desc = describe_op(
        outcome.tag,
        outcome.new_paths,
        &ctx.lineage,
        ctx.stage.as_ref(),
        ctx.mutator.and_then(|m| m.describe()).as_deref(),
        200,
    )?;

    let filename = artifact_filename(id, &desc, None, *engine.config().simple_files());
    let path = engine.out_dir().join("queue").join(&filename);
    fs::write(&path, mem).map_err(|source| EngineError::CreateArtifact {
        path: path.clone(),
        source,
    })?;

    let path_cksum = hash::hash64(&trace_ctx_vec);
    let exec_cksum = hash::hash64(forkserver.trace_bits());
    let is_extra = outcome.tag & 0x03 == 0 && (outcome.tag & 0x0c != 0 || outcome.new_paths);
    let has_new_cov = outcome.tag & 0x03 == 2;

    let entry = QueueEntry::builder()
        .fname(path.display().to_string())
        .len(mem.len())
        .path_cksum(path_cksum)
        .exec_cksum(exec_cksum)
        .has_new_cov(has_new_cov)
        .aflrun_extra(is_extra)
        .n_fuzz_entry(n_fuzz_index.map(|i| i as usize))
        .build();

    if has_new_cov {
        engine.bump_queued_with_cov();
    }
    if let Some(index) = n_fuzz_index {
        engine.reset_n_fuzz(index, 1);
    }
    engine.bump_total_queued();

    let queue_id = queue.add_to_queue(entry);
    queue
        .calibrate_case(queue_id, mem)
        .map_err(|err| EngineError::Calibration(err.to_string()))?;
    queue.queue_testcase_store_mem(queue_id, mem);

    if fault == Fault::Crash {
        engine.bump_total_crashes();
    }

    Ok((true, is_unique))
}

fn queue_len_hint(engine: &Engine) -> usize {
    engine.total_queued() as usize
}

fn run_valuation_step<F: Forkserver>(
    engine: &mut Engine,
    forkserver: &mut F,
    mem: &[u8],
    crash: bool,
    ctx: &ExecutionContext<'_>,
) -> bool {
    let Some(valuation_cfg) = engine.config().valuation().clone() else {
        return false;
    };
    let state = engine.valuation_mut();
    let Some(side_file) = valuation::run_valuation(state, &valuation_cfg, forkserver, mem, crash) else {
        return false;
    };

    let subdir = if crash { "neg" } else { "pos" };
    let input_dir = engine.out_dir().join("memory").join("input");
    let _ = fs::create_dir_all(&input_dir);
    let seq = side_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let dest = input_dir.join(format!("{subdir}_{seq}_{}", sanitize(&ctx.cmdline)));
    let _ = fs::write(&dest, mem);

    let out_dir = engine.out_dir().to_path_buf();
    let (saved_crashes, saved_positives) = engine.valuation_counters_mut();
    let id = if crash { *saved_crashes } else { *saved_positives };
    valuation::save_valuation(&out_dir, &side_file, crash, id, saved_crashes, saved_positives);

    true
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn handle_tmout<S, F, Q>(
    engine: &mut Engine,
    scheduler: &mut S,
    forkserver: &mut F,
    queue: &mut Q,
    mem: &[u8],
    ctx: &ExecutionContext<'_>,
) -> Result<bool, EngineError>
where
    S: PathScheduler,
    F: Forkserver,
    Q: QueueSink,
{
    engine.bump_total_tmouts();
    if engine.saved_hangs() >= KEEP_UNIQUE_HANG {
        return Ok(false);
    }

    {
        let trace = forkserver.trace_bits_mut();
        classify::classify(trace);
        classify::simplify(trace);
    }

    let mut tag = 0u8;
    {
        let trace = forkserver.trace_bits().to_vec();
        novelty_against_single_map(&trace, engine.virgin_tmout_mut(), &mut tag);
    }
    if tag == novelty::LEVEL_NONE {
        return Ok(false);
    }

    let hang_timeout = *engine.config().hang_timeout_ms();
    match forkserver.fuzz_run_target(hang_timeout) {
        Fault::Crash => {
            engine.bump_total_crashes();
            handle_crash_archive(engine, forkserver, mem, ctx, false)?;
            Ok(true)
        }
        Fault::Tmout if *engine.config().keep_timeouts() => {
            let (kept, _is_unique) = handle_ok_or_crash(
                engine,
                scheduler,
                forkserver,
                queue,
                mem,
                Fault::Ok,
                ctx,
                true,
                TIMEOUT_TAG_BIT,
            )?;
            Ok(kept)
        }
        _ => {
            let id = scheduler.queue_cycle() as u64;
            let desc = describe_op(
                tag | TIMEOUT_TAG_BIT,
                false,
                &ctx.lineage,
                ctx.stage.as_ref(),
                None,
                200,
            )?;
            let filename = artifact_filename(id, &desc, None, *engine.config().simple_files());
            let path = engine.out_dir().join("hangs").join(filename);
            fs::write(&path, mem).map_err(|source| EngineError::CreateArtifact { path, source })?;
            engine.bump_saved_hangs();
            engine.record_hang(ctx.elapsed_ms);
            Ok(false)
        }
    }
}

fn handle_crash_archive<F: Forkserver>(
    engine: &mut Engine,
    forkserver: &mut F,
    mem: &[u8],
    ctx: &ExecutionContext<'_>,
    skip_if_unique: bool,
) -> Result<(), EngineError> {
    if skip_if_unique {
        // The valuation subsystem already captured a copy of this crashing input under
        // `memory/input/`; archiving it again under `crashes/` would be redundant.
        return Ok(());
    }
    if engine.saved_crashes() >= KEEP_UNIQUE_CRASH {
        return Ok(());
    }

    {
        let trace = forkserver.trace_bits_mut();
        classify::classify(trace);
        classify::simplify(trace);
    }

    let mut tag = 0u8;
    {
        let trace = forkserver.trace_bits().to_vec();
        novelty_against_single_map(&trace, engine.virgin_crash_mut(), &mut tag);
    }
    if tag == novelty::LEVEL_NONE {
        return Ok(());
    }

    if engine.saved_crashes() == 0 && !*engine.config().no_crash_readme() {
        let crashes_dir = engine.out_dir().join("crashes");
        let _ = fs::create_dir_all(&crashes_dir);
        readme::write_crash_readme(&crashes_dir, &ctx.cmdline, ctx.mem_limit_bytes);
    }

    let sig = forkserver.last_kill_signal();
    let desc = describe_op(tag, false, &ctx.lineage, ctx.stage.as_ref(), None, 200)?;
    let filename = artifact_filename(
        engine.saved_crashes(),
        &desc,
        Some(sig),
        *engine.config().simple_files(),
    );
    let path = engine.out_dir().join("crashes").join(filename);
    fs::write(&path, mem).map_err(|source| EngineError::CreateArtifact { path, source })?;

    engine.bump_saved_crashes();
    engine.record_crash(ctx.elapsed_ms);

    if let Some(hook) = engine.config().infoexec() {
        if let Err(err) = std::process::Command::new(hook).arg(&path).check() {
            log::warn!("infoexec hook failed: {err}");
        }
    }

    Ok(())
}

/// Runs single-map `skim` + `discover_word` word-by-word against `virgin`, mutating it and
/// folding the resulting level (max across words) into `tag`.
fn novelty_against_single_map(trace: &[u8], virgin: &mut [u8], tag: &mut u8) {
    let virgin_ref: &[u8] = virgin;
    if !novelty::skim(&[virgin_ref], trace) {
        return;
    }
    let mut word_start = 0;
    while word_start < trace.len() {
        let word_end = (word_start + novelty::WORD_SIZE).min(trace.len());
        let current = &trace[word_start..word_end];
        let virgin_window = &mut virgin[word_start..word_end];
        novelty::discover_word(tag, current, virgin_window);
        word_start += novelty::WORD_SIZE;
    }
}
