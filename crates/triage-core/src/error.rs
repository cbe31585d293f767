// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the triage core.
//!
//! Only genuinely fatal conditions are represented as [`EngineError`]. Recoverable-silent
//! failures (valuation fork/exec, README creation, `infoexec`) are logged with [`log::warn!`]
//! and handled inline; protocol drops (skim/novelty returning "nothing new") are encoded as
//! ordinary `false`/`None` control flow, not errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to create '{path}': {source}")]
    CreateArtifact { path: PathBuf, source: io::Error },

    #[error("failed to write '{path}': {source}")]
    WriteArtifact { path: PathBuf, source: io::Error },

    #[error("calibration of queue entry failed: {0}")]
    Calibration(String),

    #[error("target execution failed: {0}")]
    TargetExecute(String),

    #[error("descriptor '{describe}' ({len} bytes) exceeds the {max} byte filename budget")]
    DescriptionTooLong {
        describe: String,
        len: usize,
        max: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
