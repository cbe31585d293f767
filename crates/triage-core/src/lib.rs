// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! Coverage triage core for a directed greybox fuzzer.
//!
//! This crate owns the decision of whether one execution's input is worth keeping: bitmap
//! classification, single- and multi-map novelty detection, the save-if-interesting pipeline
//! (queue/hang/crash archiving), artifact naming, and the value-profiling side channel. It does
//! not own the forkserver, the path scheduler's clustering policy, or queue storage itself —
//! those are modeled as traits ([`forkserver::Forkserver`], [`scheduler::PathScheduler`],
//! [`queue::QueueSink`]) that a host binary implements and drives this crate with.

pub mod bitcount;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod forkserver;
pub mod hash;
pub mod hashmap;
pub mod multimap;
pub mod naming;
pub mod novelty;
pub mod pipeline;
pub mod queue;
pub mod readme;
pub mod scheduler;
pub mod valuation;

pub use config::{Configuration, Schedule, ValuationConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use forkserver::{Fault, Forkserver};
pub use multimap::MultiMapStrategy;
pub use pipeline::{save_if_interesting, ExecutionContext};
pub use queue::{QueueEntry, QueueSink};
pub use scheduler::{CustomMutator, NewPathContext, PathScheduler, VirginHandle};
