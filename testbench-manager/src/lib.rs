// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! This module defines the rolling-window sampling and admission control of the testbench:
//! per-task circular buffers of benchmark samples, the entity records owning them, and the
//! decision of how many new samples to request for every evaluated task.

pub mod admission;
pub mod analysis;
pub mod buffer;
pub mod config;
pub mod ingestion;
pub mod manager;
pub mod memory;
#[cfg(with_metrics)]
mod metrics;
pub mod records;
pub mod store;
#[cfg(with_testing)]
#[path = "unit_tests/test_utils.rs"]
pub mod test_utils;

pub use crate::{
    admission::{BlockData, TaskTrigger},
    analysis::AnalysisOutcome,
    ingestion::IngestionOutcome,
    manager::{Manager, ManagerError},
};
