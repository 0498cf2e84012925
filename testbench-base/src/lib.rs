// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! This module provides the base definitions shared by the testbench crates: timestamps and
//! block heights, entity and request identifiers, clocks, and the tracing and metrics
//! bootstrap.

pub mod data_types;
pub mod identifiers;
#[cfg(with_metrics)]
pub mod prometheus_util;
pub mod time;
pub mod tracing;

/// Returns early with the given error if the condition does not hold.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e.into());
        }
    };
}
