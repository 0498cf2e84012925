// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::LazyLock;

use prometheus::{HistogramVec, IntCounterVec};
use testbench_base::prometheus_util::{
    exponential_bucket_quantities, register_histogram_vec, register_int_counter_vec,
};

/// The number of triggers emitted, per framework.
pub static TRIGGERS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec("triggers", "Number of emitted triggers", &["framework"])
});

/// The number of samples asked for by the emitted triggers.
pub static TRIGGER_QUANTITY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec(
        "trigger_quantity",
        "Number of samples requested by a trigger",
        &["framework"],
        exponential_bucket_quantities(),
    )
});

/// The number of task evaluations that emitted no trigger, per reason.
pub static SKIPPED_TASKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec(
        "skipped_tasks",
        "Number of task evaluations that did not trigger sampling",
        &["reason"],
    )
});

/// The number of samples inserted into task buffers, per task variant.
pub static INGESTED_SAMPLES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec(
        "ingested_samples",
        "Number of samples inserted into task buffers",
        &["task_type"],
    )
});

pub static DROPPED_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec(
        "dropped_requests",
        "Number of requests discarded without ingestion",
        &[],
    )
});

pub static FAILED_DELETIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec(
        "failed_deletions",
        "Number of failed deletions of request documents",
        &["collection"],
    )
});
