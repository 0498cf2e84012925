// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! This module defines util functions for interacting with Prometheus (logging metrics, etc)

use prometheus::{
    exponential_buckets, histogram_opts, register_histogram_vec, register_int_counter_vec,
    HistogramVec, IntCounterVec, Opts,
};

const TESTBENCH_NAMESPACE: &str = "testbench";

/// Wrapper around Prometheus `register_int_counter_vec!` macro which also sets the `testbench`
/// namespace.
pub fn register_int_counter_vec(
    name: &str,
    description: &str,
    label_names: &[&str],
) -> IntCounterVec {
    let counter_opts = Opts::new(name, description).namespace(TESTBENCH_NAMESPACE);
    register_int_counter_vec!(counter_opts, label_names).expect("IntCounter can be created")
}

/// Wrapper around Prometheus `register_histogram_vec!` macro which also sets the `testbench`
/// namespace.
pub fn register_histogram_vec(
    name: &str,
    description: &str,
    label_names: &[&str],
    buckets: Option<Vec<f64>>,
) -> HistogramVec {
    let histogram_opts = if let Some(buckets) = buckets {
        histogram_opts!(name, description, buckets).namespace(TESTBENCH_NAMESPACE)
    } else {
        histogram_opts!(name, description).namespace(TESTBENCH_NAMESPACE)
    };

    register_histogram_vec!(histogram_opts, label_names).expect("Histogram can be created")
}

/// Buckets for small integer quantities, from 1 up to 1024.
pub fn exponential_bucket_quantities() -> Option<Vec<f64>> {
    Some(exponential_buckets(1.0, 2.0, 11).expect("Exponential buckets creation should not fail!"))
}
