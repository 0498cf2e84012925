// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The documents kept by the manager: per-task rolling windows, the entities that own them,
//! and the request and result documents exchanged with the sampling pipeline.

mod entity;
mod request;
mod status;
mod task;

use thiserror::Error;

pub use self::{
    entity::{EntityKind, EntityRecord},
    request::{InstanceRecord, RequestRecord, ResultRecord},
    status::StatusCode,
    task::{
        Insertion, NumericalSample, NumericalStats, NumericalTaskRecord, SamplePayload,
        SignatureSample, SignatureTaskRecord, Summary, TaskBuffer, TaskData, TaskRecord,
        TaskType,
    },
};

/// An error raised by a record itself, independently of any collaborator.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("cannot insert a {found} sample into the {expected} task {framework}/{task}")]
    TypeMismatch {
        framework: String,
        task: String,
        expected: TaskType,
        found: TaskType,
    },
    #[error("inconsistent circular buffer: {0}")]
    InconsistentBuffer(&'static str),
    #[error("unknown sample status code {0}")]
    UnknownStatusCode(u32),
}
