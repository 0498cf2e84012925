// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use testbench_base::{
    data_types::{BlockHeight, Checkpoint, Timestamp},
    identifiers::{EntityKey, RequestId, SourceId},
};

use super::SamplePayload;

/// A sampling request created by the dispatcher from a trigger.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub requester: EntityKey,
    pub framework: String,
    pub task: String,
    /// The number of samples asked for.
    pub quantity: u64,
    #[serde(default)]
    pub done: bool,
    /// Set when the request failed irrecoverably and must be discarded.
    #[serde(default)]
    pub drop: bool,
}

/// One dataset entry drawn for a request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub request_id: RequestId,
    pub source_id: SourceId,
}

/// The evaluated outcome of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub request_id: RequestId,
    /// Zero when the evaluation itself succeeded, whatever the status of each sample.
    pub status: u32,
    pub height: BlockHeight,
    pub time: Timestamp,
    #[serde(default)]
    pub samples: Vec<SamplePayload>,
}

impl ResultRecord {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.height, self.time)
    }
}
