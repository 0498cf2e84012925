// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fixtures shared by the tests of the manager and of the binaries.

use std::sync::Arc;

use testbench_base::{
    data_types::{BlockHeight, TimeDelta, Timestamp},
    identifiers::{EntityKey, RequestId, SourceId},
    time::{Clock, TestClock},
};

use crate::{
    config::ManagerConfig,
    manager::Manager,
    memory::{MemoryNetwork, MemoryStore},
    records::{
        InstanceRecord, NumericalSample, RequestRecord, ResultRecord, SamplePayload,
        SignatureSample, StatusCode,
    },
};

pub const SESSION_PARAM: &str = "num_blocks_per_session";
pub const BLOCKS_PER_SESSION: u64 = 4;
pub const START_HEIGHT: BlockHeight = BlockHeight(1_000);

/// The initial time of the test clock.
pub fn start_time() -> Timestamp {
    Timestamp::EPOCH.saturating_add(TimeDelta::from_days(100))
}

/// Two frameworks: a signature task sampled once per session, and two numerical tasks
/// that need the signature to be ok first.
pub fn test_config() -> ManagerConfig {
    serde_json::from_value(serde_json::json!({
        "frameworks": {
            "signatures": {
                "task_types": { "any": "signature" },
                "task_dependency": { "any": ["none:none:none"] },
                "schedule_limits": { "tokenizer": "1:session", "any": "none:none" },
                "trigger_minimum": { "tokenizer": "1", "any": "0" }
            },
            "lmeh": {
                "task_types": { "any": "numerical" },
                "task_dependency": { "any": ["signatures:tokenizer:ok"] },
                "schedule_limits": { "any": "none:none" },
                "trigger_minimum": { "any": "0" }
            }
        },
        "tests": [
            { "framework": "signatures", "tasks": ["tokenizer"] },
            { "framework": "lmeh", "tasks": ["mmlu", "arc"] }
        ]
    }))
    .expect("test configuration should be valid")
}

pub fn test_key() -> EntityKey {
    EntityKey::new("pokt1supplier", "0001")
}

pub fn score(value: f64, source_id: SourceId) -> SamplePayload {
    score_with_status(value, source_id, StatusCode::Ok)
}

pub fn score_with_status(value: f64, source_id: SourceId, status: StatusCode) -> SamplePayload {
    SamplePayload::Numerical(NumericalSample {
        score: value,
        source_id,
        run_time: 0.5,
        status,
    })
}

pub fn signature(value: &str, status: StatusCode) -> SamplePayload {
    SamplePayload::Signature(SignatureSample {
        signature: value.to_owned(),
        source_id: 0,
        status,
    })
}

/// A manager over in-memory collaborators, with handles on each of them.
pub struct TestEnvironment {
    pub store: MemoryStore,
    pub network: MemoryNetwork,
    pub clock: TestClock,
    pub manager: Manager<MemoryStore, MemoryNetwork, TestClock>,
}

impl TestEnvironment {
    pub fn new(config: ManagerConfig) -> Self {
        let store = MemoryStore::new();
        let network =
            MemoryNetwork::with_session_length(START_HEIGHT, SESSION_PARAM, BLOCKS_PER_SESSION);
        let clock = TestClock::new();
        clock.set(start_time());
        let manager = Manager::new(
            store.clone(),
            network.clone(),
            Arc::new(config),
            clock.clone(),
        );
        Self {
            store,
            network,
            clock,
            manager,
        }
    }

    /// Stores a pending request with one instance per source.
    pub async fn add_request(
        &self,
        id: &str,
        key: &EntityKey,
        (framework, task): (&str, &str),
        quantity: u64,
        sources: &[SourceId],
    ) -> RequestId {
        let request_id = RequestId::new(id);
        self.store
            .insert_request(RequestRecord {
                id: request_id.clone(),
                requester: key.clone(),
                framework: framework.to_owned(),
                task: task.to_owned(),
                quantity,
                done: false,
                drop: false,
            })
            .await;
        for source_id in sources {
            self.store
                .insert_instance(InstanceRecord {
                    request_id: request_id.clone(),
                    source_id: *source_id,
                })
                .await;
        }
        request_id
    }

    /// Stores the result of a request, computed at `height`.
    pub async fn add_result(
        &self,
        request_id: &RequestId,
        status: u32,
        height: BlockHeight,
        samples: Vec<SamplePayload>,
    ) {
        self.store
            .insert_result(ResultRecord {
                request_id: request_id.clone(),
                status,
                height,
                time: self.clock.current_time(),
                samples,
            })
            .await;
    }
}
