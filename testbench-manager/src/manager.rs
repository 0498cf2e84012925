// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use testbench_base::{
    data_types::BlockHeight,
    identifiers::{EntityKey, RequestId},
    time::{Clock, WallClock},
};
use thiserror::Error;

use crate::{
    admission::BlockData,
    config::{ConfigError, ManagerConfig},
    records::{EntityKind, RecordError},
    store::{NetworkError, NetworkState, StoreError},
};

#[cfg(test)]
#[path = "unit_tests/manager_tests.rs"]
mod manager_tests;

/// The error of a tick or of a result ingestion.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("request {0} not found")]
    RequestNotFound(RequestId),
    #[error("result of request {0} not found")]
    ResultNotFound(RequestId),
    #[error("{kind} {key} not found")]
    EntityNotFound { kind: EntityKind, key: EntityKey },
    #[error("task {framework}/{task} of {key} is missing after creation")]
    TaskMissing {
        key: EntityKey,
        framework: String,
        task: String,
    },
}

/// Runs the ticks and result ingestions against a document store and a network.
pub struct Manager<S, N, C = WallClock> {
    pub(crate) store: S,
    pub(crate) network: N,
    pub(crate) config: Arc<ManagerConfig>,
    pub(crate) clock: C,
}

impl<S, N, C> Manager<S, N, C>
where
    N: NetworkState,
    C: Clock,
{
    pub fn new(store: S, network: N, config: Arc<ManagerConfig>, clock: C) -> Self {
        Self {
            store,
            network,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reads the current height and session length of the network.
    pub async fn block_data(&self) -> Result<BlockData, ManagerError> {
        let height: BlockHeight = self.network.latest_height().await?;
        let params = self.network.params().await?;
        let key = &self.config.session_length_param;
        let value = params
            .get(key)
            .ok_or_else(|| NetworkError::MissingParam(key.clone()))?;
        let blocks_per_session =
            value
                .trim()
                .parse()
                .map_err(|_| NetworkError::MalformedParam {
                    key: key.clone(),
                    value: value.clone(),
                })?;
        Ok(BlockData {
            height,
            blocks_per_session,
        })
    }
}
