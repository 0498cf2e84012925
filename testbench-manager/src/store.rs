// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The collaborators of the manager: the document store holding entities, requests and
//! results, and the network the entities are staked on.

use std::{collections::BTreeMap, fmt};

use testbench_base::{
    data_types::BlockHeight,
    identifiers::{EntityKey, RequestId, SourceId},
};
use thiserror::Error;

use crate::records::{EntityKind, EntityRecord, RequestRecord, ResultRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store failure: {0}")]
    Backend(String),
    #[error("malformed document: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network state unavailable: {0}")]
    Unavailable(String),
    #[error("network parameter {0:?} is missing")]
    MissingParam(String),
    #[error("network parameter {key:?} is not an integer: {value:?}")]
    MalformedParam { key: String, value: String },
}

/// The collections holding the documents attached to a request.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AuxCollection {
    Instances,
    Prompts,
    Responses,
    Results,
    Requests,
}

impl AuxCollection {
    /// Deletion order: dependent documents first, the request itself last.
    pub const ALL: [AuxCollection; 5] = [
        AuxCollection::Instances,
        AuxCollection::Prompts,
        AuxCollection::Responses,
        AuxCollection::Results,
        AuxCollection::Requests,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AuxCollection::Instances => "instances",
            AuxCollection::Prompts => "prompts",
            AuxCollection::Responses => "responses",
            AuxCollection::Results => "results",
            AuxCollection::Requests => "tasks",
        }
    }
}

impl fmt::Display for AuxCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The requests made for one task of one entity.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestQueueStatus {
    /// The number of samples requested and not processed yet.
    pub in_queue: u64,
    /// The number of processed requests still stored.
    pub done: u64,
    /// The sources already drawn by pending requests, sorted and without duplicates.
    pub blacklist: Vec<SourceId>,
    pub request_ids: Vec<RequestId>,
}

/// Persistence of the manager documents.
#[trait_variant::make(Send)]
pub trait DocumentStore {
    /// Loads an entity, or `None` if it was never observed.
    async fn load_entity(
        &self,
        kind: EntityKind,
        key: &EntityKey,
    ) -> Result<Option<EntityRecord>, StoreError>;

    /// Replaces the stored entity document.
    async fn upsert_entity(&self, entity: &EntityRecord) -> Result<(), StoreError>;

    /// Summarizes the requests made for a task of an entity.
    async fn lookup_requests(
        &self,
        key: &EntityKey,
        framework: &str,
        task: &str,
    ) -> Result<RequestQueueStatus, StoreError>;

    async fn load_request(&self, id: &RequestId) -> Result<Option<RequestRecord>, StoreError>;

    async fn load_result(&self, id: &RequestId) -> Result<Option<ResultRecord>, StoreError>;

    /// Deletes the documents of `collection` attached to a request. Returns the number of
    /// deleted documents.
    async fn delete_request_data(
        &self,
        collection: AuxCollection,
        id: &RequestId,
    ) -> Result<u64, StoreError>;
}

/// Read access to the benchmarked network.
#[trait_variant::make(Send)]
pub trait NetworkState {
    async fn latest_height(&self) -> Result<BlockHeight, NetworkError>;

    async fn params(&self) -> Result<BTreeMap<String, String>, NetworkError>;
}
