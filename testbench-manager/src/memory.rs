// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory collaborators, used by the dry-run command and by tests.
//!
//! Entities are kept serialized, like a document store would, so that every load goes
//! through deserialization and the buffer consistency check.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use testbench_base::{
    data_types::BlockHeight,
    identifiers::{EntityKey, RequestId},
};
use tokio::sync::RwLock;

use crate::{
    records::{EntityKind, EntityRecord, InstanceRecord, RequestRecord, ResultRecord},
    store::{
        AuxCollection, DocumentStore, NetworkError, NetworkState, RequestQueueStatus, StoreError,
    },
};

#[derive(Debug, Default)]
struct MemoryDocuments {
    entities: BTreeMap<(EntityKind, EntityKey), serde_json::Value>,
    requests: BTreeMap<RequestId, RequestRecord>,
    instances: Vec<InstanceRecord>,
    prompts: Vec<RequestId>,
    responses: Vec<RequestId>,
    results: BTreeMap<RequestId, ResultRecord>,
    failing_deletions: BTreeSet<AuxCollection>,
}

/// A [`DocumentStore`] keeping every document in memory. Clones share the same documents.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<MemoryDocuments>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_request(&self, request: RequestRecord) {
        let mut documents = self.documents.write().await;
        documents.requests.insert(request.id.clone(), request);
    }

    pub async fn insert_instance(&self, instance: InstanceRecord) {
        self.documents.write().await.instances.push(instance);
    }

    pub async fn insert_prompt(&self, request_id: RequestId) {
        self.documents.write().await.prompts.push(request_id);
    }

    pub async fn insert_response(&self, request_id: RequestId) {
        self.documents.write().await.responses.push(request_id);
    }

    pub async fn insert_result(&self, result: ResultRecord) {
        let mut documents = self.documents.write().await;
        documents.results.insert(result.request_id.clone(), result);
    }

    /// Returns the number of documents of `collection` attached to a request.
    pub async fn count(&self, collection: AuxCollection, id: &RequestId) -> usize {
        let documents = self.documents.read().await;
        match collection {
            AuxCollection::Instances => documents
                .instances
                .iter()
                .filter(|instance| &instance.request_id == id)
                .count(),
            AuxCollection::Prompts => documents.prompts.iter().filter(|doc| *doc == id).count(),
            AuxCollection::Responses => {
                documents.responses.iter().filter(|doc| *doc == id).count()
            }
            AuxCollection::Results => usize::from(documents.results.contains_key(id)),
            AuxCollection::Requests => usize::from(documents.requests.contains_key(id)),
        }
    }

    /// Makes every later deletion in `collection` fail.
    pub async fn fail_deletions(&self, collection: AuxCollection) {
        self.documents
            .write()
            .await
            .failing_deletions
            .insert(collection);
    }
}

impl DocumentStore for MemoryStore {
    async fn load_entity(
        &self,
        kind: EntityKind,
        key: &EntityKey,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let documents = self.documents.read().await;
        documents
            .entities
            .get(&(kind, key.clone()))
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn upsert_entity(&self, entity: &EntityRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(entity)?;
        let mut documents = self.documents.write().await;
        documents
            .entities
            .insert((entity.kind, entity.key.clone()), value);
        Ok(())
    }

    async fn lookup_requests(
        &self,
        key: &EntityKey,
        framework: &str,
        task: &str,
    ) -> Result<RequestQueueStatus, StoreError> {
        let documents = self.documents.read().await;
        let mut status = RequestQueueStatus::default();
        let mut blacklist = BTreeSet::new();
        let matching = documents.requests.values().filter(|request| {
            &request.requester == key && request.framework == framework && request.task == task
        });
        for request in matching {
            status.request_ids.push(request.id.clone());
            if request.done {
                status.done += 1;
                continue;
            }
            status.in_queue += request.quantity;
            blacklist.extend(
                documents
                    .instances
                    .iter()
                    .filter(|instance| instance.request_id == request.id)
                    .map(|instance| instance.source_id),
            );
        }
        status.blacklist = blacklist.into_iter().collect();
        Ok(status)
    }

    async fn load_request(&self, id: &RequestId) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self.documents.read().await.requests.get(id).cloned())
    }

    async fn load_result(&self, id: &RequestId) -> Result<Option<ResultRecord>, StoreError> {
        Ok(self.documents.read().await.results.get(id).cloned())
    }

    async fn delete_request_data(
        &self,
        collection: AuxCollection,
        id: &RequestId,
    ) -> Result<u64, StoreError> {
        let mut documents = self.documents.write().await;
        if documents.failing_deletions.contains(&collection) {
            return Err(StoreError::Backend(format!(
                "deletions in {collection} are unavailable"
            )));
        }
        let deleted = match collection {
            AuxCollection::Instances => {
                let initial = documents.instances.len();
                documents.instances.retain(|instance| &instance.request_id != id);
                initial - documents.instances.len()
            }
            AuxCollection::Prompts => {
                let initial = documents.prompts.len();
                documents.prompts.retain(|doc| doc != id);
                initial - documents.prompts.len()
            }
            AuxCollection::Responses => {
                let initial = documents.responses.len();
                documents.responses.retain(|doc| doc != id);
                initial - documents.responses.len()
            }
            AuxCollection::Results => usize::from(documents.results.remove(id).is_some()),
            AuxCollection::Requests => usize::from(documents.requests.remove(id).is_some()),
        };
        Ok(deleted as u64)
    }
}

/// A [`NetworkState`] with a settable height and fixed parameters.
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    height: Arc<RwLock<Option<BlockHeight>>>,
    params: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryNetwork {
    pub fn new(height: BlockHeight, params: BTreeMap<String, String>) -> Self {
        Self {
            height: Arc::new(RwLock::new(Some(height))),
            params: Arc::new(RwLock::new(params)),
        }
    }

    /// A network with the given height and session length.
    pub fn with_session_length(height: BlockHeight, key: &str, blocks_per_session: u64) -> Self {
        Self::new(
            height,
            BTreeMap::from([(key.to_owned(), blocks_per_session.to_string())]),
        )
    }

    pub async fn set_height(&self, height: BlockHeight) {
        *self.height.write().await = Some(height);
    }

    pub async fn set_param(&self, key: &str, value: &str) {
        self.params
            .write()
            .await
            .insert(key.to_owned(), value.to_owned());
    }
}

impl NetworkState for MemoryNetwork {
    async fn latest_height(&self) -> Result<BlockHeight, NetworkError> {
        let height = *self.height.read().await;
        height.ok_or_else(|| NetworkError::Unavailable("no block observed yet".to_owned()))
    }

    async fn params(&self) -> Result<BTreeMap<String, String>, NetworkError> {
        Ok(self.params.read().await.clone())
    }
}
