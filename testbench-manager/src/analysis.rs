// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The periodic tick of an entity: maintenance of its records followed by admission.

use testbench_base::{data_types::Checkpoint, identifiers::EntityKey, time::Clock};
use tracing::{debug, info, instrument};

use crate::{
    admission::{AdmissionController, TaskTrigger},
    manager::{Manager, ManagerError},
    records::{EntityKind, EntityRecord},
    store::{DocumentStore, NetworkState},
};

/// The outcome of a tick.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AnalysisOutcome {
    /// Whether the entity was observed for the first time.
    pub is_new: bool,
    pub triggers: Vec<TaskTrigger>,
}

impl<S, N, C> Manager<S, N, C>
where
    S: DocumentStore,
    N: NetworkState,
    C: Clock,
{
    /// Loads or creates an entity, evicts expired samples, persists it and decides which
    /// tasks need more samples.
    ///
    /// Changes persisted before a failing admission are kept.
    #[instrument(skip_all, fields(%kind, address = %key.address, service = %key.service))]
    pub async fn analyze_entity(
        &self,
        kind: EntityKind,
        key: &EntityKey,
    ) -> Result<AnalysisOutcome, ManagerError> {
        let block = self.block_data().await?;
        let now = self.clock.current_time();
        let current = Checkpoint::new(block.height, now);

        let (mut entity, is_new) = match self.store.load_entity(kind, key).await? {
            Some(entity) => {
                entity.check()?;
                (entity, false)
            }
            None => {
                info!(document_id = %key.document_id(), "first observation, creating entity");
                (EntityRecord::new(kind, key.clone(), current), true)
            }
        };

        let pruned = entity.prune_stale_tasks(self.config.max_task_age(), now);
        let appended = entity.append_missing_tasks(&self.config, now)?;
        // Eviction happens before admission reads the windows.
        entity.cycle_tasks(&self.config, now);
        let last_seen = entity.merge_last_seen();
        if kind == EntityKind::Supplier {
            entity.last_process = Some(current);
        }
        debug!(
            pruned,
            appended,
            tasks = entity.combine_tasks().len(),
            last_seen_height = %last_seen.height,
            "entity updated"
        );
        self.store.upsert_entity(&entity).await?;

        let triggers = AdmissionController::new(&self.config, &self.store)
            .evaluate(&entity, &block)
            .await?;
        Ok(AnalysisOutcome { is_new, triggers })
    }
}
