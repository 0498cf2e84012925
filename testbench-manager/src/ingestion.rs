// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Consumption of the results produced for sampling requests.

use testbench_base::{identifiers::RequestId, time::Clock};
use tracing::{debug, info, instrument, warn};

#[cfg(with_metrics)]
use crate::metrics;
use crate::{
    manager::{Manager, ManagerError},
    records::EntityKind,
    store::{AuxCollection, DocumentStore, NetworkState},
};

/// What became of a consumed request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestionOutcome {
    /// The request was marked for drop and discarded without touching any record.
    Dropped,
    /// The result was applied to the task record of the requester. `stored` counts the
    /// samples that entered the window.
    Consumed {
        samples: usize,
        stored: usize,
        successful: usize,
    },
}

impl<S, N, C> Manager<S, N, C>
where
    S: DocumentStore,
    N: NetworkState,
    C: Clock,
{
    /// Inserts the samples of a request's result into the requester's task record, then
    /// deletes the documents of the request.
    #[instrument(skip_all, fields(%kind, %request_id))]
    pub async fn process_result(
        &self,
        kind: EntityKind,
        request_id: &RequestId,
    ) -> Result<IngestionOutcome, ManagerError> {
        let request = self
            .store
            .load_request(request_id)
            .await?
            .ok_or_else(|| ManagerError::RequestNotFound(request_id.clone()))?;

        if request.drop {
            info!("request marked for drop, discarding it");
            #[cfg(with_metrics)]
            metrics::DROPPED_REQUESTS.with_label_values(&[]).inc();
            self.discard_request_data(request_id).await;
            return Ok(IngestionOutcome::Dropped);
        }

        let key = &request.requester;
        let (framework, task) = (request.framework.as_str(), request.task.as_str());
        debug!(
            address = %key.address,
            service = %key.service,
            framework,
            task,
            "processing result"
        );

        let mut entity = self
            .store
            .load_entity(kind, key)
            .await?
            .ok_or_else(|| ManagerError::EntityNotFound {
                kind,
                key: key.clone(),
            })?;
        entity.check()?;
        let now = self.clock.current_time();
        let record = entity.find_or_append_task(framework, task, &self.config, now)?;

        let result = self
            .store
            .load_result(request_id)
            .await?
            .ok_or_else(|| ManagerError::ResultNotFound(request_id.clone()))?;

        let samples = result.num_samples();
        let mut stored = 0;
        let mut successful = 0;
        if !result.is_ok() {
            // Failed evaluations are consumed without touching the window.
            debug!(status = result.status, "result status is not zero");
        } else if samples == 0 {
            warn!(
                framework,
                task, "result is ok but has no samples, consuming it with no effect"
            );
        } else {
            let checkpoint = result.checkpoint();
            let task_type = record.task_type();
            for sample in result.samples {
                let insertion = record.insert_sample(now, sample)?;
                stored += usize::from(insertion.stored);
                successful += usize::from(insertion.successful);
            }
            let data = record.data_mut();
            if successful > 0 {
                data.last_ok = data.last_ok.latest(checkpoint);
            }
            data.last_seen = data.last_seen.latest(checkpoint);
            debug!(samples, stored, successful, %task_type, "inserted samples");
            #[cfg(with_metrics)]
            metrics::INGESTED_SAMPLES
                .with_label_values(&[&task_type.to_string()])
                .inc_by(stored as u64);
        }

        record.recompute();
        entity.merge_last_seen();
        self.store.upsert_entity(&entity).await?;
        self.discard_request_data(request_id).await;
        Ok(IngestionOutcome::Consumed {
            samples,
            stored,
            successful,
        })
    }

    /// Deletes every document attached to a request, unless configured to keep them.
    /// Failures are logged and do not stop the other deletions. Returns the number of
    /// deleted documents.
    pub async fn discard_request_data(&self, request_id: &RequestId) -> u64 {
        if self.config.develop.retain_request_data {
            debug!(%request_id, "keeping request documents");
            return 0;
        }
        let mut deleted = 0;
        for collection in AuxCollection::ALL {
            match self.store.delete_request_data(collection, request_id).await {
                Ok(count) => {
                    debug!(%request_id, %collection, count, "deleted request documents");
                    deleted += count;
                }
                Err(error) => {
                    warn!(%request_id, %collection, %error, "failed to delete request documents");
                    #[cfg(with_metrics)]
                    metrics::FAILED_DELETIONS
                        .with_label_values(&[collection.name()])
                        .inc();
                }
            }
        }
        deleted
    }
}
