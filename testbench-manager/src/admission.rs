// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decides, for every configured task of an entity, how many new samples to request.

use serde::{Deserialize, Serialize};
use testbench_base::{data_types::BlockHeight, identifiers::SourceId};
use tracing::debug;

#[cfg(with_metrics)]
use crate::metrics;
use crate::{
    config::{Dependency, ManagerConfig, Schedule, TaskLimits},
    manager::ManagerError,
    records::{EntityRecord, TaskRecord},
    store::DocumentStore,
};

#[cfg(test)]
#[path = "unit_tests/admission_tests.rs"]
mod admission_tests;

/// The state of the network at the time of a tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockData {
    pub height: BlockHeight,
    pub blocks_per_session: u64,
}

/// A request for more samples of one task of one entity, handed to the dispatcher.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskTrigger {
    pub address: String,
    pub service: String,
    pub framework: String,
    pub task: String,
    /// Sources that the new samples must not be drawn from.
    pub blacklist: Vec<SourceId>,
    pub quantity: u64,
}

impl TaskTrigger {
    /// The identifier of the dispatch workflow, stable across ticks so that a pending
    /// dispatch is never started twice.
    pub fn workflow_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.framework, self.task, self.address, self.service
        )
    }
}

/// Why a task was not triggered.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SkipReason {
    /// A task this one depends on is missing or not ok yet.
    Dependency,
    /// The task was sampled too recently.
    Schedule,
    /// The window holds enough successful samples.
    UpToDate,
    /// The pending requests already cover what is needed.
    Queued,
    /// Too many samples are already pending.
    Backpressure,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Dependency => "dependency",
            SkipReason::Schedule => "schedule",
            SkipReason::UpToDate => "up_to_date",
            SkipReason::Queued => "queued",
            SkipReason::Backpressure => "backpressure",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Trigger(TaskTrigger),
    Skip(SkipReason),
}

/// Whether every dependency holds for the tasks of `entity`.
pub fn dependencies_met(entity: &EntityRecord, dependencies: &[Dependency]) -> bool {
    dependencies.iter().all(|dependency| match dependency {
        Dependency::None => true,
        Dependency::Present { framework, task } => entity.find_task(framework, task).is_some(),
        Dependency::Ok { framework, task } => entity
            .find_task(framework, task)
            .is_some_and(TaskRecord::is_ok),
    })
}

/// Whether enough blocks passed since `last_seen` for the task to be sampled again.
pub fn schedule_allows(schedule: Schedule, block: &BlockData, last_seen: BlockHeight) -> bool {
    block.height.blocks_since(last_seen) >= schedule.min_blocks(block.blocks_per_session)
}

/// The number of samples a task lacks, capped at the concurrency limit. Returns `None` if
/// the window is complete and no minimum refresh is configured.
pub fn samples_needed(ok_samples: u64, limits: &TaskLimits, trigger_minimum: u64) -> Option<u64> {
    let needed = if ok_samples < limits.min_samples_per_task {
        limits.min_samples_per_task - ok_samples
    } else if trigger_minimum > 0 {
        trigger_minimum
    } else {
        return None;
    };
    Some(needed.min(limits.max_concurrent_samples_per_task))
}

/// Deducts the pending samples from `needed`, then applies the trigger floor.
pub fn quantity_to_request(
    needed: u64,
    max_concurrent: u64,
    in_queue: u64,
    trigger_minimum: u64,
) -> Result<u64, SkipReason> {
    if in_queue >= max_concurrent {
        return Err(SkipReason::Backpressure);
    }
    match needed.saturating_sub(in_queue).max(trigger_minimum) {
        0 => Err(SkipReason::Queued),
        quantity => Ok(quantity),
    }
}

/// Evaluates the configured tasks of an entity against its records and pending requests.
pub struct AdmissionController<'a, S> {
    config: &'a ManagerConfig,
    store: &'a S,
}

impl<'a, S: DocumentStore> AdmissionController<'a, S> {
    pub fn new(config: &'a ManagerConfig, store: &'a S) -> Self {
        Self { config, store }
    }

    /// Returns the triggers for every configured task of `entity`, in configuration order.
    /// The first configuration or store error aborts the evaluation.
    pub async fn evaluate(
        &self,
        entity: &EntityRecord,
        block: &BlockData,
    ) -> Result<Vec<TaskTrigger>, ManagerError> {
        let mut triggers = Vec::new();
        for (framework, task) in self.config.configured_tasks() {
            match self.decide(entity, framework, task, block).await? {
                Decision::Trigger(trigger) => {
                    debug!(
                        framework,
                        task,
                        quantity = trigger.quantity,
                        blacklisted = trigger.blacklist.len(),
                        "triggering sampling"
                    );
                    #[cfg(with_metrics)]
                    {
                        metrics::TRIGGERS.with_label_values(&[framework]).inc();
                        metrics::TRIGGER_QUANTITY
                            .with_label_values(&[framework])
                            .observe(trigger.quantity as f64);
                    }
                    triggers.push(trigger);
                }
                Decision::Skip(reason) => {
                    debug!(framework, task, reason = reason.as_str(), "not triggering");
                    #[cfg(with_metrics)]
                    metrics::SKIPPED_TASKS
                        .with_label_values(&[reason.as_str()])
                        .inc();
                }
            }
        }
        Ok(triggers)
    }

    pub async fn decide(
        &self,
        entity: &EntityRecord,
        framework: &str,
        task: &str,
        block: &BlockData,
    ) -> Result<Decision, ManagerError> {
        let dependencies = self.config.dependencies(framework, task)?;
        if !dependencies_met(entity, &dependencies) {
            return Ok(Decision::Skip(SkipReason::Dependency));
        }

        let record =
            entity
                .find_task(framework, task)
                .ok_or_else(|| ManagerError::TaskMissing {
                    key: entity.key.clone(),
                    framework: framework.to_owned(),
                    task: task.to_owned(),
                })?;

        let schedule = self.config.schedule(framework, task)?;
        if !schedule_allows(schedule, block, record.last_seen().height) {
            return Ok(Decision::Skip(SkipReason::Schedule));
        }

        let trigger_minimum = self.config.trigger_minimum(framework, task)?;
        let limits = self.config.task_limits(record.task_type(), framework, task);
        let Some(needed) = samples_needed(record.ok_samples() as u64, &limits, trigger_minimum)
        else {
            return Ok(Decision::Skip(SkipReason::UpToDate));
        };

        let queue = self
            .store
            .lookup_requests(&entity.key, framework, task)
            .await?;
        let decision = match quantity_to_request(
            needed,
            limits.max_concurrent_samples_per_task,
            queue.in_queue,
            trigger_minimum,
        ) {
            Ok(quantity) => Decision::Trigger(TaskTrigger {
                address: entity.key.address.clone(),
                service: entity.key.service.clone(),
                framework: framework.to_owned(),
                task: task.to_owned(),
                blacklist: queue.blacklist,
                quantity,
            }),
            Err(reason) => Decision::Skip(reason),
        };
        Ok(decision)
    }
}
