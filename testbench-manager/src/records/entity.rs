// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};
use testbench_base::{
    data_types::{Checkpoint, TimeDelta, Timestamp},
    identifiers::EntityKey,
};
use tracing::{debug, info};

use super::{NumericalTaskRecord, RecordError, SignatureTaskRecord, TaskRecord};
use crate::config::{ConfigError, ManagerConfig};

#[cfg(test)]
#[path = "../unit_tests/entity_tests.rs"]
mod entity_tests;

/// The role of an evaluated entity.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Supplier,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Supplier => write!(f, "supplier"),
        }
    }
}

/// Everything the manager knows about one staked entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub kind: EntityKind,
    #[serde(flatten)]
    pub key: EntityKey,
    /// The most recent successful interaction, over all tasks and frameworks.
    pub last_seen: Checkpoint,
    /// The last maintenance pass of the manager itself. Only tracked for suppliers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_process: Option<Checkpoint>,
    #[serde(default)]
    tasks: Vec<TaskRecord>,
}

impl EntityRecord {
    pub fn new(kind: EntityKind, key: EntityKey, seen: Checkpoint) -> Self {
        Self {
            kind,
            key,
            last_seen: seen,
            last_process: None,
            tasks: Vec::new(),
        }
    }

    pub fn document_id(&self) -> String {
        self.key.document_id()
    }

    /// All the task records, whatever their variant.
    pub fn combine_tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn numerical_tasks(&self) -> impl Iterator<Item = &NumericalTaskRecord> {
        self.tasks.iter().filter_map(|task| match task {
            TaskRecord::Numerical(record) => Some(record),
            TaskRecord::Signature(_) => None,
        })
    }

    pub fn signature_tasks(&self) -> impl Iterator<Item = &SignatureTaskRecord> {
        self.tasks.iter().filter_map(|task| match task {
            TaskRecord::Signature(record) => Some(record),
            TaskRecord::Numerical(_) => None,
        })
    }

    pub fn find_task(&self, framework: &str, task: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|record| record.is(framework, task))
    }

    pub fn find_task_mut(&mut self, framework: &str, task: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|record| record.is(framework, task))
    }

    /// Creates an empty task record of the configured variant and capacity. Limits that
    /// cannot hold a single sample are rejected.
    pub fn append_task(
        &mut self,
        framework: &str,
        task: &str,
        config: &ManagerConfig,
        created: Timestamp,
    ) -> Result<&mut TaskRecord, ConfigError> {
        let task_type = config.task_type(framework, task)?;
        let limits = config.task_limits(task_type, framework, task);
        limits.validate(&format!("{framework}/{task}"))?;
        debug!(
            address = %self.key.address,
            service = %self.key.service,
            framework,
            task,
            %task_type,
            capacity = limits.buffer_capacity,
            "appending task"
        );
        self.tasks.push(TaskRecord::new(
            task_type,
            framework,
            task,
            limits.buffer_capacity,
            created,
        ));
        let index = self.tasks.len() - 1;
        Ok(&mut self.tasks[index])
    }

    /// Returns the record of a task, creating it if the entity is not evaluated on it yet.
    pub fn find_or_append_task(
        &mut self,
        framework: &str,
        task: &str,
        config: &ManagerConfig,
        created: Timestamp,
    ) -> Result<&mut TaskRecord, ConfigError> {
        match self.tasks.iter().position(|record| record.is(framework, task)) {
            Some(index) => Ok(&mut self.tasks[index]),
            None => self.append_task(framework, task, config, created),
        }
    }

    /// Appends a record for every configured task the entity does not have yet. Returns
    /// the number of appended tasks.
    pub fn append_missing_tasks(
        &mut self,
        config: &ManagerConfig,
        created: Timestamp,
    ) -> Result<usize, ConfigError> {
        let mut appended = 0;
        for (framework, task) in config.configured_tasks() {
            if self.find_task(framework, task).is_none() {
                self.append_task(framework, task, config, created)?;
                appended += 1;
            }
        }
        Ok(appended)
    }

    /// Removes the tasks that were not seen for longer than `max_age`, keeping the order of
    /// the others. Returns the number of removed tasks.
    pub fn prune_stale_tasks(&mut self, max_age: TimeDelta, now: Timestamp) -> usize {
        let initial = self.tasks.len();
        let key = &self.key;
        self.tasks.retain(|record| {
            let fresh = now.delta_since(record.last_seen().time) <= max_age;
            if !fresh {
                info!(
                    address = %key.address,
                    service = %key.service,
                    framework = record.framework(),
                    task = record.task(),
                    last_seen = %record.last_seen().time,
                    "dropping stale task"
                );
            }
            fresh
        });
        initial - self.tasks.len()
    }

    /// Evicts expired samples from every task and refreshes their statistics.
    pub fn cycle_tasks(&mut self, config: &ManagerConfig, now: Timestamp) {
        for record in &mut self.tasks {
            let limits = config.task_limits(record.task_type(), record.framework(), record.task());
            record.cycle(limits.sample_ttl(), now);
            record.recompute();
        }
    }

    /// Raises the entity's last-seen checkpoint to the most recent successful interaction of
    /// any of its tasks. The checkpoint never moves backward.
    pub fn merge_last_seen(&mut self) -> Checkpoint {
        self.last_seen = self
            .tasks
            .iter()
            .map(TaskRecord::last_ok)
            .fold(self.last_seen, Checkpoint::latest);
        self.last_seen
    }

    pub fn check(&self) -> Result<(), RecordError> {
        self.tasks.iter().try_for_each(TaskRecord::check)
    }
}
