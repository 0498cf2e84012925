// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The framework and task tables that drive task creation and admission.
//!
//! Every per-task table is keyed by task name and may hold an `"any"` entry used for the
//! tasks that have no entry of their own.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use testbench_base::{data_types::TimeDelta, ensure};
use thiserror::Error;

use crate::records::TaskType;

#[cfg(test)]
#[path = "unit_tests/config_tests.rs"]
mod config_tests;

/// The wildcard entry of the per-task tables.
pub const ANY_TASK: &str = "any";

const NONE: &str = "none";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("framework {0:?} is not configured")]
    UnknownFramework(String),
    #[error("no {table} entry for task {task:?} of framework {framework:?}, and no \"any\" fallback")]
    MissingEntry {
        table: &'static str,
        framework: String,
        task: String,
    },
    #[error("malformed {table} entry {expression:?} for task {task:?} of framework {framework:?}")]
    MalformedEntry {
        table: &'static str,
        framework: String,
        task: String,
        expression: String,
    },
    #[error("invalid {0} limits: {1}")]
    InvalidLimits(String, &'static str),
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// The sampling limits of a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskLimits {
    /// The number of successful samples a window should hold.
    pub min_samples_per_task: u64,
    /// The maximum number of samples requested and not yet processed.
    pub max_concurrent_samples_per_task: u64,
    pub buffer_capacity: usize,
    pub sample_ttl_days: u64,
}

impl TaskLimits {
    pub const NUMERICAL: TaskLimits = TaskLimits {
        min_samples_per_task: 50,
        max_concurrent_samples_per_task: 10,
        buffer_capacity: 50,
        sample_ttl_days: 5,
    };

    pub const SIGNATURE: TaskLimits = TaskLimits {
        min_samples_per_task: 5,
        max_concurrent_samples_per_task: 1,
        buffer_capacity: 5,
        sample_ttl_days: 5,
    };

    pub fn sample_ttl(&self) -> TimeDelta {
        TimeDelta::from_days(self.sample_ttl_days)
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        ensure!(
            self.buffer_capacity > 0,
            ConfigError::InvalidLimits(name.to_owned(), "buffer capacity must be positive")
        );
        ensure!(
            self.min_samples_per_task > 0,
            ConfigError::InvalidLimits(name.to_owned(), "minimum sample count must be positive")
        );
        Ok(())
    }
}

/// The default limits of each task variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VariantLimits {
    pub numerical: TaskLimits,
    pub signature: TaskLimits,
}

impl Default for VariantLimits {
    fn default() -> Self {
        Self {
            numerical: TaskLimits::NUMERICAL,
            signature: TaskLimits::SIGNATURE,
        }
    }
}

impl VariantLimits {
    pub fn get(&self, task_type: TaskType) -> TaskLimits {
        match task_type {
            TaskType::Numerical => self.numerical,
            TaskType::Signature => self.signature,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// The variant of each task.
    pub task_types: BTreeMap<String, TaskType>,
    /// Tasks that must be present or ok before a task is sampled, as
    /// `framework:task:present|ok` expressions. `none:none:none` means no dependency.
    #[serde(default)]
    pub task_dependency: BTreeMap<String, Vec<String>>,
    /// The minimum spacing between two samplings, as `<n>:session`, `<n>:block` or
    /// `none:none`.
    #[serde(default)]
    pub schedule_limits: BTreeMap<String, String>,
    /// The number of samples requested even when a window is complete.
    #[serde(default)]
    pub trigger_minimum: BTreeMap<String, String>,
    /// Overrides of the variant limits.
    #[serde(default)]
    pub task_limits: BTreeMap<String, TaskLimits>,
}

/// The tasks of a framework that every entity is evaluated on.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestsConfig {
    pub framework: String,
    pub tasks: Vec<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DevelopConfig {
    /// Keeps the documents of consumed requests for inspection.
    #[serde(default)]
    pub retain_request_data: bool,
}

/// The requirement of a task on another task of the same entity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Dependency {
    None,
    Present { framework: String, task: String },
    Ok { framework: String, task: String },
}

impl Dependency {
    fn parse(expression: &str) -> Option<Self> {
        let mut parts = expression.split(':');
        let (framework, task, status) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        if framework == NONE {
            return Some(Dependency::None);
        }
        let (framework, task) = (framework.to_owned(), task.to_owned());
        match status {
            "present" => Some(Dependency::Present { framework, task }),
            "ok" => Some(Dependency::Ok { framework, task }),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleUnit {
    Session,
    Block,
}

/// The minimum spacing between two samplings of a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Schedule {
    Always,
    Every { count: u64, unit: ScheduleUnit },
}

impl Schedule {
    fn parse(expression: &str) -> Option<Self> {
        let (count, unit) = expression.split_once(':')?;
        if unit.contains(':') {
            return None;
        }
        if count == NONE {
            return Some(Schedule::Always);
        }
        let count = count.parse().ok()?;
        let unit = match unit {
            "session" => ScheduleUnit::Session,
            "block" => ScheduleUnit::Block,
            _ => return None,
        };
        Some(Schedule::Every { count, unit })
    }

    /// The number of blocks that must separate two samplings.
    pub fn min_blocks(&self, blocks_per_session: u64) -> u64 {
        match self {
            Schedule::Always => 0,
            Schedule::Every {
                count,
                unit: ScheduleUnit::Session,
            } => count.saturating_mul(blocks_per_session),
            Schedule::Every {
                count,
                unit: ScheduleUnit::Block,
            } => *count,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub frameworks: BTreeMap<String, FrameworkConfig>,
    #[serde(default)]
    pub tests: Vec<TestsConfig>,
    #[serde(default)]
    pub limits: VariantLimits,
    #[serde(default = "default_max_task_age_days")]
    pub max_task_age_days: u64,
    #[serde(default)]
    pub develop: DevelopConfig,
    /// The network parameter holding the number of blocks per session.
    #[serde(default = "default_session_length_param")]
    pub session_length_param: String,
}

fn default_max_task_age_days() -> u64 {
    32
}

fn default_session_length_param() -> String {
    "num_blocks_per_session".to_owned()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            frameworks: BTreeMap::new(),
            tests: Vec::new(),
            limits: VariantLimits::default(),
            max_task_age_days: default_max_task_age_days(),
            develop: DevelopConfig::default(),
            session_length_param: default_session_length_param(),
        }
    }
}

fn lookup<'a, V>(table: &'a BTreeMap<String, V>, task: &str) -> Option<&'a V> {
    table.get(task).or_else(|| table.get(ANY_TASK))
}

impl ManagerConfig {
    /// Reads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn framework(&self, framework: &str) -> Result<&FrameworkConfig, ConfigError> {
        self.frameworks
            .get(framework)
            .ok_or_else(|| ConfigError::UnknownFramework(framework.to_owned()))
    }

    /// The (framework, task) pairs every entity is evaluated on, in evaluation order.
    pub fn configured_tasks(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tests.iter().flat_map(|tests| {
            tests
                .tasks
                .iter()
                .map(move |task| (tests.framework.as_str(), task.as_str()))
        })
    }

    pub fn max_task_age(&self) -> TimeDelta {
        TimeDelta::from_days(self.max_task_age_days)
    }

    fn entry<'a, V>(
        &'a self,
        table: &'static str,
        select: impl FnOnce(&'a FrameworkConfig) -> &'a BTreeMap<String, V>,
        framework: &str,
        task: &str,
    ) -> Result<&'a V, ConfigError> {
        lookup(select(self.framework(framework)?), task).ok_or_else(|| ConfigError::MissingEntry {
            table,
            framework: framework.to_owned(),
            task: task.to_owned(),
        })
    }

    pub fn task_type(&self, framework: &str, task: &str) -> Result<TaskType, ConfigError> {
        self.entry("task_types", |config| &config.task_types, framework, task)
            .copied()
    }

    /// The limits of a task: the framework override if any, else the variant defaults.
    pub fn task_limits(&self, task_type: TaskType, framework: &str, task: &str) -> TaskLimits {
        self.frameworks
            .get(framework)
            .and_then(|config| lookup(&config.task_limits, task))
            .copied()
            .unwrap_or_else(|| self.limits.get(task_type))
    }

    pub fn dependencies(&self, framework: &str, task: &str) -> Result<Vec<Dependency>, ConfigError> {
        let expressions = self.entry(
            "task_dependency",
            |config| &config.task_dependency,
            framework,
            task,
        )?;
        expressions
            .iter()
            .map(|expression| {
                Dependency::parse(expression).ok_or_else(|| {
                    malformed("task_dependency", framework, task, expression)
                })
            })
            .collect()
    }

    pub fn schedule(&self, framework: &str, task: &str) -> Result<Schedule, ConfigError> {
        let expression = self.entry(
            "schedule_limits",
            |config| &config.schedule_limits,
            framework,
            task,
        )?;
        Schedule::parse(expression)
            .ok_or_else(|| malformed("schedule_limits", framework, task, expression))
    }

    pub fn trigger_minimum(&self, framework: &str, task: &str) -> Result<u64, ConfigError> {
        let expression = self.entry(
            "trigger_minimum",
            |config| &config.trigger_minimum,
            framework,
            task,
        )?;
        expression
            .trim()
            .parse()
            .map_err(|_| malformed("trigger_minimum", framework, task, expression))
    }

    /// Resolves every entry the evaluation of the configured tasks will need, so that a
    /// broken table is reported at startup instead of on the first tick.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.numerical.validate("numerical")?;
        self.limits.signature.validate("signature")?;
        for (name, framework) in &self.frameworks {
            for (task, limits) in &framework.task_limits {
                limits.validate(&format!("{name}/{task}"))?;
            }
        }
        for (framework, task) in self.configured_tasks() {
            self.task_type(framework, task)?;
            for dependency in self.dependencies(framework, task)? {
                if let Dependency::Present { framework, task } | Dependency::Ok { framework, task } =
                    &dependency
                {
                    self.task_type(framework, task)?;
                }
            }
            self.schedule(framework, task)?;
            self.trigger_minimum(framework, task)?;
        }
        Ok(())
    }
}

fn malformed(table: &'static str, framework: &str, task: &str, expression: &str) -> ConfigError {
    ConfigError::MalformedEntry {
        table,
        framework: framework.to_owned(),
        task: task.to_owned(),
        expression: expression.to_owned(),
    }
}
