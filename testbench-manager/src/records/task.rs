// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use testbench_base::{
    data_types::{BlockHeight, Checkpoint, TimeDelta, Timestamp},
    ensure,
    identifiers::SourceId,
};

use super::{RecordError, StatusCode};
use crate::buffer::CircularBuffer;

#[cfg(test)]
#[path = "../unit_tests/task_tests.rs"]
mod task_tests;

/// The kind of samples a task produces.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Numerical,
    Signature,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Numerical => write!(f, "numerical"),
            TaskType::Signature => write!(f, "signature"),
        }
    }
}

/// A scored sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericalSample {
    pub score: f64,
    pub source_id: SourceId,
    /// Seconds taken by the entity to answer.
    pub run_time: f64,
    #[serde(default)]
    pub status: StatusCode,
}

/// An opaque value, only ever compared for equality.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignatureSample {
    pub signature: String,
    pub source_id: SourceId,
    #[serde(default)]
    pub status: StatusCode,
}

/// A sample of either kind, as read from a result document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SamplePayload {
    Numerical(NumericalSample),
    Signature(SignatureSample),
}

impl SamplePayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            SamplePayload::Numerical(_) => TaskType::Numerical,
            SamplePayload::Signature(_) => TaskType::Signature,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SamplePayload::Numerical(sample) => sample.status,
            SamplePayload::Signature(sample) => sample.status,
        }
    }
}

/// A circular buffer together with the samples of its slots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskBuffer<S> {
    buffer: CircularBuffer,
    samples: Vec<Option<S>>,
}

impl<S> TaskBuffer<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: CircularBuffer::new(capacity),
            samples: std::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    pub fn buffer(&self) -> &CircularBuffer {
        &self.buffer
    }

    #[cfg(with_testing)]
    pub fn buffer_mut(&mut self) -> &mut CircularBuffer {
        &mut self.buffer
    }

    fn push(&mut self, time: Timestamp, sample: S) {
        let slot = self.buffer.push(time);
        self.samples[slot] = Some(sample);
    }

    /// The samples of the window, from oldest to newest.
    pub fn window(&self) -> impl Iterator<Item = &S> + '_ {
        self.buffer
            .valid_indexes()
            .into_iter()
            .filter_map(|index| self.samples[index].as_ref())
    }

    /// The sample at the end of the window.
    pub fn latest(&self) -> Option<&S> {
        if self.buffer.is_empty() {
            return None;
        }
        self.samples[self.buffer.end()].as_ref()
    }

    fn check(&self) -> Result<(), RecordError> {
        self.buffer.check()?;
        ensure!(
            self.samples.len() == self.buffer.capacity(),
            RecordError::InconsistentBuffer("sample count does not match capacity")
        );
        ensure!(
            self.buffer
                .valid_indexes()
                .into_iter()
                .all(|index| self.samples[index].is_some()),
            RecordError::InconsistentBuffer("valid slot without a sample")
        );
        Ok(())
    }
}

/// What [`TaskRecord::insert_sample`] did with a sample.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Insertion {
    /// The sample entered the window.
    pub stored: bool,
    pub successful: bool,
}

/// The identity and bookkeeping common to every task record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub framework: String,
    pub task: String,
    /// The last time a result for this task was consumed.
    pub last_seen: Checkpoint,
    /// The last time a result contained at least one successful sample.
    pub last_ok: Checkpoint,
}

/// Mean, median and population standard deviation of a set of values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

impl Summary {
    /// Summarizes `values`, sorting them in place.
    pub fn of(values: &mut [f64]) -> Self {
        let count = values.len();
        match count {
            0 => Summary::default(),
            1 => Summary {
                mean: values[0],
                median: values[0],
                std_dev: 0.0,
            },
            _ => {
                let n = count as f64;
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
                values.sort_by(f64::total_cmp);
                let median = if count % 2 == 0 {
                    (values[count / 2 - 1] + values[count / 2]) / 2.0
                } else {
                    values[count / 2]
                };
                Summary {
                    mean,
                    median,
                    std_dev: variance.sqrt(),
                }
            }
        }
    }

    fn is_zero(&self) -> bool {
        self.mean + self.median + self.std_dev == 0.0
    }
}

/// Statistics derived from the window of a numerical task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericalStats {
    pub scores: Summary,
    pub run_times: Summary,
    /// Share of punishable failures among the samples of the window.
    pub error_rate: f64,
    /// Stored as a list of pairs, document keys being strings.
    #[serde(with = "error_code_counts")]
    pub error_codes: BTreeMap<StatusCode, usize>,
    pub ok_samples: usize,
}

mod error_code_counts {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::records::StatusCode;

    pub fn serialize<S>(
        counts: &BTreeMap<StatusCode, usize>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(counts)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<StatusCode, usize>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(StatusCode, usize)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericalTaskRecord {
    pub data: TaskData,
    pub samples: TaskBuffer<NumericalSample>,
    pub stats: NumericalStats,
}

impl NumericalTaskRecord {
    pub fn recompute(&mut self) {
        let mut scores = Vec::new();
        let mut run_times = Vec::new();
        let mut error_codes = BTreeMap::new();
        let mut punishable = 0;
        for sample in self.samples.window() {
            if sample.status.is_ok() {
                scores.push(sample.score);
                run_times.push(sample.run_time);
            } else if sample.status.is_punishable() {
                punishable += 1;
                *error_codes.entry(sample.status).or_insert(0) += 1;
            }
        }
        let ok_samples = scores.len();
        let total = ok_samples + punishable;
        self.stats = NumericalStats {
            scores: Summary::of(&mut scores),
            run_times: Summary::of(&mut run_times),
            error_rate: if total == 0 {
                0.0
            } else {
                punishable as f64 / total as f64
            },
            error_codes,
            ok_samples,
        };
    }

    /// A zero score cannot be told apart from a task that never produced data.
    pub fn is_ok(&self) -> bool {
        !self.stats.scores.is_zero()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureTaskRecord {
    pub data: TaskData,
    pub samples: TaskBuffer<SignatureSample>,
    /// The signature of the most recent sample, empty if that sample failed.
    pub last_signature: String,
    pub error_code: StatusCode,
    pub ok_samples: usize,
}

impl SignatureTaskRecord {
    pub fn recompute(&mut self) {
        match self.samples.latest() {
            Some(sample) if sample.status.is_ok() => {
                self.last_signature = sample.signature.clone();
                self.error_code = StatusCode::Ok;
            }
            Some(sample) => {
                self.last_signature.clear();
                self.error_code = sample.status;
            }
            None => {
                self.last_signature.clear();
                self.error_code = StatusCode::Ok;
            }
        }
        self.ok_samples = self
            .samples
            .window()
            .filter(|sample| sample.status.is_ok())
            .count();
    }

    pub fn is_ok(&self) -> bool {
        !self.last_signature.is_empty() && self.error_code.is_ok()
    }
}

/// The rolling window of one (framework, task) pair of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskRecord {
    Numerical(NumericalTaskRecord),
    Signature(SignatureTaskRecord),
}

impl TaskRecord {
    /// Creates a record with an empty buffer. The last-seen time starts at `created`, so
    /// that a fresh task is not pruned before it had a chance to be sampled, while the
    /// height starts at zero so that no schedule holds back its first sampling.
    pub fn new(
        task_type: TaskType,
        framework: impl Into<String>,
        task: impl Into<String>,
        capacity: usize,
        created: Timestamp,
    ) -> Self {
        let data = TaskData {
            framework: framework.into(),
            task: task.into(),
            last_seen: Checkpoint::new(BlockHeight(0), created),
            last_ok: Checkpoint::default(),
        };
        match task_type {
            TaskType::Numerical => TaskRecord::Numerical(NumericalTaskRecord {
                data,
                samples: TaskBuffer::new(capacity),
                stats: NumericalStats::default(),
            }),
            TaskType::Signature => TaskRecord::Signature(SignatureTaskRecord {
                data,
                samples: TaskBuffer::new(capacity),
                last_signature: String::new(),
                error_code: StatusCode::Ok,
                ok_samples: 0,
            }),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskRecord::Numerical(_) => TaskType::Numerical,
            TaskRecord::Signature(_) => TaskType::Signature,
        }
    }

    pub fn data(&self) -> &TaskData {
        match self {
            TaskRecord::Numerical(record) => &record.data,
            TaskRecord::Signature(record) => &record.data,
        }
    }

    pub fn data_mut(&mut self) -> &mut TaskData {
        match self {
            TaskRecord::Numerical(record) => &mut record.data,
            TaskRecord::Signature(record) => &mut record.data,
        }
    }

    pub fn framework(&self) -> &str {
        &self.data().framework
    }

    pub fn task(&self) -> &str {
        &self.data().task
    }

    pub fn is(&self, framework: &str, task: &str) -> bool {
        self.framework() == framework && self.task() == task
    }

    pub fn buffer(&self) -> &CircularBuffer {
        match self {
            TaskRecord::Numerical(record) => record.samples.buffer(),
            TaskRecord::Signature(record) => record.samples.buffer(),
        }
    }

    #[cfg(with_testing)]
    pub fn buffer_mut(&mut self) -> &mut CircularBuffer {
        match self {
            TaskRecord::Numerical(record) => record.samples.buffer_mut(),
            TaskRecord::Signature(record) => record.samples.buffer_mut(),
        }
    }

    /// Writes a sample at the end of the window. Samples whose status says nothing about the
    /// entity are skipped without moving the window.
    pub fn insert_sample(
        &mut self,
        time: Timestamp,
        payload: SamplePayload,
    ) -> Result<Insertion, RecordError> {
        let status = payload.status();
        let stored = status.is_storable();
        match (self, payload) {
            (TaskRecord::Numerical(record), SamplePayload::Numerical(sample)) => {
                if stored {
                    record.samples.push(time, sample);
                }
            }
            (TaskRecord::Signature(record), SamplePayload::Signature(sample)) => {
                if stored {
                    record.samples.push(time, sample);
                }
            }
            (record, payload) => {
                return Err(RecordError::TypeMismatch {
                    framework: record.framework().to_owned(),
                    task: record.task().to_owned(),
                    expected: record.task_type(),
                    found: payload.task_type(),
                });
            }
        }
        Ok(Insertion {
            stored,
            successful: status.is_ok(),
        })
    }

    /// Refreshes the derived statistics from the current window.
    pub fn recompute(&mut self) {
        match self {
            TaskRecord::Numerical(record) => record.recompute(),
            TaskRecord::Signature(record) => record.recompute(),
        }
    }

    /// Evicts the samples older than `ttl`.
    pub fn cycle(&mut self, ttl: TimeDelta, now: Timestamp) -> bool {
        match self {
            TaskRecord::Numerical(record) => record.samples.buffer.cycle(ttl, now),
            TaskRecord::Signature(record) => record.samples.buffer.cycle(ttl, now),
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            TaskRecord::Numerical(record) => record.is_ok(),
            TaskRecord::Signature(record) => record.is_ok(),
        }
    }

    /// The number of successful samples in the window, as of the last [`Self::recompute`].
    pub fn ok_samples(&self) -> usize {
        match self {
            TaskRecord::Numerical(record) => record.stats.ok_samples,
            TaskRecord::Signature(record) => record.ok_samples,
        }
    }

    pub fn last_seen(&self) -> Checkpoint {
        self.data().last_seen
    }

    pub fn last_ok(&self) -> Checkpoint {
        self.data().last_ok
    }

    pub fn check(&self) -> Result<(), RecordError> {
        match self {
            TaskRecord::Numerical(record) => record.samples.check(),
            TaskRecord::Signature(record) => record.samples.check(),
        }
    }
}
