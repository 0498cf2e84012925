// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A fixed-capacity ring of timestamped slots.
//!
//! The window of valid samples goes from `start` to `end`, both inclusive, walking forward
//! with wraparound. A slot is valid when it holds a timestamp: evicted and never-written
//! slots are cleared, so the number of samples is always derived from the slots in the
//! window and an empty buffer (`start == end`, slot cleared) is told apart from a buffer
//! holding a single sample (`start == end`, slot stamped) without a separate counter.

use serde::{Deserialize, Serialize};
use testbench_base::{
    data_types::{TimeDelta, Timestamp},
    ensure,
};
use tracing::{debug, info};

use crate::records::RecordError;

#[cfg(test)]
#[path = "unit_tests/buffer_tests.rs"]
mod buffer_tests;

/// A move of one of the window markers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexStep {
    /// Moves `end` forward and stamps the new slot. If the buffer is full, `start` is moved
    /// first, evicting the oldest sample.
    AdvanceEnd(Timestamp),
    /// Clears the slot at `end` and moves `end` backward.
    RetreatEnd,
    /// Clears the slot at `start` and moves `start` forward.
    AdvanceStart,
}

/// The index and eviction discipline shared by every task record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CircularBuffer {
    capacity: usize,
    start: usize,
    end: usize,
    num_samples: usize,
    times: Vec<Option<Timestamp>>,
}

impl CircularBuffer {
    /// Creates an empty buffer.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero. Task records are only created from validated limits.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a circular buffer needs at least one slot");
        Self {
            capacity,
            start: 0,
            end: 0,
            num_samples: 0,
            times: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// The number of valid samples in the window.
    pub fn len(&self) -> usize {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    pub fn is_full(&self) -> bool {
        self.num_samples == self.capacity
    }

    /// Returns the time at which the sample in slot `index` was written, if the slot is valid.
    pub fn time(&self, index: usize) -> Option<Timestamp> {
        self.times.get(index).copied().flatten()
    }

    /// Moves one marker by one slot and returns the resulting `end` index.
    pub fn step_index(&mut self, step: IndexStep) -> usize {
        match step {
            IndexStep::AdvanceEnd(time) => {
                if self.is_empty() {
                    // Re-anchor the window on the current end slot.
                    self.start = self.end;
                } else {
                    let next = self.next(self.end);
                    if next == self.start {
                        self.times[self.start] = None;
                        self.start = self.next(self.start);
                    }
                    self.end = next;
                }
                self.times[self.end] = Some(time);
            }
            IndexStep::RetreatEnd => {
                if !self.is_empty() {
                    self.times[self.end] = None;
                    if self.end != self.start {
                        self.end = self.previous(self.end);
                    }
                }
            }
            IndexStep::AdvanceStart => {
                if !self.is_empty() {
                    self.times[self.start] = None;
                    if self.start != self.end {
                        self.start = self.next(self.start);
                    }
                }
            }
        }
        self.recount();
        self.end
    }

    /// Writes a new sample time at the end of the window and returns its slot.
    pub fn push(&mut self, time: Timestamp) -> usize {
        self.step_index(IndexStep::AdvanceEnd(time))
    }

    /// Evicts every sample at the start of the window whose age has reached `ttl`. Returns
    /// whether any sample was evicted.
    pub fn cycle(&mut self, ttl: TimeDelta, now: Timestamp) -> bool {
        let initial = self.num_samples;
        while !self.is_empty() {
            match self.times[self.start] {
                Some(time) if now.delta_since(time) < ttl => break,
                _ => {
                    self.step_index(IndexStep::AdvanceStart);
                }
            }
        }
        if initial != self.num_samples {
            debug!(evicted = initial - self.num_samples, "cycled buffer");
            if self.is_empty() {
                info!(capacity = self.capacity, "buffer collapsed, every sample expired");
            }
            true
        } else {
            false
        }
    }

    /// Returns the valid slots from oldest to newest.
    pub fn valid_indexes(&self) -> Vec<usize> {
        self.window()
            .filter(|index| self.times[*index].is_some())
            .collect()
    }

    /// Verifies that the markers and the slots agree, as a persisted buffer may have been
    /// produced by another writer.
    pub fn check(&self) -> Result<(), RecordError> {
        ensure!(
            self.capacity > 0 && self.times.len() == self.capacity,
            RecordError::InconsistentBuffer("slot count does not match capacity")
        );
        ensure!(
            self.start < self.capacity && self.end < self.capacity,
            RecordError::InconsistentBuffer("marker out of range")
        );
        let window = self.window().count();
        let valid = self.valid_indexes().len();
        ensure!(
            valid == self.num_samples,
            RecordError::InconsistentBuffer("sample count does not match the window")
        );
        ensure!(
            valid == 0 || valid == window,
            RecordError::InconsistentBuffer("cleared slot inside the window")
        );
        ensure!(
            self.times.iter().flatten().count() == valid,
            RecordError::InconsistentBuffer("stamped slot outside the window")
        );
        Ok(())
    }

    /// Overrides the time of a valid slot.
    #[cfg(with_testing)]
    pub fn set_time(&mut self, index: usize, time: Timestamp) {
        if let Some(slot @ Some(_)) = self.times.get_mut(index) {
            *slot = Some(time);
        }
    }

    /// Walks the slots from `start` to `end` inclusive.
    fn window(&self) -> impl Iterator<Item = usize> + '_ {
        let span = (self.end + self.capacity - self.start) % self.capacity + 1;
        (0..span).map(move |offset| (self.start + offset) % self.capacity)
    }

    fn recount(&mut self) {
        let valid = self
            .window()
            .filter(|index| self.times[*index].is_some())
            .count();
        self.num_samples = valid;
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity
    }

    fn previous(&self, index: usize) -> usize {
        (index + self.capacity - 1) % self.capacity
    }
}
