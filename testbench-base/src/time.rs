// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Sources of wall-clock time. Components receive a [`Clock`] instead of reading the system
time directly, so that sample ages can be controlled in tests.
 */

#[cfg(with_testing)]
use std::sync::{Arc, Mutex, MutexGuard};

use crate::data_types::Timestamp;
#[cfg(with_testing)]
use crate::data_types::TimeDelta;

/// A source of the current time.
pub trait Clock {
    fn current_time(&self) -> Timestamp;
}

/// A `Clock` implementation using the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn current_time(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock implementation that uses a stored number of microseconds and that can be updated
/// explicitly. All clones share the same time, and setting it in one clone updates all the others.
#[cfg(with_testing)]
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<Mutex<Timestamp>>);

#[cfg(with_testing)]
impl TestClock {
    /// Creates a new clock with its time set to 0, i.e. the Unix epoch.
    pub fn new() -> Self {
        TestClock(Arc::default())
    }

    /// Sets the current time.
    pub fn set(&self, time: Timestamp) {
        *self.lock() = time;
    }

    /// Advances the current time by the specified delta.
    pub fn add(&self, delta: TimeDelta) {
        let mut guard = self.lock();
        *guard = guard.saturating_add(delta);
    }

    fn lock(&self) -> MutexGuard<'_, Timestamp> {
        self.0.lock().expect("poisoned TestClock mutex")
    }
}

#[cfg(with_testing)]
impl Clock for TestClock {
    fn current_time(&self) -> Timestamp {
        *self.lock()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn current_time(&self) -> Timestamp {
        (**self).current_time()
    }
}
