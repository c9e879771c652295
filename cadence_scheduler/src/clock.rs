// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host clock sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use cadence_core::time::{Duration, HostTime};

/// Source of monotonic host time in nanoseconds.
pub trait Clock: Send + Sync {
    /// Returns the current host time.
    fn now(&self) -> HostTime;
}

/// Monotonic clock anchored at construction.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Creates a clock reading zero now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> HostTime {
        let nanos = self.origin.elapsed().as_nanos();
        HostTime(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: HostTime) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start.nanos())),
        }
    }

    /// Jumps to `t`.
    pub fn set(&self, t: HostTime) {
        self.now.store(t.nanos(), Ordering::Release);
    }

    /// Moves forward by `d`.
    pub fn advance(&self, d: Duration) {
        let _ = self.now.fetch_add(d.nanos(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> HostTime {
        HostTime(self.now.load(Ordering::Acquire))
    }
}

/// Converts a non-negative host duration to a std duration.
pub(crate) fn to_std(d: Duration) -> std::time::Duration {
    std::time::Duration::from_nanos(u64::try_from(d.nanos()).unwrap_or(0))
}
