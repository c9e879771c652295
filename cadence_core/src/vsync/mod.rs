// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vsync modeling and per-consumer dispatch.
//!
//! - [`predictor`]: regression fit of hardware vsync timestamps.
//! - [`timeline`]: resync samples, present fences and period changes on top
//!   of the predictor.
//! - [`dispatch`]: per-consumer wakeup bookkeeping against any
//!   [`VsyncTracker`].

pub mod dispatch;
pub mod predictor;
pub mod timeline;

use crate::time::{Duration, HostTime};

pub use dispatch::{
    CancelResult, DispatchError, DispatchQueue, DispatchToken, Invocation, ScheduleResult,
};
pub use predictor::{SampleRejection, VsyncModel, VsyncPredictor};
pub use timeline::{FenceState, FenceTime, ResyncOutcome, TimelineConfig, VsyncTimeline};

/// Source of vsync predictions.
pub trait VsyncTracker {
    /// Returns the first predicted vsync strictly after `time_point`.
    fn next_anticipated_vsync_from(&self, time_point: HostTime) -> HostTime;

    /// Returns the modeled vsync period.
    fn current_period(&self) -> Duration;
}

/// A tracker with a perfectly regular, fixed vsync.
///
/// Useful when no hardware samples are available yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedVsync {
    /// Time of one known vsync.
    pub anchor: HostTime,
    /// Period between vsyncs.
    pub period: Duration,
}

impl VsyncTracker for FixedVsync {
    fn next_anticipated_vsync_from(&self, time_point: HostTime) -> HostTime {
        let period = self.period.nanos().max(1);
        let periods = (time_point.nanos() - self.anchor.nanos()).div_euclid(period) + 1;
        HostTime(self.anchor.nanos() + periods * period)
    }

    fn current_period(&self) -> Duration {
        self.period
    }
}
