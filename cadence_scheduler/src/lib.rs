// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Threaded refresh-rate scheduling and vsync distribution.
//!
//! This crate wraps the deterministic pieces of `cadence_core` in the
//! threads, locks and timers a compositor runs:
//!
//! - [`Scheduler`]: the policy controller. Owns the idle, touch and
//!   display-power timers, the content history and the hardware-vsync
//!   switch, and reports refresh-rate decisions through a
//!   [`SchedulerCallback`].
//! - [`VsyncDistributor`]: phased vsync pulses for any number of consumer
//!   channels, with drop-on-backpressure delivery.
//! - [`OneShotTimer`]: restartable countdown on its own thread.
//! - [`Clock`]: monotonic and manual host clocks.
//!
//! Callbacks never run under a scheduler lock, except
//! [`VsyncControl::set_vsync_enabled`], which must not call back in.

mod callback;
mod clock;
mod controller;
mod distributor;
mod error;
mod timer;

pub use callback::{SchedulerCallback, VsyncControl};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use controller::{
    DisplayStatInfo, LayerKind, Scheduler, SchedulerConfig, VsyncPeriodChangeTimeline,
};
pub use distributor::{ChannelHandle, ChannelStats, VsyncDistributor, VsyncPulse, VsyncReceiver};
pub use error::SchedulerError;
pub use timer::OneShotTimer;
