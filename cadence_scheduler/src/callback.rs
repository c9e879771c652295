// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capabilities the scheduler is handed at construction.

use cadence_core::policy::ConfigEvent;
use cadence_core::refresh_rate::RefreshRate;

/// Receives the scheduler's decisions.
///
/// Called without any scheduler lock held, so implementations may call back
/// into the [`Scheduler`](crate::Scheduler).
pub trait SchedulerCallback: Send + Sync {
    /// The display should switch to `rate`. `event` tells whether the switch
    /// is content driven and needs a full repaint.
    fn on_refresh_rate_changed(&self, rate: &RefreshRate, event: ConfigEvent);

    /// A hardware period change still owes a refresh; repaint everything.
    fn on_repaint_needed(&self);
}

/// Switches the hardware vsync interrupt.
///
/// Called with the hardware-vsync lock held. Implementations must not call
/// back into the scheduler.
pub trait VsyncControl: Send + Sync {
    /// Enables or disables hardware vsync callbacks.
    fn set_vsync_enabled(&self, enabled: bool);
}
