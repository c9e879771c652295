// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-refresh-rate phase offsets for app and compositor wakeups.
//!
//! An offset is how long after a hardware vsync a consumer is woken. Apps
//! and the compositor get separate offsets, and each has an *early* and an
//! *early GL* variant used while a transaction or GPU composition needs more
//! headroom. Offsets at or above `threshold_for_next_vsync` target the vsync
//! after next.

use core::fmt::{self, Write};

use crate::time::Duration;

/// Rates above this use the high-fps offset set.
pub const HIGH_FPS_THRESHOLD: f32 = 65.0;

/// App and compositor offsets for one mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetPair {
    /// App wakeup offset.
    pub app: Duration,
    /// Compositor wakeup offset.
    pub sf: Duration,
}

/// The offsets used at one refresh rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Offsets {
    /// Offsets while a transaction is pending.
    pub early: OffsetPair,
    /// Offsets while GPU composition is in use.
    pub early_gl: OffsetPair,
    /// Steady-state offsets.
    pub late: OffsetPair,
    /// Offsets at or above this target the vsync after next.
    pub threshold_for_next_vsync: Duration,
}

/// Optional overrides for one offset set. Unset early values fall back to
/// the late values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OffsetOverrides {
    /// Late app offset.
    pub late_app: Option<Duration>,
    /// Late compositor offset.
    pub late_sf: Option<Duration>,
    /// Early app offset.
    pub early_app: Option<Duration>,
    /// Early compositor offset.
    pub early_sf: Option<Duration>,
    /// Early GL app offset.
    pub early_gl_app: Option<Duration>,
    /// Early GL compositor offset.
    pub early_gl_sf: Option<Duration>,
}

impl OffsetOverrides {
    fn resolve(&self, late_app: Duration, late_sf: Duration, threshold: Duration) -> Offsets {
        let late = OffsetPair {
            app: self.late_app.unwrap_or(late_app),
            sf: self.late_sf.unwrap_or(late_sf),
        };
        Offsets {
            early: OffsetPair {
                app: self.early_app.unwrap_or(late.app),
                sf: self.early_sf.unwrap_or(late.sf),
            },
            early_gl: OffsetPair {
                app: self.early_gl_app.unwrap_or(late.app),
                sf: self.early_gl_sf.unwrap_or(late.sf),
            },
            late,
            threshold_for_next_vsync: threshold,
        }
    }
}

/// Offsets for the current refresh rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseOffsets {
    default_offsets: Offsets,
    high_fps_offsets: Offsets,
    refresh_rate_fps: f32,
}

impl Default for PhaseOffsets {
    fn default() -> Self {
        Self::new(None, OffsetOverrides::default(), OffsetOverrides::default())
    }
}

impl PhaseOffsets {
    /// Builds the offset sets. Defaults are 1 ms for both app and compositor,
    /// and 2 ms app / 1 ms compositor above [`HIGH_FPS_THRESHOLD`].
    #[must_use]
    pub fn new(
        threshold_for_next_vsync: Option<Duration>,
        default_overrides: OffsetOverrides,
        high_fps_overrides: OffsetOverrides,
    ) -> Self {
        let threshold = threshold_for_next_vsync.unwrap_or(Duration(i64::MAX));
        let one_ms = Duration::from_millis(1);
        Self {
            default_offsets: default_overrides.resolve(one_ms, one_ms, threshold),
            high_fps_offsets: high_fps_overrides.resolve(Duration::from_millis(2), one_ms, threshold),
            refresh_rate_fps: 0.0,
        }
    }

    /// Returns the offsets used at `fps`.
    #[must_use]
    pub fn offsets_for_fps(&self, fps: f32) -> Offsets {
        if fps > HIGH_FPS_THRESHOLD {
            self.high_fps_offsets
        } else {
            self.default_offsets
        }
    }

    /// Records the refresh rate the display switched to.
    pub fn set_refresh_rate_fps(&mut self, fps: f32) {
        self.refresh_rate_fps = fps;
    }

    /// Returns the offsets for the current refresh rate.
    #[must_use]
    pub fn current(&self) -> Offsets {
        self.offsets_for_fps(self.refresh_rate_fps)
    }

    /// Steady-state app offset at the current rate.
    #[must_use]
    pub fn current_app_offset(&self) -> Duration {
        self.current().late.app
    }

    /// Steady-state compositor offset at the current rate.
    #[must_use]
    pub fn current_sf_offset(&self) -> Duration {
        self.current().late.sf
    }

    /// Writes the current offsets as text.
    pub fn dump(&self, out: &mut impl Write) -> fmt::Result {
        let Offsets {
            early,
            early_gl,
            late,
            threshold_for_next_vsync,
        } = self.current();
        writeln!(
            out,
            "           app phase: {:>9} ns\t         SF phase: {:>9} ns",
            late.app.nanos(),
            late.sf.nanos()
        )?;
        writeln!(
            out,
            "     early app phase: {:>9} ns\t   early SF phase: {:>9} ns",
            early.app.nanos(),
            early.sf.nanos()
        )?;
        writeln!(
            out,
            "  GL early app phase: {:>9} ns\tGL early SF phase: {:>9} ns",
            early_gl.app.nanos(),
            early_gl.sf.nanos()
        )?;
        writeln!(
            out,
            "next VSYNC threshold: {:>9} ns",
            threshold_for_next_vsync.nanos()
        )
    }
}
