// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic nanosecond time and refresh-rate conversions.
//!
//! [`HostTime`] represents a point on the host's monotonic clock in
//! nanoseconds. [`Duration`] is a signed span in the same unit, which lets
//! phase offsets point before a vsync as well as after it.
//!
//! Both are signed 64-bit values so vsync model arithmetic (regression
//! intercepts, ordinal math) can go negative without wrapping.

use core::fmt;
use core::ops::{Add, AddAssign, Neg, Sub};

/// Nanoseconds per second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Nanoseconds per millisecond.
pub const NANOS_PER_MILLI: i64 = 1_000_000;

/// A point in time on the monotonic host clock, in nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub i64);

impl HostTime {
    /// The earliest representable time.
    pub const ZERO: Self = Self(0);

    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Returns the duration between `self` and an earlier time, or zero if
    /// `earlier` is after `self`.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        let d = self.0.saturating_sub(earlier.0);
        if d < 0 { Duration::ZERO } else { Duration(d) }
    }

    /// Checked addition of a duration.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, duration: Duration) -> Option<Self> {
        match self.0.checked_add(duration.0) {
            Some(t) => Some(Self(t)),
            None => None,
        }
    }

    /// Saturating addition of a duration.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Duration) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sub for HostTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// A signed span of time in nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub i64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Creates a duration from milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms * NANOS_PER_MILLI)
    }

    /// Creates a duration from microseconds.
    #[inline]
    #[must_use]
    pub const fn from_micros(us: i64) -> Self {
        Self(us * 1_000)
    }

    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Returns the whole milliseconds in this duration.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0 / NANOS_PER_MILLI
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Converts this duration, read as a frame period, into frames per second.
    ///
    /// Returns `0.0` for non-positive periods.
    #[inline]
    #[must_use]
    pub fn to_fps(self) -> f32 {
        period_to_fps(self.0)
    }

    /// Converts a frame rate into the period of one frame.
    #[inline]
    #[must_use]
    pub fn from_fps(fps: f32) -> Self {
        Self(fps_to_period(fps))
    }
}

impl Add for Duration {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Duration {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Duration {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Duration {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({}ns)", self.0)
    }
}

/// Converts a vsync period in nanoseconds into frames per second.
///
/// Returns `0.0` for non-positive periods.
#[inline]
#[must_use]
pub fn period_to_fps(period_nanos: i64) -> f32 {
    if period_nanos <= 0 {
        return 0.0;
    }
    1e9_f32 / period_nanos as f32
}

/// Converts frames per second into a period in nanoseconds, rounded to the
/// nearest nanosecond.
///
/// Returns `0` for non-positive rates.
#[inline]
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "a positive fps yields a period well inside i64 range"
)]
pub fn fps_to_period(fps: f32) -> i64 {
    if fps <= 0.0 {
        return 0;
    }
    round_f64(1e9_f64 / f64::from(fps)) as i64
}

/// Rounds half away from zero without relying on `std`.
#[inline]
#[must_use]
pub(crate) fn round_f64(v: f64) -> f64 {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "values passed here are periods and frame rates, far inside i64 range"
    )]
    let t = v as i64 as f64;
    let frac = v - t;
    if frac >= 0.5 {
        t + 1.0
    } else if frac <= -0.5 {
        t - 1.0
    } else {
        t
    }
}

/// Rounds an `f32` to the nearest integer, half away from zero.
#[inline]
#[must_use]
pub(crate) fn round_f32(v: f32) -> f32 {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "rounded value came from an f32 and fits back into one"
    )]
    let r = round_f64(f64::from(v)) as f32;
    r
}

/// Absolute value of an `f32` without `std`.
#[inline]
#[must_use]
pub(crate) fn abs_f32(v: f32) -> f32 {
    if v < 0.0 { -v } else { v }
}
