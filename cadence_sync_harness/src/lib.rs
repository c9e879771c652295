// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic hardware-vsync simulation and prediction grading.
//!
//! [`VsyncGenerator`] produces a reproducible stream of hardware vsync
//! timestamps with optional pathologies (jitter, dropped pulses, glitches,
//! period drift, refresh-rate switches). [`PacingTracker`] scores how well a
//! vsync model predicts that stream and assigns a [`SyncGrade`].

#![no_std]

extern crate alloc;

use alloc::string::String;
use cadence_core::time::{Duration, HostTime};

/// Percent of a period a jittered sample may stray either way.
const JITTER_PERCENT: i64 = 3;
/// A glitched sample lands this far past its vsync.
const GLITCH_PERCENT: i64 = 40;
const DROP_ONE_IN: u64 = 8;
const GLITCH_ONE_IN: u64 = 16;
const DRIFT_NANOS_PER_TICK: i64 = 50;
/// Ticks between refresh-rate switches.
const VARY_INTERVAL: u64 = 240;

/// Runtime pathology toggles for stress tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathologyToggles {
    /// Reported timestamps stray from the ideal grid.
    pub jitter: bool,
    /// Some vsyncs are never reported.
    pub dropped_vsyncs: bool,
    /// Some reports land far off the grid and should be rejected.
    pub glitches: bool,
    /// The true period grows slowly every tick.
    pub period_drift: bool,
    /// The display alternates between its base rate and 1.5× that rate.
    pub vary_refresh: bool,
}

/// One simulated vsync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncTick {
    /// When the vsync really happened.
    pub ideal: HostTime,
    /// What hardware reported, or `None` if the pulse was lost.
    pub reported: Option<HostTime>,
    /// The true period leading up to this vsync.
    pub period: Duration,
    /// The display switched rates right before this vsync.
    pub period_changed: bool,
}

#[derive(Clone, Copy, Debug)]
struct XorShift(u64);

impl XorShift {
    const fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn one_in(&mut self, n: u64) -> bool {
        self.next_u64() % n == 0
    }

    /// Uniform in `[-amp, amp]`.
    fn symmetric(&mut self, amp: i64) -> i64 {
        if amp <= 0 {
            return 0;
        }
        let span = amp.unsigned_abs() * 2 + 1;
        (self.next_u64() % span) as i64 - amp
    }
}

/// Reproducible hardware vsync source.
#[derive(Clone, Debug)]
pub struct VsyncGenerator {
    base_period: Duration,
    high_rate: bool,
    drift: Duration,
    start: HostTime,
    last_ideal: Option<HostTime>,
    tick: u64,
    toggles: PathologyToggles,
    rng: XorShift,
}

impl VsyncGenerator {
    /// Creates a generator whose first vsync is at `start`.
    #[must_use]
    pub const fn new(period: Duration, start: HostTime, seed: u64) -> Self {
        Self {
            base_period: period,
            high_rate: false,
            drift: Duration::ZERO,
            start,
            last_ideal: None,
            tick: 0,
            toggles: PathologyToggles {
                jitter: false,
                dropped_vsyncs: false,
                glitches: false,
                period_drift: false,
                vary_refresh: false,
            },
            rng: XorShift::new(seed),
        }
    }

    /// Replaces the active pathologies.
    pub fn set_toggles(&mut self, toggles: PathologyToggles) {
        self.toggles = toggles;
    }

    /// Returns the active pathologies.
    #[must_use]
    pub const fn toggles(&self) -> PathologyToggles {
        self.toggles
    }

    /// Returns the true period of the next interval, ignoring pending switches.
    #[must_use]
    pub fn period(&self) -> Duration {
        let base = if self.high_rate {
            Duration(self.base_period.nanos() * 2 / 3)
        } else {
            self.base_period
        };
        base + self.drift
    }

    /// Produces the next vsync.
    pub fn next_tick(&mut self) -> VsyncTick {
        let mut period_changed = false;
        if self.toggles.vary_refresh && self.tick > 0 && self.tick % VARY_INTERVAL == 0 {
            self.high_rate = !self.high_rate;
            period_changed = true;
        }
        if self.toggles.period_drift {
            self.drift += Duration(DRIFT_NANOS_PER_TICK);
        }
        self.tick += 1;

        let period = self.period();
        // The first vsync is always reported cleanly so models get an anchor.
        let first = self.last_ideal.is_none();
        let ideal = self.last_ideal.map_or(self.start, |last| last + period);
        self.last_ideal = Some(ideal);

        let reported = if first {
            Some(ideal)
        } else if self.toggles.dropped_vsyncs && self.rng.one_in(DROP_ONE_IN) {
            None
        } else {
            let mut t = ideal;
            if self.toggles.jitter {
                t = t + Duration(self.rng.symmetric(period.nanos() * JITTER_PERCENT / 100));
            }
            if self.toggles.glitches && self.rng.one_in(GLITCH_ONE_IN) {
                t = t + Duration(period.nanos() * GLITCH_PERCENT / 100);
            }
            Some(t)
        };

        VsyncTick {
            ideal,
            reported,
            period,
            period_changed,
        }
    }
}

/// One prediction checked against what actually happened.
#[derive(Clone, Copy, Debug)]
pub struct PredictionSample {
    /// The model's predicted vsync.
    pub predicted: HostTime,
    /// The vsync it should have predicted.
    pub actual: HostTime,
    /// The true period at that vsync.
    pub period: Duration,
}

impl PredictionSample {
    /// Absolute prediction error as a percent of the period.
    #[must_use]
    pub fn error_percent(&self) -> f64 {
        let error = (self.actual - self.predicted).nanos().abs();
        error as f64 * 100.0 / self.period.nanos().max(1) as f64
    }

    /// The prediction is closer to a neighbouring vsync than to the right one.
    #[must_use]
    pub fn is_miss(&self) -> bool {
        (self.actual - self.predicted).nanos().abs() * 2 > self.period.nanos()
    }
}

/// Letter grade for prediction quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncGrade {
    /// Predictions within a couple of percent and almost no misses.
    A,
    /// Good predictions with rare misses.
    B,
    /// Degraded but usable.
    C,
    /// Poor predictions.
    D,
}

impl SyncGrade {
    /// Returns a short label for HUD rendering.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

/// Aggregated report returned by [`PacingTracker::observe`].
#[derive(Clone, Copy, Debug)]
pub struct PacingReport {
    /// Current grade.
    pub grade: SyncGrade,
    /// This prediction's error, in percent of a period.
    pub error_percent: f64,
    /// Mean error over the rolling window.
    pub mean_error_percent: f64,
    /// Misses per 1000 observed predictions.
    pub miss_rate_per_1000: f64,
    /// Total predictions observed.
    pub total: u64,
    /// Total misses observed.
    pub missed: u64,
}

/// Rolling prediction-quality tracker with a fixed-size error history.
#[derive(Debug)]
pub struct PacingTracker<const N: usize> {
    errors: [f64; N],
    cursor: usize,
    total: u64,
    missed: u64,
}

impl<const N: usize> Default for PacingTracker<N> {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl<const N: usize> PacingTracker<N> {
    /// Creates a tracker with `seed_error_percent` prefilled in the window.
    #[must_use]
    pub const fn new(seed_error_percent: f64) -> Self {
        Self {
            errors: [seed_error_percent; N],
            cursor: 0,
            total: 0,
            missed: 0,
        }
    }

    /// Observes one prediction and returns an updated report.
    pub fn observe(&mut self, sample: PredictionSample) -> PacingReport {
        let error = sample.error_percent();
        self.total = self.total.saturating_add(1);
        self.errors[self.cursor % N] = error;
        self.cursor = (self.cursor + 1) % N;

        if sample.is_miss() {
            self.missed = self.missed.saturating_add(1);
        }

        let miss_rate = self.missed as f64 * 1000.0 / self.total as f64;
        let mean = self.errors.iter().sum::<f64>() / N as f64;

        PacingReport {
            grade: grade_for(mean, miss_rate),
            error_percent: error,
            mean_error_percent: mean,
            miss_rate_per_1000: miss_rate,
            total: self.total,
            missed: self.missed,
        }
    }

    /// Returns the error window oldest→newest.
    #[must_use]
    pub fn errors(&self) -> [f64; N] {
        let mut out = [0.0; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.errors[(self.cursor + i) % N];
        }
        out
    }

    /// Returns an ASCII sparkline over [`errors()`](Self::errors).
    #[must_use]
    pub fn sparkline_ascii(&self, min_percent: f64, max_percent: f64) -> String {
        const LEVELS: &[u8] = b" .:-=+*#%@";
        self.errors()
            .iter()
            .map(|&e| {
                let t = (e.clamp(min_percent, max_percent) - min_percent)
                    / (max_percent - min_percent);
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "index is clamped to ASCII level count"
                )]
                let level = (t * (LEVELS.len() as f64 - 1.0) + 0.5) as usize;
                LEVELS[level] as char
            })
            .collect()
    }
}

fn grade_for(mean_error_percent: f64, miss_rate_per_1000: f64) -> SyncGrade {
    if mean_error_percent < 2.0 && miss_rate_per_1000 < 1.0 {
        SyncGrade::A
    } else if mean_error_percent < 5.0 && miss_rate_per_1000 < 5.0 {
        SyncGrade::B
    } else if mean_error_percent < 10.0 && miss_rate_per_1000 < 15.0 {
        SyncGrade::C
    } else {
        SyncGrade::D
    }
}
