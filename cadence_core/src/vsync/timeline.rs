// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The vsync timeline: hardware samples and present fences in, predictions
//! out.
//!
//! [`VsyncTimeline`] sits between the hardware and the
//! [`VsyncPredictor`]. Resync samples go straight into the fit. Present
//! fences may still be pending when they are handed over; those wait in a
//! bounded queue and are folded in once they signal. After every input the
//! timeline reports whether hardware vsync is still needed, which lets the
//! caller turn the (power-hungry) interrupt off once the model is locked.
//!
//! Predictions handed out through [`VsyncTimeline::compute_next_refresh`] are
//! remembered per offset. A refit that moves an already promised vsync
//! earlier by less than half a period keeps the promised time instead, so
//! repeated queries for one offset never go backwards.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicI64, Ordering};

use super::VsyncTracker;
use super::predictor::{VsyncModel, VsyncPredictor};
use crate::queue::BoundedQueue;
use crate::time::{Duration, HostTime};

const SIGNAL_TIME_PENDING: i64 = i64::MAX;
const SIGNAL_TIME_INVALID: i64 = -1;

/// Distinct offsets whose last prediction is remembered.
const PROMISE_LIMIT: usize = 16;

/// Observed state of a [`FenceTime`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    /// Not signaled yet.
    Pending,
    /// The fence will never signal usefully.
    Invalid,
    /// Signaled at the given time.
    Signaled(HostTime),
}

/// A shareable present fence whose signal time is filled in later.
///
/// Clones observe the same signal.
#[derive(Clone)]
pub struct FenceTime {
    signal: Arc<AtomicI64>,
}

impl FenceTime {
    /// A fence that has not signaled.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            signal: Arc::new(AtomicI64::new(SIGNAL_TIME_PENDING)),
        }
    }

    /// A fence that already signaled at `t`.
    #[must_use]
    pub fn signaled(t: HostTime) -> Self {
        Self {
            signal: Arc::new(AtomicI64::new(t.nanos())),
        }
    }

    /// A fence that will never carry a time.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            signal: Arc::new(AtomicI64::new(SIGNAL_TIME_INVALID)),
        }
    }

    /// Marks the fence signaled at `t`.
    pub fn signal(&self, t: HostTime) {
        self.signal.store(t.nanos(), Ordering::Release);
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> FenceState {
        match self.signal.load(Ordering::Acquire) {
            SIGNAL_TIME_PENDING => FenceState::Pending,
            t if t < 0 => FenceState::Invalid,
            t => FenceState::Signaled(HostTime(t)),
        }
    }
}

impl fmt::Debug for FenceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FenceTime").field(&self.state()).finish()
    }
}

/// Tunables for [`VsyncTimeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineConfig {
    /// Samples kept in the regression.
    pub history_size: usize,
    /// Samples needed before the fit replaces the ideal period.
    pub min_samples: usize,
    /// Allowed phase error of a new sample, as a percent of the period.
    pub outlier_tolerance_percent: u32,
    /// Pending present fences kept before the oldest is dropped.
    pub pending_fence_limit: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            history_size: 20,
            min_samples: 6,
            outlier_tolerance_percent: 25,
            pending_fence_limit: 20,
        }
    }
}

/// Result of feeding one hardware vsync sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResyncOutcome {
    /// The model still wants hardware vsync samples.
    pub needs_hw_vsync: bool,
    /// A period change was pending and has now been flushed.
    pub period_flushed: bool,
    /// Whether the sample made it into the fit.
    pub accepted: bool,
}

/// Software model of the hardware vsync signal.
#[derive(Debug)]
pub struct VsyncTimeline {
    predictor: VsyncPredictor,
    unfired: BoundedQueue<FenceTime>,
    ignore_present_fences: bool,
    period_change_in_progress: bool,
    /// Last vsync handed out, keyed by offset in nanoseconds.
    promised: BTreeMap<i64, HostTime>,
}

impl VsyncTimeline {
    /// Creates a timeline expecting `period` until samples arrive.
    #[must_use]
    pub fn new(period: Duration, config: TimelineConfig) -> Self {
        Self {
            predictor: VsyncPredictor::new(
                period,
                config.history_size,
                config.min_samples,
                config.outlier_tolerance_percent,
            ),
            unfired: BoundedQueue::with_capacity(config.pending_fence_limit),
            ignore_present_fences: false,
            period_change_in_progress: false,
            promised: BTreeMap::new(),
        }
    }

    /// Feeds a hardware vsync timestamp.
    pub fn add_resync_sample(&mut self, timestamp: HostTime) -> ResyncOutcome {
        let accepted = self.predictor.add_vsync_timestamp(timestamp).is_ok();
        let period_flushed = core::mem::take(&mut self.period_change_in_progress);
        ResyncOutcome {
            needs_hw_vsync: self.predictor.needs_more_samples(timestamp),
            period_flushed,
            accepted,
        }
    }

    /// Feeds a present fence. Returns `true` if hardware vsync should be
    /// enabled.
    pub fn add_present_fence(&mut self, fence: &FenceTime, now: HostTime) -> bool {
        let state = fence.state();
        if state == FenceState::Invalid || self.ignore_present_fences {
            return true;
        }

        let predictor = &mut self.predictor;
        self.unfired.retain(|pending| match pending.state() {
            FenceState::Pending => true,
            FenceState::Invalid => false,
            FenceState::Signaled(t) => {
                let _ = predictor.add_vsync_timestamp(t);
                false
            }
        });

        match state {
            FenceState::Pending => self.unfired.push(fence.clone()),
            FenceState::Signaled(t) => {
                let _ = self.predictor.add_vsync_timestamp(t);
            }
            FenceState::Invalid => {}
        }
        self.predictor.needs_more_samples(now)
    }

    /// Stops using present fences; pending ones are discarded.
    pub fn set_ignore_present_fences(&mut self, ignore: bool) {
        self.ignore_present_fences = ignore;
        if ignore {
            self.unfired.clear();
        }
    }

    /// Returns `true` while present fences are being ignored.
    #[must_use]
    pub const fn ignoring_present_fences(&self) -> bool {
        self.ignore_present_fences
    }

    /// Returns the number of fences waiting to signal.
    #[must_use]
    pub fn pending_fence_count(&self) -> usize {
        self.unfired.len()
    }

    /// Returns how many pending fences were dropped for lack of room.
    #[must_use]
    pub fn dropped_fence_count(&self) -> u64 {
        self.unfired.dropped_count()
    }

    /// Predicts the first vsync after `now + offset`.
    ///
    /// For a given offset the result never goes below the previous one
    /// unless the query moved back by at least half a period.
    pub fn compute_next_refresh(&mut self, now: HostTime, offset: Duration) -> HostTime {
        let predicted = self.predictor.next_anticipated_vsync_from(now + offset);
        let half_period = Duration(self.predictor.current_period().nanos() / 2);
        let key = offset.nanos();
        let next = match self.promised.get(&key) {
            Some(&promised) if predicted < promised && promised - predicted < half_period => {
                promised
            }
            _ => predicted,
        };
        if self.promised.len() >= PROMISE_LIMIT && !self.promised.contains_key(&key) {
            self.promised.pop_first();
        }
        self.promised.insert(key, next);
        next
    }

    /// Predicts when a frame submitted now will be presented.
    pub fn expected_present_time(&mut self, now: HostTime) -> HostTime {
        self.compute_next_refresh(now, Duration::ZERO)
    }

    /// Switches to a new period. Already computed predictions are untouched;
    /// the next resync sample reports the period as flushed.
    pub fn set_period(&mut self, period: Duration) {
        self.predictor.set_period(period);
        self.period_change_in_progress = true;
    }

    /// Returns the modeled period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.predictor.current_period()
    }

    /// Returns the current fit.
    #[must_use]
    pub fn model(&self) -> VsyncModel {
        self.predictor.model()
    }

    /// Returns `true` if the model is not trustworthy at `now`.
    #[must_use]
    pub fn needs_more_samples(&self, now: HostTime) -> bool {
        self.predictor.needs_more_samples(now)
    }
}

impl VsyncTracker for VsyncTimeline {
    fn next_anticipated_vsync_from(&self, time_point: HostTime) -> HostTime {
        self.predictor.next_anticipated_vsync_from(time_point)
    }

    fn current_period(&self) -> Duration {
        self.predictor.current_period()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: i64 = 16_666_667;

    fn timeline() -> VsyncTimeline {
        VsyncTimeline::new(Duration(PERIOD), TimelineConfig::default())
    }

    #[test]
    fn resync_needs_vsync_until_locked() {
        let mut tl = timeline();
        let mut outcomes = alloc::vec::Vec::new();
        for i in 1..=8 {
            outcomes.push(tl.add_resync_sample(HostTime(i * PERIOD)));
        }
        assert!(outcomes[..5].iter().all(|o| o.needs_hw_vsync), "{outcomes:?}");
        assert!(!outcomes[7].needs_hw_vsync, "locked after enough samples");
        assert!(outcomes.iter().all(|o| o.accepted && !o.period_flushed));
    }

    #[test]
    fn period_change_is_flushed_once() {
        let mut tl = timeline();
        tl.add_resync_sample(HostTime(PERIOD));
        tl.set_period(Duration(11_111_111));
        assert!(tl.add_resync_sample(HostTime(PERIOD + 11_111_111)).period_flushed);
        assert!(!tl.add_resync_sample(HostTime(PERIOD + 22_222_222)).period_flushed);
    }

    #[test]
    fn out_of_order_sample_is_dropped_without_disturbing_model() {
        let mut tl = timeline();
        for i in 1..=8 {
            tl.add_resync_sample(HostTime(i * PERIOD));
        }
        let before = tl.model();
        let outcome = tl.add_resync_sample(HostTime(3 * PERIOD));
        assert!(!outcome.accepted);
        assert_eq!(tl.model(), before);
    }

    #[test]
    fn invalid_fence_requests_vsync() {
        let mut tl = timeline();
        assert!(tl.add_present_fence(&FenceTime::invalid(), HostTime(0)));
    }

    #[test]
    fn ignored_fences_request_vsync_and_clear_pending() {
        let mut tl = timeline();
        tl.add_present_fence(&FenceTime::pending(), HostTime(0));
        assert_eq!(tl.pending_fence_count(), 1);
        tl.set_ignore_present_fences(true);
        assert_eq!(tl.pending_fence_count(), 0);
        assert!(tl.add_present_fence(&FenceTime::signaled(HostTime(PERIOD)), HostTime(PERIOD)));
        assert_eq!(tl.pending_fence_count(), 0);
    }

    #[test]
    fn pending_fences_fold_in_once_signaled() {
        let mut tl = timeline();
        let fences: alloc::vec::Vec<FenceTime> = (0..7).map(|_| FenceTime::pending()).collect();
        for fence in &fences {
            tl.add_present_fence(fence, HostTime(0));
        }
        assert_eq!(tl.pending_fence_count(), 7);
        for (i, fence) in (1..).zip(&fences) {
            fence.signal(HostTime(i * PERIOD));
        }
        let now = HostTime(8 * PERIOD);
        let needs = tl.add_present_fence(&FenceTime::signaled(now), now);
        assert_eq!(tl.pending_fence_count(), 0);
        assert!(!needs, "eight signaled fences lock the model");
    }

    #[test]
    fn pending_fence_queue_is_bounded() {
        let mut tl = VsyncTimeline::new(
            Duration(PERIOD),
            TimelineConfig {
                pending_fence_limit: 3,
                ..TimelineConfig::default()
            },
        );
        for _ in 0..5 {
            tl.add_present_fence(&FenceTime::pending(), HostTime(0));
        }
        assert_eq!(tl.pending_fence_count(), 3);
        assert_eq!(tl.dropped_fence_count(), 2);
    }

    #[test]
    fn next_refresh_honours_offset() {
        let mut tl = timeline();
        for i in 1..=8 {
            tl.add_resync_sample(HostTime(i * PERIOD));
        }
        let now = HostTime(8 * PERIOD + 1000);
        let plain = tl.compute_next_refresh(now, Duration::ZERO);
        let shifted = tl.compute_next_refresh(now, Duration(PERIOD));
        assert_eq!(plain, tl.expected_present_time(now));
        assert!((shifted.nanos() - plain.nanos() - PERIOD).abs() < 100);
    }

    /// Deterministic jitter within a tenth of a period either way.
    fn jitter(state: &mut u64) -> i64 {
        *state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let span = PERIOD / 5;
        i64::try_from(*state >> 33).unwrap() % (span + 1) - span / 2
    }

    /// Feeds jittered samples and checks that the next refresh computed at
    /// each accepted sample rises strictly for `offset`.
    fn assert_rising_under_jitter(offset: Duration) {
        for seed in 1..=8_u64 {
            let mut state = seed;
            let mut tl = timeline();
            let mut previous: Option<HostTime> = None;
            for step in 0..200 {
                let t = HostTime(1_000_000_000 + step * PERIOD + jitter(&mut state));
                if !tl.add_resync_sample(t).accepted {
                    continue;
                }
                let next = tl.compute_next_refresh(t, offset);
                assert!(next > t + offset, "seed {seed} step {step}: {next:?} not after query");
                if let Some(previous) = previous {
                    assert!(
                        next > previous,
                        "seed {seed} step {step}: {next:?} <= previous {previous:?}"
                    );
                }
                previous = Some(next);
            }
        }
    }

    #[test]
    fn next_refresh_rises_under_jitter() {
        assert_rising_under_jitter(Duration::ZERO);
    }

    #[test]
    fn offset_next_refresh_rises_under_jitter() {
        assert_rising_under_jitter(Duration(PERIOD / 4));
    }

    #[test]
    fn refit_never_pulls_a_promised_vsync_earlier() {
        let mut tl = timeline();
        for i in 1..=10 {
            tl.add_resync_sample(HostTime(i * PERIOD));
        }
        let offset = Duration(-PERIOD / 4);
        let promised = tl.compute_next_refresh(HostTime(11 * PERIOD), offset);
        assert!((promised.nanos() - 11 * PERIOD).abs() < 100, "{promised:?}");

        // An early sample drags the fitted phase back.
        let early = HostTime(11 * PERIOD - PERIOD / 10);
        assert!(tl.add_resync_sample(early).accepted);
        let raw = tl.predictor.next_anticipated_vsync_from(HostTime(11 * PERIOD) + offset);
        assert!(raw < promised, "fit moved {raw:?} vs {promised:?}");

        let again = tl.compute_next_refresh(HostTime(11 * PERIOD), offset);
        assert_eq!(again, promised);
    }

    #[test]
    fn promises_are_bounded() {
        let mut tl = timeline();
        for i in 0..40 {
            tl.compute_next_refresh(HostTime(0), Duration(i * 1000));
        }
        assert!(tl.promised.len() <= PROMISE_LIMIT);
    }

    #[test]
    fn fence_state_transitions() {
        let fence = FenceTime::pending();
        let observer = fence.clone();
        assert_eq!(observer.state(), FenceState::Pending);
        fence.signal(HostTime(42));
        assert_eq!(observer.state(), FenceState::Signaled(HostTime(42)));
        assert_eq!(FenceTime::invalid().state(), FenceState::Invalid);
    }
}
