// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-consumer vsync wakeup scheduling.
//!
//! Each registered consumer asks to be woken `work_duration` before a
//! future vsync. [`DispatchQueue`] keeps one armed wakeup per consumer and a
//! single intended timer wakeup (the earliest armed one). When the timer
//! fires, every consumer due within the timer slack is dispatched together.
//!
//! The queue is pure bookkeeping: the caller owns the timer and the clock,
//! passes `now` in, and delivers the returned [`Invocation`]s.
//!
//! A consumer is never dispatched twice for the same vsync. A schedule
//! request that would land on an already dispatched vsync is refused with
//! [`ScheduleResult::CannotSchedule`].

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use super::VsyncTracker;
use crate::time::{Duration, HostTime};

/// Handle of a registered consumer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatchToken(pub u64);

impl fmt::Debug for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatchToken({})", self.0)
    }
}

/// Outcome of [`DispatchQueue::schedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleResult {
    /// The consumer was idle and is now armed.
    Scheduled,
    /// The consumer was already armed; its wakeup moved.
    ReScheduled,
    /// The target vsync was already dispatched to this consumer.
    CannotSchedule,
    /// Unknown token.
    Error,
}

/// Outcome of [`DispatchQueue::cancel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelResult {
    /// The armed wakeup was removed.
    Cancelled,
    /// Nothing was armed; the wakeup already fired or was never set.
    TooLate,
    /// Unknown token.
    Error,
}

/// Errors from token-addressed operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// The token is not registered.
    UnknownToken(DispatchToken),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownToken(token) => write!(f, "unknown dispatch token {}", token.0),
        }
    }
}

impl core::error::Error for DispatchError {}

/// A consumer that is due.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Who to wake.
    pub token: DispatchToken,
    /// The vsync the wakeup targets.
    pub vsync: HostTime,
    /// When the wakeup was meant to happen.
    pub wakeup: HostTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Armed {
    wakeup: HostTime,
    vsync: HostTime,
}

#[derive(Clone, Debug)]
struct Entry {
    name: String,
    work_duration: Duration,
    earliest_vsync: HostTime,
    armed: Option<Armed>,
    last_dispatch: Option<HostTime>,
}

impl Entry {
    fn target(&self, tracker: &(impl VsyncTracker + ?Sized), now: HostTime) -> Armed {
        let from = (now + self.work_duration).max(self.earliest_vsync);
        let vsync = tracker.next_anticipated_vsync_from(from);
        Armed {
            wakeup: vsync - self.work_duration,
            vsync,
        }
    }

    fn update(&mut self, tracker: &(impl VsyncTracker + ?Sized), now: HostTime) {
        if self.armed.is_some() {
            self.armed = Some(self.target(tracker, now));
        }
    }
}

/// Wakeup bookkeeping for many vsync consumers.
#[derive(Clone, Debug)]
pub struct DispatchQueue {
    entries: BTreeMap<DispatchToken, Entry>,
    next_token: u64,
    intended_wakeup: Option<HostTime>,
    timer_slack: Duration,
}

impl DispatchQueue {
    /// Creates an empty queue. Wakeups within `timer_slack` of the timer are
    /// dispatched together.
    #[must_use]
    pub fn new(timer_slack: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_token: 0,
            intended_wakeup: None,
            timer_slack,
        }
    }

    /// Registers a consumer. It starts unarmed.
    pub fn register(&mut self, name: impl Into<String>) -> DispatchToken {
        self.next_token += 1;
        let token = DispatchToken(self.next_token);
        self.entries.insert(
            token,
            Entry {
                name: name.into(),
                work_duration: Duration::ZERO,
                earliest_vsync: HostTime(i64::MIN),
                armed: None,
                last_dispatch: None,
            },
        );
        token
    }

    /// Removes a consumer. Other consumers' wakeups are not touched.
    pub fn unregister(&mut self, token: DispatchToken) -> Result<(), DispatchError> {
        self.entries
            .remove(&token)
            .map(|_| ())
            .ok_or(DispatchError::UnknownToken(token))
    }

    /// Returns `true` if `token` is registered.
    #[must_use]
    pub fn contains(&self, token: DispatchToken) -> bool {
        self.entries.contains_key(&token)
    }

    /// Returns the consumer's name.
    #[must_use]
    pub fn name(&self, token: DispatchToken) -> Option<&str> {
        self.entries.get(&token).map(|e| e.name.as_str())
    }

    /// Arms `token` to wake `work_duration` before the first vsync after
    /// `max(earliest_vsync, now + work_duration)`.
    ///
    /// A negative `work_duration` wakes the consumer after the vsync.
    pub fn schedule(
        &mut self,
        token: DispatchToken,
        work_duration: Duration,
        earliest_vsync: HostTime,
        tracker: &(impl VsyncTracker + ?Sized),
        now: HostTime,
    ) -> ScheduleResult {
        let Some(entry) = self.entries.get_mut(&token) else {
            return ScheduleResult::Error;
        };

        let from = (now + work_duration).max(earliest_vsync);
        let vsync = tracker.next_anticipated_vsync_from(from);
        if entry.last_dispatch.is_some_and(|last| last >= vsync) {
            return ScheduleResult::CannotSchedule;
        }

        let result = if entry.armed.is_some() {
            ScheduleResult::ReScheduled
        } else {
            ScheduleResult::Scheduled
        };
        entry.work_duration = work_duration;
        entry.earliest_vsync = earliest_vsync;
        let wakeup = vsync - work_duration;
        entry.armed = Some(Armed { wakeup, vsync });

        let due_before_timer = self
            .intended_wakeup
            .is_none_or(|intended| wakeup < intended - self.timer_slack);
        if due_before_timer {
            self.rearm(tracker, now, Some(token));
        }
        result
    }

    /// Disarms `token`.
    pub fn cancel(
        &mut self,
        token: DispatchToken,
        tracker: &(impl VsyncTracker + ?Sized),
        now: HostTime,
    ) -> CancelResult {
        let Some(entry) = self.entries.get_mut(&token) else {
            return CancelResult::Error;
        };
        if entry.armed.take().is_none() {
            return CancelResult::TooLate;
        }
        self.intended_wakeup = None;
        self.rearm(tracker, now, None);
        CancelResult::Cancelled
    }

    /// Returns the consumer's armed wakeup.
    #[must_use]
    pub fn wakeup_time(&self, token: DispatchToken) -> Option<HostTime> {
        self.entries.get(&token)?.armed.map(|a| a.wakeup)
    }

    /// Returns the vsync the consumer is armed for.
    #[must_use]
    pub fn armed_vsync(&self, token: DispatchToken) -> Option<HostTime> {
        self.entries.get(&token)?.armed.map(|a| a.vsync)
    }

    /// Returns the last vsync dispatched to the consumer.
    #[must_use]
    pub fn last_dispatched(&self, token: DispatchToken) -> Option<HostTime> {
        self.entries.get(&token)?.last_dispatch
    }

    /// Returns when the timer should fire next, if anything is armed.
    #[must_use]
    pub const fn intended_wakeup(&self) -> Option<HostTime> {
        self.intended_wakeup
    }

    /// Handles the timer firing at `now`.
    ///
    /// Every consumer whose wakeup falls before the intended wakeup plus the
    /// slack is dispatched and disarmed. The timer is then rearmed for the
    /// remaining consumers.
    pub fn on_timer(
        &mut self,
        tracker: &(impl VsyncTracker + ?Sized),
        now: HostTime,
    ) -> Vec<Invocation> {
        let Some(intended) = self.intended_wakeup else {
            return Vec::new();
        };
        let cutoff = intended + self.timer_slack;

        let mut invocations = Vec::new();
        for (&token, entry) in &mut self.entries {
            let Some(armed) = entry.armed else {
                continue;
            };
            if armed.wakeup < cutoff {
                entry.last_dispatch = Some(armed.vsync);
                entry.armed = None;
                invocations.push(Invocation {
                    token,
                    vsync: armed.vsync,
                    wakeup: armed.wakeup,
                });
            }
        }

        self.intended_wakeup = None;
        self.rearm(tracker, now, None);
        invocations
    }

    /// Refreshes armed entries against the tracker and moves the timer to
    /// the earliest wakeup.
    fn rearm(
        &mut self,
        tracker: &(impl VsyncTracker + ?Sized),
        now: HostTime,
        skip_update: Option<DispatchToken>,
    ) {
        let mut min: Option<HostTime> = None;
        for (&token, entry) in &mut self.entries {
            if entry.armed.is_none() {
                continue;
            }
            if Some(token) != skip_update {
                entry.update(tracker, now);
            }
            if let Some(armed) = entry.armed {
                min = Some(min.map_or(armed.wakeup, |m| m.min(armed.wakeup)));
            }
        }
        self.intended_wakeup = match (min, self.intended_wakeup) {
            (Some(m), Some(intended)) if m >= intended => None,
            (m, _) => m,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vsync::FixedVsync;

    const PERIOD: i64 = 1000;

    fn tracker() -> FixedVsync {
        FixedVsync {
            anchor: HostTime(0),
            period: Duration(PERIOD),
        }
    }

    fn queue() -> DispatchQueue {
        DispatchQueue::new(Duration(50))
    }

    #[test]
    fn schedule_arms_before_vsync() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        let result = q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100));
        assert_eq!(result, ScheduleResult::Scheduled);
        assert_eq!(q.armed_vsync(a), Some(HostTime(1000)));
        assert_eq!(q.wakeup_time(a), Some(HostTime(700)));
        assert_eq!(q.intended_wakeup(), Some(HostTime(700)));
    }

    #[test]
    fn work_longer_than_remaining_time_targets_later_vsync() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        q.schedule(a, Duration(300), HostTime(0), &t, HostTime(800));
        assert_eq!(q.armed_vsync(a), Some(HostTime(2000)));
    }

    #[test]
    fn reschedule_reports_rescheduled() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100));
        let result = q.schedule(a, Duration(100), HostTime(0), &t, HostTime(100));
        assert_eq!(result, ScheduleResult::ReScheduled);
        assert_eq!(q.wakeup_time(a), Some(HostTime(900)));
    }

    #[test]
    fn timer_dispatches_due_entries_and_rearms() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        let b = q.register("b");
        q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100));
        q.schedule(b, Duration(280), HostTime(0), &t, HostTime(100));
        q.schedule(b, Duration(100), HostTime(0), &t, HostTime(100));

        let fired = q.on_timer(&t, HostTime(700));
        assert_eq!(fired.len(), 1, "{fired:?}");
        assert_eq!(fired[0].token, a);
        assert_eq!(fired[0].vsync, HostTime(1000));
        assert_eq!(q.wakeup_time(a), None);
        assert_eq!(q.intended_wakeup(), Some(HostTime(900)));

        let fired = q.on_timer(&t, HostTime(900));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].token, b);
        assert_eq!(q.intended_wakeup(), None);
    }

    #[test]
    fn slack_coalesces_nearby_wakeups() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        let b = q.register("b");
        q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100));
        q.schedule(b, Duration(270), HostTime(0), &t, HostTime(100));
        let fired = q.on_timer(&t, HostTime(700));
        assert_eq!(fired.len(), 2, "wakeups 30ns apart share one timer");
    }

    #[test]
    fn never_dispatches_the_same_vsync_twice() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100));
        let fired = q.on_timer(&t, HostTime(700));
        assert_eq!(fired[0].vsync, HostTime(1000));

        // Woken early: the same vsync is still ahead.
        let again = q.schedule(a, Duration(300), HostTime(0), &t, HostTime(650));
        assert_eq!(again, ScheduleResult::CannotSchedule);
        let next = q.schedule(a, Duration(300), HostTime(1001), &t, HostTime(650));
        assert_eq!(next, ScheduleResult::Scheduled);
        assert_eq!(q.armed_vsync(a), Some(HostTime(2000)));
    }

    #[test]
    fn negative_work_duration_wakes_after_vsync() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("late");
        q.schedule(a, Duration(-200), HostTime(i64::MIN), &t, HostTime(100));
        assert_eq!(q.armed_vsync(a), Some(HostTime(0)));
        assert_eq!(q.wakeup_time(a), Some(HostTime(200)));
    }

    #[test]
    fn cancel_and_unknown_tokens() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        assert_eq!(q.cancel(a, &t, HostTime(0)), CancelResult::TooLate);
        q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100));
        assert_eq!(q.cancel(a, &t, HostTime(100)), CancelResult::Cancelled);
        assert_eq!(q.intended_wakeup(), None);

        q.unregister(a).unwrap();
        assert_eq!(q.unregister(a), Err(DispatchError::UnknownToken(a)));
        assert_eq!(
            q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100)),
            ScheduleResult::Error
        );
        assert_eq!(q.cancel(a, &t, HostTime(100)), CancelResult::Error);
    }

    #[test]
    fn unregistering_one_consumer_leaves_others_untouched() {
        let mut q = queue();
        let t = tracker();
        let a = q.register("a");
        let b = q.register("b");
        q.schedule(a, Duration(300), HostTime(0), &t, HostTime(100));
        q.schedule(b, Duration(-100), HostTime(0), &t, HostTime(100));
        let before = q.wakeup_time(b);
        q.unregister(a).unwrap();
        assert_eq!(q.wakeup_time(b), before);
    }
}
