// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fans phased vsync pulses out to independent consumer channels.
//!
//! Each channel wakes `phase_offset` after every modeled vsync. Delivery
//! goes through a one-slot channel: if the consumer has not taken the
//! previous pulse, the new one is dropped and counted, never queued.
//!
//! All channels share one [`DispatchQueue`] and read the shared
//! [`VsyncTimeline`]. Destroying one channel never moves another channel's
//! wakeup. Re-phasing cancels through the queue, which recomputes every
//! other armed wakeup from now: a wakeup still ahead stays put, but one
//! already overdue moves to its next vsync.
//!
//! Lock order: distributor state, then timeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};

use cadence_core::time::{Duration, HostTime};
use cadence_core::trace::{ChannelDispatchEvent, TraceSink, Tracer};
use cadence_core::vsync::{
    CancelResult, DispatchQueue, DispatchToken, ScheduleResult, VsyncTimeline,
};
use parking_lot::{Condvar, Mutex};

use crate::clock::{Clock, to_std};
use crate::error::SchedulerError;

/// Handle of a distributor channel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelHandle(pub u64);

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelHandle({})", self.0)
    }
}

/// One vsync pulse as seen by a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncPulse {
    /// The vsync the pulse belongs to.
    pub vsync: HostTime,
    /// When the pulse was due.
    pub wakeup: HostTime,
    /// Pulses delivered to this channel so far, including this one.
    pub count: u64,
}

/// Consumer side of a channel.
#[derive(Debug)]
pub struct VsyncReceiver {
    rx: Receiver<VsyncPulse>,
}

impl VsyncReceiver {
    /// Blocks until the next pulse. Fails once the channel is destroyed.
    pub fn recv(&self) -> Result<VsyncPulse, mpsc::RecvError> {
        self.rx.recv()
    }

    /// Takes a waiting pulse, if any.
    pub fn try_recv(&self) -> Result<VsyncPulse, TryRecvError> {
        self.rx.try_recv()
    }

    /// Waits up to `timeout` for a pulse.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Result<VsyncPulse, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Delivery counters of one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Pulses handed to the consumer.
    pub delivered: u64,
    /// Pulses dropped because the consumer was behind.
    pub dropped: u64,
}

#[derive(Debug)]
struct Channel {
    token: DispatchToken,
    phase_offset: Duration,
    sender: SyncSender<VsyncPulse>,
    stats: ChannelStats,
}

struct State {
    queue: DispatchQueue,
    channels: BTreeMap<ChannelHandle, Channel>,
    screen_on: bool,
    stop: bool,
    sink: Option<Box<dyn TraceSink + Send>>,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    timeline: Arc<Mutex<VsyncTimeline>>,
    clock: Arc<dyn Clock>,
}

/// Per-consumer phased vsync delivery.
pub struct VsyncDistributor {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for VsyncDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VsyncDistributor")
            .field("running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl VsyncDistributor {
    /// Creates a distributor over `timeline`. Wakeups within `timer_slack`
    /// of each other are delivered together. Nothing is delivered until
    /// [`start`](Self::start) runs the worker or the caller drives
    /// [`dispatch_due`](Self::dispatch_due).
    #[must_use]
    pub fn new(
        timeline: Arc<Mutex<VsyncTimeline>>,
        clock: Arc<dyn Clock>,
        timer_slack: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: DispatchQueue::new(timer_slack),
                    channels: BTreeMap::new(),
                    screen_on: true,
                    stop: false,
                    sink: None,
                }),
                wake: Condvar::new(),
                timeline,
                clock,
            }),
            worker: None,
        }
    }

    /// Routes channel dispatch events to `sink`.
    pub fn set_trace_sink(&self, sink: Box<dyn TraceSink + Send>) {
        self.shared.state.lock().sink = Some(sink);
    }

    /// Creates a channel woken `phase_offset` after every vsync.
    pub fn create_channel(
        &self,
        name: &str,
        phase_offset: Duration,
    ) -> (ChannelHandle, VsyncReceiver) {
        let (sender, rx) = mpsc::sync_channel(1);
        let mut state = self.shared.state.lock();
        let token = state.queue.register(name);
        let handle = ChannelHandle(token.0);
        state.channels.insert(
            handle,
            Channel {
                token,
                phase_offset,
                sender,
                stats: ChannelStats::default(),
            },
        );
        if state.screen_on {
            self.arm(&mut state, handle, HostTime(i64::MIN));
        }
        tracing::debug!(channel = handle.0, name, offset_ns = phase_offset.nanos(), "channel created");
        (handle, VsyncReceiver { rx })
    }

    /// Destroys a channel. Its receiver sees a disconnect.
    pub fn destroy_channel(&self, handle: ChannelHandle) -> Result<(), SchedulerError> {
        let mut state = self.shared.state.lock();
        let Some(channel) = state.channels.remove(&handle) else {
            tracing::error!(channel = handle.0, "destroy of unknown channel");
            return Err(SchedulerError::InvalidHandle(handle.0));
        };
        let _ = state.queue.unregister(channel.token);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Moves a channel to a new phase offset.
    pub fn set_phase_offset(
        &self,
        handle: ChannelHandle,
        phase_offset: Duration,
    ) -> Result<(), SchedulerError> {
        let mut state = self.shared.state.lock();
        let Some(channel) = state.channels.get_mut(&handle) else {
            tracing::error!(channel = handle.0, "phase change for unknown channel");
            return Err(SchedulerError::InvalidHandle(handle.0));
        };
        channel.phase_offset = phase_offset;
        let token = channel.token;
        if state.screen_on {
            let timeline = self.shared.timeline.lock();
            let now = self.shared.clock.now();
            let _ = state.queue.cancel(token, &*timeline, now);
            drop(timeline);
            self.arm(&mut state, handle, HostTime(i64::MIN));
        }
        Ok(())
    }

    /// Resumes delivery on every channel.
    pub fn on_screen_acquired(&self) {
        let mut state = self.shared.state.lock();
        if state.screen_on {
            return;
        }
        state.screen_on = true;
        let handles: Vec<_> = state.channels.keys().copied().collect();
        for handle in handles {
            self.arm(&mut state, handle, HostTime(i64::MIN));
        }
        tracing::debug!("screen acquired, vsync delivery resumed");
    }

    /// Pauses delivery on every channel. Registrations are kept.
    pub fn on_screen_released(&self) {
        let mut state = self.shared.state.lock();
        if !state.screen_on {
            return;
        }
        state.screen_on = false;
        let timeline = self.shared.timeline.lock();
        let now = self.shared.clock.now();
        let tokens: Vec<_> = state.channels.values().map(|c| c.token).collect();
        for token in tokens {
            let result = state.queue.cancel(token, &*timeline, now);
            debug_assert_ne!(result, CancelResult::Error, "channel tokens stay registered");
        }
        tracing::debug!("screen released, vsync delivery paused");
    }

    /// Returns when `handle` is next due.
    ///
    /// An armed channel reports its armed wakeup; a paused one reports the
    /// first `vsync + phase_offset` after now.
    pub fn next_delivery(&self, handle: ChannelHandle) -> Result<HostTime, SchedulerError> {
        let state = self.shared.state.lock();
        let channel = state
            .channels
            .get(&handle)
            .ok_or(SchedulerError::InvalidHandle(handle.0))?;
        if let Some(wakeup) = state.queue.wakeup_time(channel.token) {
            return Ok(wakeup);
        }
        let now = self.shared.clock.now();
        let mut timeline = self.shared.timeline.lock();
        let offset = channel.phase_offset;
        Ok(timeline.compute_next_refresh(now, -offset) + offset)
    }

    /// Returns a channel's delivery counters.
    pub fn stats(&self, handle: ChannelHandle) -> Result<ChannelStats, SchedulerError> {
        self.shared
            .state
            .lock()
            .channels
            .get(&handle)
            .map(|c| c.stats)
            .ok_or(SchedulerError::InvalidHandle(handle.0))
    }

    /// Number of live channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.shared.state.lock().channels.len()
    }

    /// Returns when the next channel is due, if any is armed.
    #[must_use]
    pub fn next_wakeup(&self) -> Option<HostTime> {
        self.shared.state.lock().queue.intended_wakeup()
    }

    /// Delivers every pulse due at `now` and re-arms the delivered channels
    /// for the following vsync. Returns the number of pulses handed over.
    pub fn dispatch_due(&self, now: HostTime) -> usize {
        let mut state = self.shared.state.lock();
        dispatch_locked(&self.shared, &mut state, now)
    }

    /// Spawns the worker thread that sleeps until the next wakeup and
    /// delivers pulses. Does nothing if already running.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("vsync-distributor".into())
            .spawn(move || run(&shared))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn arm(&self, state: &mut State, handle: ChannelHandle, earliest_vsync: HostTime) {
        arm_locked(&self.shared, state, handle, earliest_vsync);
        self.shared.wake.notify_one();
    }
}

impl Drop for VsyncDistributor {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("vsync distributor thread panicked");
            }
        }
    }
}

fn arm_locked(shared: &Shared, state: &mut State, handle: ChannelHandle, earliest_vsync: HostTime) {
    let Some(channel) = state.channels.get(&handle) else {
        return;
    };
    let (token, work) = (channel.token, -channel.phase_offset);
    let timeline = shared.timeline.lock();
    let now = shared.clock.now();
    let mut result = state.queue.schedule(token, work, earliest_vsync, &*timeline, now);
    if result == ScheduleResult::CannotSchedule {
        let after = state
            .queue
            .last_dispatched(token)
            .map_or(earliest_vsync, |last| HostTime(last.nanos() + 1));
        result = state.queue.schedule(token, work, after, &*timeline, now);
    }
    if result == ScheduleResult::Error {
        tracing::error!(channel = handle.0, "failed to arm channel");
    }
}

fn dispatch_locked(shared: &Shared, state: &mut State, now: HostTime) -> usize {
    if state.queue.intended_wakeup().is_none_or(|wakeup| now < wakeup) {
        return 0;
    }
    let invocations = {
        let timeline = shared.timeline.lock();
        state.queue.on_timer(&*timeline, now)
    };

    let mut delivered = 0;
    let mut rearm = Vec::with_capacity(invocations.len());
    {
        let State {
            channels,
            sink,
            screen_on,
            ..
        } = &mut *state;
        let mut tracer = match sink.as_deref_mut() {
            Some(sink) => Tracer::new(sink),
            None => Tracer::none(),
        };
        for invocation in &invocations {
            let handle = ChannelHandle(invocation.token.0);
            let Some(channel) = channels.get_mut(&handle) else {
                continue;
            };
            let pulse = VsyncPulse {
                vsync: invocation.vsync,
                wakeup: invocation.wakeup,
                count: channel.stats.delivered + 1,
            };
            let sent = match channel.sender.try_send(pulse) {
                Ok(()) => {
                    channel.stats.delivered += 1;
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    channel.stats.dropped += 1;
                    tracing::trace!(
                        channel = handle.0,
                        vsync = invocation.vsync.nanos(),
                        "consumer behind, pulse dropped"
                    );
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            };
            tracer.channel_dispatch(&ChannelDispatchEvent {
                channel: handle.0,
                vsync: invocation.vsync,
                wakeup: invocation.wakeup,
                delivered: sent,
            });
            if *screen_on {
                rearm.push((handle, HostTime(invocation.vsync.nanos() + 1)));
            }
        }
    }

    for (handle, earliest) in rearm {
        arm_locked(shared, state, handle, earliest);
    }
    delivered
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.stop {
            return;
        }
        match state.queue.intended_wakeup() {
            None => shared.wake.wait(&mut state),
            Some(wakeup) => {
                let now = shared.clock.now();
                if now >= wakeup {
                    let _ = dispatch_locked(shared, &mut state, now);
                } else {
                    let _ = shared.wake.wait_for(&mut state, to_std(wakeup - now));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use cadence_core::vsync::TimelineConfig;

    const PERIOD: i64 = 16_000_000;

    fn anchored_timeline(period: Duration) -> Arc<Mutex<VsyncTimeline>> {
        let mut timeline = VsyncTimeline::new(period, TimelineConfig::default());
        let _ = timeline.add_resync_sample(HostTime(0));
        Arc::new(Mutex::new(timeline))
    }

    fn setup() -> (VsyncDistributor, ManualClock) {
        let clock = ManualClock::new(HostTime(2_000_000));
        let dist = VsyncDistributor::new(
            anchored_timeline(Duration(PERIOD)),
            Arc::new(clock.clone()),
            Duration::ZERO,
        );
        (dist, clock)
    }

    #[test]
    fn channel_wakes_after_vsync_by_its_offset() {
        let (dist, _clock) = setup();
        let (handle, _rx) = dist.create_channel("app", Duration(1_000_000));
        assert_eq!(dist.next_delivery(handle).unwrap(), HostTime(PERIOD + 1_000_000));
        assert_eq!(dist.next_wakeup(), Some(HostTime(PERIOD + 1_000_000)));
    }

    #[test]
    fn destroying_one_channel_keeps_the_other() {
        let (dist, _clock) = setup();
        let (a, _rx_a) = dist.create_channel("a", Duration(500_000));
        let (b, _rx_b) = dist.create_channel("b", Duration(3_000_000));
        let before = dist.next_delivery(b).unwrap();
        assert_eq!(before, HostTime(3_000_000), "vsync 0 plus offset is still ahead");

        dist.destroy_channel(a).unwrap();
        assert_eq!(dist.next_delivery(b).unwrap(), before, "b is unaffected");
        assert_eq!(dist.next_wakeup(), Some(before));
        assert_eq!(
            dist.destroy_channel(a),
            Err(SchedulerError::InvalidHandle(a.0)),
            "double destroy is rejected"
        );
        assert!(dist.next_delivery(a).is_err(), "destroyed handle is unknown");
        assert_eq!(dist.channel_count(), 1);
    }

    #[test]
    fn pulses_arrive_once_per_vsync() {
        let (dist, clock) = setup();
        let (handle, rx) = dist.create_channel("sf", Duration(1_000_000));

        clock.set(HostTime(PERIOD + 1_000_000));
        assert_eq!(dist.dispatch_due(clock.now()), 1);
        let pulse = rx.try_recv().unwrap();
        assert_eq!(pulse.vsync, HostTime(PERIOD));
        assert_eq!(pulse.count, 1);
        assert_eq!(dist.dispatch_due(clock.now()), 0, "same vsync never twice");

        assert_eq!(dist.next_delivery(handle).unwrap(), HostTime(2 * PERIOD + 1_000_000));
        clock.set(HostTime(2 * PERIOD + 1_000_000));
        assert_eq!(dist.dispatch_due(clock.now()), 1);
        let pulse = rx.try_recv().unwrap();
        assert_eq!(pulse.vsync, HostTime(2 * PERIOD));
        assert_eq!(pulse.count, 2);
    }

    #[test]
    fn slow_consumer_drops_instead_of_queueing() {
        let (dist, clock) = setup();
        let (handle, rx) = dist.create_channel("slow", Duration::ZERO);
        for n in 1..=3 {
            clock.set(HostTime(n * PERIOD));
            let _ = dist.dispatch_due(clock.now());
        }
        let stats = dist.stats(handle).unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(rx.try_recv().unwrap().vsync, HostTime(PERIOD), "oldest pulse kept");
        assert!(rx.try_recv().is_err(), "nothing queued behind it");
    }

    #[test]
    fn screen_release_pauses_without_destroying() {
        let (dist, clock) = setup();
        let (handle, rx) = dist.create_channel("app", Duration::ZERO);
        dist.on_screen_released();
        assert_eq!(dist.next_wakeup(), None);
        clock.set(HostTime(PERIOD));
        assert_eq!(dist.dispatch_due(clock.now()), 0);
        assert_eq!(dist.channel_count(), 1);

        dist.on_screen_acquired();
        assert_eq!(dist.next_delivery(handle).unwrap(), HostTime(2 * PERIOD));
        clock.set(HostTime(2 * PERIOD));
        assert_eq!(dist.dispatch_due(clock.now()), 1);
        assert!(rx.try_recv().is_ok(), "delivery resumed");
    }

    #[test]
    fn phase_change_moves_only_that_channel() {
        let (dist, _clock) = setup();
        let (a, _rx_a) = dist.create_channel("a", Duration(1_000_000));
        let (b, _rx_b) = dist.create_channel("b", Duration(2_500_000));
        assert_eq!(dist.next_delivery(a).unwrap(), HostTime(PERIOD + 1_000_000));
        let b_before = dist.next_delivery(b).unwrap();

        dist.set_phase_offset(a, Duration(4_000_000)).unwrap();
        assert_eq!(dist.next_delivery(a).unwrap(), HostTime(4_000_000));
        assert_eq!(dist.next_delivery(b).unwrap(), b_before);
        assert!(dist.set_phase_offset(ChannelHandle(99), Duration::ZERO).is_err());
    }

    #[test]
    fn rephasing_rearms_an_overdue_channel_but_destroy_does_not() {
        let (dist, clock) = setup();
        let (a, _rx_a) = dist.create_channel("a", Duration(1_000_000));
        let (b, _rx_b) = dist.create_channel("b", Duration(3_000_000));
        let (c, _rx_c) = dist.create_channel("c", Duration(2_500_000));
        assert_eq!(dist.next_delivery(b).unwrap(), HostTime(3_000_000));

        // b is overdue but the timer has not fired yet.
        clock.set(HostTime(4_000_000));
        dist.destroy_channel(c).unwrap();
        assert_eq!(dist.next_delivery(b).unwrap(), HostTime(3_000_000));

        dist.set_phase_offset(a, Duration(1_500_000)).unwrap();
        assert_eq!(dist.next_delivery(b).unwrap(), HostTime(PERIOD + 3_000_000));
    }

    #[test]
    fn worker_delivers_in_real_time() {
        let mut dist = VsyncDistributor::new(
            anchored_timeline(Duration::from_millis(5)),
            Arc::new(MonotonicClock::new()),
            Duration::from_micros(500),
        );
        let (_handle, rx) = dist.create_channel("live", Duration::ZERO);
        dist.start().unwrap();
        let wait = std::time::Duration::from_secs(5);
        let first = rx.recv_timeout(wait).unwrap();
        let second = rx.recv_timeout(wait).unwrap();
        assert!(second.vsync > first.vsync, "{second:?} after {first:?}");
    }
}
