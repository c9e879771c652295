// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The threaded refresh-rate scheduler.
//!
//! [`Scheduler`] owns the feature state, the idle/touch/display-power
//! timers, the content history and the hardware-vsync switch. Timer
//! transitions travel as [`TimerEvent`]s over one channel to a single event
//! thread, so every decision runs under the feature-state lock and the
//! [`SchedulerCallback`] fires after that lock is released.
//!
//! Lock order: features, then catalog. Hardware vsync, then timeline. The
//! trace sink is always taken last and alone.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cadence_core::display::DisplayContext;
use cadence_core::history::{ContentHistory, HistoryConfig, LayerKey, UnknownLayer};
use cadence_core::phase::{Offsets, PhaseOffsets};
use cadence_core::policy::{
    ConfigChange, FeatureState, TimerEvent, TimerKind, TimerState,
};
use cadence_core::refresh_rate::{ConfigId, DisplayConfig, RefreshRateCatalog};
use cadence_core::time::{Duration, HostTime};
use cadence_core::trace::{
    RefreshRateDecisionEvent, TimerTransitionEvent, TraceSink, Tracer, VsyncPredictionEvent,
    VsyncSampleEvent,
};
use cadence_core::vote::{LayerRequirement, LayerVoteType, VoteAggregator, VoteConfig};
use cadence_core::vsync::{FenceTime, TimelineConfig, VsyncTimeline};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::callback::{SchedulerCallback, VsyncControl};
use crate::clock::{Clock, to_std};
use crate::distributor::VsyncDistributor;
use crate::error::SchedulerError;
use crate::timer::OneShotTimer;

/// Resync requests closer together than this are ignored.
const RESYNC_DEBOUNCE: Duration = Duration::from_millis(750);

/// Furthest in the future a reported period change may claim to apply.
const MAX_VSYNC_APPLIED_TIME: Duration = Duration::from_millis(200);

/// With a kernel idle timer, hardware vsync is only managed above this rate.
const KERNEL_TIMER_FPS_THRESHOLD: f32 = 65.0;

/// Scheduler tunables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Idle timeout before dropping to the lowest allowed rate.
    pub idle_timer: Option<Duration>,
    /// How long a touch keeps the display at its highest allowed rate.
    pub touch_timer: Option<Duration>,
    /// Grace period at the highest rate after a display power change.
    pub display_power_timer: Option<Duration>,
    /// The idle timer lives in the display driver. Idle transitions then
    /// switch hardware vsync instead of changing the refresh rate.
    pub kernel_idle_timer: bool,
    /// Track layer frame timing to pick a rate for content.
    pub content_detection: bool,
    /// Allow the scheduler to change the refresh rate at all.
    pub refresh_rate_switching: bool,
    /// Wakeups closer than this are coalesced by vsync distributors.
    pub timer_slack: Duration,
    /// Vote aggregation tunables.
    pub vote: VoteConfig,
    /// Vsync model tunables.
    pub timeline: TimelineConfig,
    /// Content history tunables.
    pub history: HistoryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::desktop()
    }
}

impl SchedulerConfig {
    /// Battery-powered panel: all three timers and content detection on.
    #[must_use]
    pub fn mobile() -> Self {
        Self {
            idle_timer: Some(Duration::from_millis(80)),
            touch_timer: Some(Duration::from_millis(200)),
            display_power_timer: Some(Duration::from_millis(1000)),
            ..Self::desktop()
        }
    }

    /// Mains-powered display: no timers, content detection on.
    #[must_use]
    pub fn desktop() -> Self {
        Self {
            idle_timer: None,
            touch_timer: None,
            display_power_timer: None,
            kernel_idle_timer: false,
            content_detection: true,
            refresh_rate_switching: true,
            timer_slack: Duration::from_micros(500),
            vote: VoteConfig::default(),
            timeline: TimelineConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// How a layer's frame rate is bounded in the content history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LayerKind {
    /// Bounded by the slowest and fastest supported rates.
    #[default]
    Normal,
    /// Pinned to the slowest supported rate.
    Wallpaper,
}

/// A hardware report that a vsync period change is underway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncPeriodChangeTimeline {
    /// When the new period takes effect.
    pub new_vsync_applied_time: HostTime,
    /// Whether a frame must be presented for the change to complete.
    pub refresh_required: bool,
    /// Present after this time to satisfy `refresh_required`.
    pub refresh_time: HostTime,
}

/// Next vsync and the modeled period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayStatInfo {
    /// Next predicted vsync.
    pub vsync_time: HostTime,
    /// Modeled vsync period.
    pub vsync_period: Duration,
}

#[derive(Debug, Default)]
struct HwVsync {
    enabled: bool,
    available: bool,
}

struct Inner {
    config: SchedulerConfig,
    display: DisplayContext,
    votes: VoteAggregator,
    features: Mutex<FeatureState>,
    catalog: RwLock<RefreshRateCatalog>,
    history: Option<Mutex<ContentHistory>>,
    hw: Mutex<HwVsync>,
    timeline: Arc<Mutex<VsyncTimeline>>,
    phase: Mutex<PhaseOffsets>,
    period_change: Mutex<Option<VsyncPeriodChangeTimeline>>,
    last_resync: AtomicI64,
    callback: Arc<dyn SchedulerCallback>,
    vsync_control: Arc<dyn VsyncControl>,
    clock: Arc<dyn Clock>,
    sink: Mutex<Option<Box<dyn TraceSink + Send>>>,
}

/// Refresh-rate policy controller for one display.
pub struct Scheduler {
    inner: Arc<Inner>,
    idle_timer: Option<OneShotTimer>,
    touch_timer: Option<OneShotTimer>,
    display_power_timer: Option<OneShotTimer>,
    event_thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("display", &self.inner.display.name)
            .field("idle_timer", &self.idle_timer)
            .field("touch_timer", &self.touch_timer)
            .field("display_power_timer", &self.display_power_timer)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Builds the catalog from `configs`, starts the configured timers and
    /// their event thread.
    ///
    /// Hardware vsync starts disabled and unavailable; call
    /// [`resync_to_hardware_vsync`](Self::resync_to_hardware_vsync) with
    /// `make_available` once the display is on.
    pub fn new(
        config: SchedulerConfig,
        display: DisplayContext,
        configs: &[DisplayConfig],
        current: ConfigId,
        callback: Arc<dyn SchedulerCallback>,
        vsync_control: Arc<dyn VsyncControl>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        let catalog =
            RefreshRateCatalog::with_switching(configs, current, config.refresh_rate_switching)?;
        let current_rate = catalog.current();
        let timeline = VsyncTimeline::new(current_rate.vsync_period, config.timeline);
        let mut phase = PhaseOffsets::default();
        phase.set_refresh_rate_fps(current_rate.fps);
        let display_name = &display.name;
        tracing::debug!(
            display = %display_name,
            configs = configs.len(),
            current = %current_rate,
            "scheduler created"
        );

        let inner = Arc::new(Inner {
            config,
            display,
            votes: VoteAggregator::new(config.vote),
            features: Mutex::new(FeatureState::default()),
            catalog: RwLock::new(catalog),
            history: config
                .content_detection
                .then(|| Mutex::new(ContentHistory::new(config.history))),
            hw: Mutex::new(HwVsync::default()),
            timeline: Arc::new(Mutex::new(timeline)),
            phase: Mutex::new(phase),
            period_change: Mutex::new(None),
            last_resync: AtomicI64::new(i64::MIN),
            callback,
            vsync_control,
            clock,
            sink: Mutex::new(None),
        });

        let (tx, rx) = mpsc::channel();
        let timer = |name: &str, interval: Option<Duration>, kind: TimerKind| {
            let Some(interval) = interval.filter(|i| *i > Duration::ZERO) else {
                return Ok(None);
            };
            let reset_tx = tx.clone();
            let expired_tx = tx.clone();
            OneShotTimer::start(
                name,
                to_std(interval),
                move || {
                    let _ = reset_tx.send(TimerEvent::new(kind, TimerState::Reset));
                },
                move || {
                    let _ = expired_tx.send(TimerEvent::new(kind, TimerState::Expired));
                },
            )
            .map(Some)
        };
        let idle_timer = timer("idle", config.idle_timer, TimerKind::Idle)?;
        let touch_timer = timer("touch", config.touch_timer, TimerKind::Touch)?;
        let display_power_timer =
            timer("display-power", config.display_power_timer, TimerKind::DisplayPower)?;
        drop(tx);

        let mut scheduler = Self {
            inner,
            idle_timer,
            touch_timer,
            display_power_timer,
            event_thread: None,
        };
        let has_timers = scheduler.idle_timer.is_some()
            || scheduler.touch_timer.is_some()
            || scheduler.display_power_timer.is_some();
        if has_timers {
            let inner = Arc::clone(&scheduler.inner);
            scheduler.event_thread = Some(
                thread::Builder::new()
                    .name("scheduler-events".into())
                    .spawn(move || {
                        for event in rx {
                            inner.handle_timer_event(event);
                        }
                    })?,
            );
        }
        Ok(scheduler)
    }

    /// Returns the display this scheduler drives.
    #[must_use]
    pub fn display(&self) -> &DisplayContext {
        &self.inner.display
    }

    /// Routes decision, timer and vsync events to `sink`.
    pub fn set_trace_sink(&self, sink: Box<dyn TraceSink + Send>) {
        *self.inner.sink.lock() = Some(sink);
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Applies a timer transition as if the timer thread had reported it.
    pub fn handle_timer_event(&self, event: TimerEvent) {
        self.inner.handle_timer_event(event);
    }

    /// Restarts the idle countdown. Call on every new frame.
    pub fn reset_idle_timer(&self) {
        if let Some(timer) = &self.idle_timer {
            timer.reset();
        }
    }

    /// Boosts to the highest allowed rate for the touch interval.
    ///
    /// Also clears the content history so the next content decision is not
    /// biased by frames from before the interaction.
    pub fn notify_touch_event(&self) {
        if let Some(timer) = &self.touch_timer {
            timer.reset();
        }
        if self.inner.config.kernel_idle_timer {
            self.reset_idle_timer();
        }
        self.inner.clear_history();
    }

    /// Records the display power state and starts the power grace period.
    pub fn set_display_power_state(&self, normal: bool) {
        let change = {
            let mut features = self.inner.features.lock();
            let catalog = self.inner.catalog.read();
            features.set_display_power_normal(normal, &catalog, &self.inner.votes)
        };
        self.inner.notify(change);
        if let Some(timer) = &self.display_power_timer {
            timer.reset();
        }
        self.inner.clear_history();
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Starts tracking a layer's frame timing. Returns `None` when content
    /// detection is off.
    pub fn register_layer(&self, name: &str, kind: LayerKind) -> Option<LayerKey> {
        let history = self.inner.history.as_ref()?;
        let (low, high) = {
            let catalog = self.inner.catalog.read();
            let low = catalog.min_supported().fps;
            match kind {
                LayerKind::Normal => (low, catalog.max_supported().fps),
                LayerKind::Wallpaper => (low, low),
            }
        };
        Some(history.lock().register(name, low, high))
    }

    /// Stops tracking a layer.
    pub fn unregister_layer(&self, key: LayerKey) -> Result<(), UnknownLayer> {
        match &self.inner.history {
            Some(history) => history.lock().unregister(key),
            None => Err(UnknownLayer(key)),
        }
    }

    /// Records that a layer presented a frame.
    pub fn record_layer_history(
        &self,
        key: LayerKey,
        present_time: HostTime,
    ) -> Result<(), UnknownLayer> {
        let now = self.inner.clock.now();
        match &self.inner.history {
            Some(history) => history.lock().record_frame(key, present_time, now),
            None => Err(UnknownLayer(key)),
        }
    }

    /// Forces a layer's vote; `None` returns it to the heuristic.
    pub fn set_layer_vote(
        &self,
        key: LayerKey,
        vote: Option<(LayerVoteType, f32)>,
    ) -> Result<(), UnknownLayer> {
        match &self.inner.history {
            Some(history) => history.lock().set_layer_vote(key, vote),
            None => Err(UnknownLayer(key)),
        }
    }

    /// Per-layer votes derived from the content history.
    #[must_use]
    pub fn history_layer_requirements(&self) -> Vec<LayerRequirement> {
        let now = self.inner.clock.now();
        self.inner
            .history
            .as_ref()
            .map(|history| history.lock().layer_requirements(now))
            .unwrap_or_default()
    }

    /// Summarizes the content history and re-decides the refresh rate.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "summarized rates are small and non-negative"
    )]
    pub fn choose_refresh_rate_for_content(&self) {
        let Some(history) = &self.inner.history else {
            return;
        };
        let fps = history.lock().summarize(self.inner.clock.now());
        let rounded = fps.round() as u32;
        let change = {
            let mut features = self.inner.features.lock();
            let catalog = self.inner.catalog.read();
            features.on_content_fps(rounded, &catalog, &self.inner.votes)
        };
        self.inner.notify(change);
    }

    /// Replaces the explicit layer votes and re-decides the refresh rate.
    pub fn set_layer_requirements(&self, layers: Vec<LayerRequirement>) {
        let change = {
            let mut features = self.inner.features.lock();
            let catalog = self.inner.catalog.read();
            features.on_layer_requirements(layers, &catalog, &self.inner.votes)
        };
        self.inner.notify(change);
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    /// Replaces the allowed range and default config.
    ///
    /// Returns `Ok(false)` for an unchanged policy. A rejected policy
    /// leaves everything as it was.
    pub fn set_policy(
        &self,
        default_config: ConfigId,
        min_fps: f32,
        max_fps: f32,
    ) -> Result<bool, SchedulerError> {
        let change = {
            let mut features = self.inner.features.lock();
            let mut catalog = self.inner.catalog.write();
            match catalog.set_policy(default_config, min_fps, max_fps) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(err) => {
                    tracing::warn!(%err, "policy rejected");
                    return Err(err.into());
                }
            }
            let catalog = RwLockWriteGuard::downgrade(catalog);
            features.refresh(&catalog, &self.inner.votes)
        };
        self.inner.notify(change);
        Ok(true)
    }

    /// The config the scheduler last decided on.
    #[must_use]
    pub fn preferred_config(&self) -> Option<ConfigId> {
        self.inner.features.lock().config_id()
    }

    /// Records that the hardware switched to `config_id`. Moves the phase
    /// offsets and resyncs to the new period.
    pub fn on_config_applied(&self, config_id: ConfigId) -> Result<(), SchedulerError> {
        let rate = {
            let mut catalog = self.inner.catalog.write();
            catalog.set_current_config_id(config_id)?;
            catalog.current().clone()
        };
        self.inner.phase.lock().set_refresh_rate_fps(rate.fps);
        self.inner.resync_to_hardware_vsync(true, rate.vsync_period);
        Ok(())
    }

    /// Current app and compositor offsets.
    #[must_use]
    pub fn phase_offsets(&self) -> Offsets {
        self.inner.phase.lock().current()
    }

    // -----------------------------------------------------------------------
    // Hardware vsync
    // -----------------------------------------------------------------------

    /// Turns hardware vsync on if it is available.
    pub fn enable_hardware_vsync(&self) {
        self.inner.enable_hardware_vsync();
    }

    /// Turns hardware vsync off; `make_unavailable` also blocks it from
    /// being turned back on until the next resync that makes it available.
    pub fn disable_hardware_vsync(&self, make_unavailable: bool) {
        self.inner.disable_hardware_vsync(make_unavailable);
    }

    /// Starts modeling `period` and turns hardware vsync on.
    pub fn resync_to_hardware_vsync(&self, make_available: bool, period: Duration) {
        self.inner.resync_to_hardware_vsync(make_available, period);
    }

    /// Resyncs to the current config's period, at most once per 750 ms.
    pub fn resync(&self) {
        let now = self.inner.clock.now().nanos();
        let last = self.inner.last_resync.swap(now, Ordering::AcqRel);
        if now.saturating_sub(last) > RESYNC_DEBOUNCE.nanos() {
            let period = self.inner.catalog.read().current().vsync_period;
            self.inner.resync_to_hardware_vsync(false, period);
        }
    }

    /// Feeds a hardware vsync timestamp. Returns `true` if a pending
    /// period change was flushed by this sample.
    pub fn add_resync_sample(&self, timestamp: HostTime) -> bool {
        let outcome = {
            let hw = self.inner.hw.lock();
            hw.enabled
                .then(|| self.inner.timeline.lock().add_resync_sample(timestamp))
        };
        let needs_hw_vsync = outcome.is_some_and(|o| o.needs_hw_vsync);
        if let Some(outcome) = outcome {
            let prediction = {
                let mut timeline = self.inner.timeline.lock();
                VsyncPredictionEvent {
                    at: timestamp,
                    period: timeline.period(),
                    intercept: timeline.model().intercept,
                    next_vsync: timeline.compute_next_refresh(timestamp, Duration::ZERO),
                }
            };
            self.inner.with_tracer(|tracer| {
                tracer.vsync_sample(&VsyncSampleEvent {
                    timestamp,
                    accepted: outcome.accepted,
                    needs_hw_vsync: outcome.needs_hw_vsync,
                    period_flushed: outcome.period_flushed,
                });
                tracer.vsync_prediction(&prediction);
            });
        }
        if needs_hw_vsync {
            self.inner.enable_hardware_vsync();
        } else {
            self.inner.disable_hardware_vsync(false);
        }
        outcome.is_some_and(|o| o.period_flushed)
    }

    /// Feeds a present fence and switches hardware vsync as the model
    /// requires.
    pub fn add_present_fence(&self, fence: &FenceTime) {
        let now = self.inner.clock.now();
        let needs_hw_vsync = self.inner.timeline.lock().add_present_fence(fence, now);
        if needs_hw_vsync {
            self.inner.enable_hardware_vsync();
        } else {
            self.inner.disable_hardware_vsync(false);
        }
    }

    /// Stops (or resumes) learning from present fences.
    pub fn set_ignore_present_fences(&self, ignore: bool) {
        self.inner.timeline.lock().set_ignore_present_fences(ignore);
    }

    /// When a frame submitted now is expected on screen.
    #[must_use]
    pub fn expected_present_time(&self) -> HostTime {
        let now = self.inner.clock.now();
        self.inner.timeline.lock().expected_present_time(now)
    }

    /// Returns `true` while hardware vsync is on.
    #[must_use]
    pub fn hardware_vsync_enabled(&self) -> bool {
        self.inner.hw.lock().enabled
    }

    /// Records a hardware period change. Requests a repaint right away if
    /// the change needs one; the applied time is clamped to now + 200 ms.
    pub fn on_new_vsync_period_change_timeline(&self, timeline: VsyncPeriodChangeTimeline) {
        if timeline.refresh_required {
            self.inner.callback.on_repaint_needed();
        }
        let max_applied = self.inner.clock.now() + MAX_VSYNC_APPLIED_TIME;
        let mut stored = timeline;
        if stored.new_vsync_applied_time > max_applied {
            stored.new_vsync_applied_time = max_applied;
        }
        *self.inner.period_change.lock() = Some(stored);
    }

    /// Records that a frame reached the display at `timestamp`. Requests
    /// another repaint while a period change still owes a refresh.
    pub fn on_display_refreshed(&self, timestamp: HostTime) {
        let repaint = {
            let mut last = self.inner.period_change.lock();
            match last.as_mut() {
                Some(change) if change.refresh_required => {
                    if change.refresh_time < timestamp {
                        change.refresh_required = false;
                        false
                    } else {
                        true
                    }
                }
                _ => false,
            }
        };
        if repaint {
            self.inner.callback.on_repaint_needed();
        }
    }

    /// The last period change reported by the hardware.
    #[must_use]
    pub fn last_vsync_period_change_timeline(&self) -> Option<VsyncPeriodChangeTimeline> {
        *self.inner.period_change.lock()
    }

    // -----------------------------------------------------------------------
    // Timeline access
    // -----------------------------------------------------------------------

    /// Next predicted vsync and the modeled period.
    #[must_use]
    pub fn display_stat_info(&self) -> DisplayStatInfo {
        let now = self.inner.clock.now();
        let mut timeline = self.inner.timeline.lock();
        DisplayStatInfo {
            vsync_time: timeline.compute_next_refresh(now, Duration::ZERO),
            vsync_period: timeline.period(),
        }
    }

    /// The shared vsync timeline.
    #[must_use]
    pub fn timeline(&self) -> Arc<Mutex<VsyncTimeline>> {
        Arc::clone(&self.inner.timeline)
    }

    /// A distributor reading this scheduler's timeline and clock.
    #[must_use]
    pub fn vsync_distributor(&self) -> VsyncDistributor {
        VsyncDistributor::new(
            self.timeline(),
            Arc::clone(&self.inner.clock),
            self.inner.config.timer_slack,
        )
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Human-readable snapshot of the scheduler state.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = self.dump_into(&mut out);
        out
    }

    fn dump_into(&self, out: &mut String) -> fmt::Result {
        let state = |on: bool| if on { "on" } else { "off" };
        let timer = |t: &Option<OneShotTimer>| t.as_ref().map_or_else(|| "off".into(), OneShotTimer::dump);

        let features = self.inner.features.lock().clone();
        let catalog = self.inner.catalog.read();
        writeln!(out, "Scheduler for {}", self.inner.display.name)?;
        writeln!(
            out,
            "+  Refresh rate switching: {}",
            state(catalog.refresh_rate_switching_supported())
        )?;
        writeln!(out, "+  Content detection: {}", state(self.inner.history.is_some()))?;
        writeln!(out, "+  Idle timer: {}", timer(&self.idle_timer))?;
        writeln!(out, "+  Touch timer: {}", timer(&self.touch_timer))?;
        writeln!(out, "+  Display power timer: {}", timer(&self.display_power_timer))?;
        writeln!(
            out,
            "+  Features: content {} ({} fps), touch {}, idle {:?}, power {} ({:?})",
            state(features.content_detection()),
            features.content_fps(),
            if features.touch_active() { "active" } else { "inactive" },
            features.idle_timer(),
            if features.display_power_normal() { "normal" } else { "abnormal" },
            features.display_power_timer(),
        )?;
        match features.config_id() {
            Some(id) => writeln!(out, "+  Preferred config: {}", id.0)?,
            None => writeln!(out, "+  Preferred config: none")?,
        }
        let policy = catalog.policy();
        writeln!(
            out,
            "+  Current: {} (config {}), policy default {} [{:.2}, {:.2}]",
            catalog.current(),
            catalog.current().config_id.0,
            policy.default_config.0,
            policy.min_fps,
            policy.max_fps,
        )?;
        drop(catalog);
        let hw = self.inner.hw.lock();
        writeln!(
            out,
            "+  Hardware vsync: {} ({})\n",
            state(hw.enabled),
            if hw.available { "available" } else { "unavailable" }
        )?;
        drop(hw);
        self.inner.phase.lock().dump(out)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Stopping the timers drops their senders, which ends the event loop.
        for timer in [
            &mut self.display_power_timer,
            &mut self.touch_timer,
            &mut self.idle_timer,
        ]
        .into_iter()
        .flatten()
        {
            timer.stop();
        }
        if let Some(thread) = self.event_thread.take() {
            if thread.join().is_err() {
                tracing::error!("scheduler event thread panicked");
            }
        }
    }
}

impl Inner {
    fn handle_timer_event(&self, event: TimerEvent) {
        let now = self.clock.now();
        tracing::debug!(kind = ?event.kind, state = ?event.state, "timer transition");
        self.with_tracer(|tracer| {
            tracer.timer_transition(&TimerTransitionEvent {
                kind: event.kind,
                state: event.state,
                at: now,
            });
        });

        if event.kind == TimerKind::Idle && self.config.kernel_idle_timer {
            self.kernel_idle_timer(event.state);
            return;
        }
        let change = {
            let mut features = self.features.lock();
            let catalog = self.catalog.read();
            features.on_timer(event, &catalog, &self.votes)
        };
        self.notify(change);
    }

    fn kernel_idle_timer(&self, state: TimerState) {
        let (fps, period) = {
            let catalog = self.catalog.read();
            (catalog.current().fps, catalog.current().vsync_period)
        };
        // Below the threshold the rate during panel self-refresh is the
        // same, so only the fast configs need hardware vsync back.
        match state {
            TimerState::Reset if fps > KERNEL_TIMER_FPS_THRESHOLD => {
                self.resync_to_hardware_vsync(true, period);
            }
            TimerState::Expired if fps <= KERNEL_TIMER_FPS_THRESHOLD => {
                self.disable_hardware_vsync(false);
            }
            _ => {}
        }
    }

    fn notify(&self, change: Option<ConfigChange>) {
        let Some(change) = change else {
            return;
        };
        let Some(rate) = self.catalog.read().by_id(change.config_id).cloned() else {
            tracing::error!(config = change.config_id.0, "decided on a config missing from the catalog");
            return;
        };
        tracing::debug!(
            config = change.config_id.0,
            fps = rate.fps,
            reason = %change.reason,
            event = ?change.event,
            "refresh rate change"
        );
        self.with_tracer(|tracer| {
            tracer.refresh_rate_decision(&RefreshRateDecisionEvent {
                config_id: change.config_id,
                fps: rate.fps,
                reason: change.reason,
                event: change.event,
            });
        });
        self.callback.on_refresh_rate_changed(&rate, change.event);
    }

    fn clear_history(&self) {
        if let Some(history) = &self.history {
            history.lock().clear();
        }
    }

    fn enable_hardware_vsync(&self) {
        let mut hw = self.hw.lock();
        if !hw.enabled && hw.available {
            self.vsync_control.set_vsync_enabled(true);
            hw.enabled = true;
        }
    }

    fn disable_hardware_vsync(&self, make_unavailable: bool) {
        let mut hw = self.hw.lock();
        if hw.enabled {
            self.vsync_control.set_vsync_enabled(false);
            hw.enabled = false;
        }
        if make_unavailable {
            hw.available = false;
        }
    }

    fn resync_to_hardware_vsync(&self, make_available: bool, period: Duration) {
        let mut hw = self.hw.lock();
        if make_available {
            hw.available = true;
        } else if !hw.available {
            return;
        }
        if period <= Duration::ZERO {
            return;
        }
        self.timeline.lock().set_period(period);
        if !hw.enabled {
            self.vsync_control.set_vsync_enabled(true);
            hw.enabled = true;
        }
    }

    fn with_tracer(&self, f: impl FnOnce(&mut Tracer<'_>)) {
        let mut sink = self.sink.lock();
        if let Some(sink) = sink.as_deref_mut() {
            let mut tracer = Tracer::new(sink);
            f(&mut tracer);
        }
    }
}
