// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for frame pacing.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! vsync model, the distributor and the policy controller call as they make
//! decisions. All method bodies default to no-ops, so implementing only the
//! events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates [`CandidateScore`] events and the
//!   corresponding `TraceSink` method.

use crate::display::DisplayId;
use crate::policy::{ConfigEvent, RateReason, TimerKind, TimerState};
use crate::refresh_rate::{ConfigId, RefreshRate};
use crate::time::{Duration, HostTime};

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted for every hardware vsync sample fed to the timeline.
#[derive(Clone, Copy, Debug)]
pub struct VsyncSampleEvent {
    /// Hardware timestamp of the sample.
    pub timestamp: HostTime,
    /// Whether the sample entered the model.
    pub accepted: bool,
    /// Whether the model still wants hardware vsync.
    pub needs_hw_vsync: bool,
    /// Whether a pending period change was applied.
    pub period_flushed: bool,
}

/// Emitted when the fitted vsync model is inspected after an update.
#[derive(Clone, Copy, Debug)]
pub struct VsyncPredictionEvent {
    /// When the model was read.
    pub at: HostTime,
    /// Fitted period.
    pub period: Duration,
    /// Fitted intercept in nanoseconds.
    pub intercept: i64,
    /// Next predicted vsync after `at`.
    pub next_vsync: HostTime,
}

/// Emitted when a channel's pulse is handed to its consumer (or dropped).
#[derive(Clone, Copy, Debug)]
pub struct ChannelDispatchEvent {
    /// Channel handle value.
    pub channel: u64,
    /// Vsync the pulse targets.
    pub vsync: HostTime,
    /// Wakeup time the pulse was scheduled for.
    pub wakeup: HostTime,
    /// `false` when the consumer had not drained the previous pulse.
    pub delivered: bool,
}

/// Emitted when the policy controller settles on a refresh rate.
#[derive(Clone, Copy, Debug)]
pub struct RefreshRateDecisionEvent {
    /// Chosen config.
    pub config_id: ConfigId,
    /// Rate of the chosen config.
    pub fps: f32,
    /// Which rule picked it.
    pub reason: RateReason,
    /// Repaint requirement reported to the callback.
    pub event: ConfigEvent,
}

/// Emitted when a scheduler timer changes state.
#[derive(Clone, Copy, Debug)]
pub struct TimerTransitionEvent {
    /// Which timer.
    pub kind: TimerKind,
    /// Its new state.
    pub state: TimerState,
    /// When the transition was handled.
    pub at: HostTime,
}

/// Emitted after the composition strategy for a frame is chosen.
#[derive(Clone, Copy, Debug)]
pub struct CompositionEvent {
    /// Hardware display, if any.
    pub display: Option<DisplayId>,
    /// Whether the GPU composes any layer.
    pub uses_client: bool,
    /// Whether the hardware composes any layer.
    pub uses_device: bool,
    /// Status of a failed hardware query.
    pub hwc_error: Option<i32>,
}

/// Score of one candidate rate during vote aggregation.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct CandidateScore {
    /// Candidate config.
    pub config_id: ConfigId,
    /// Candidate rate.
    pub fps: f32,
    /// Weighted score summed over voting layers.
    pub score: f32,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives frame-pacing trace events.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called for every hardware vsync sample.
    fn on_vsync_sample(&mut self, e: &VsyncSampleEvent) {
        _ = e;
    }

    /// Called after the vsync model changes.
    fn on_vsync_prediction(&mut self, e: &VsyncPredictionEvent) {
        _ = e;
    }

    /// Called when a channel pulse is delivered or dropped.
    fn on_channel_dispatch(&mut self, e: &ChannelDispatchEvent) {
        _ = e;
    }

    /// Called when the active refresh rate changes.
    fn on_refresh_rate_decision(&mut self, e: &RefreshRateDecisionEvent) {
        _ = e;
    }

    /// Called when a timer changes state.
    fn on_timer_transition(&mut self, e: &TimerTransitionEvent) {
        _ = e;
    }

    /// Called after a composition strategy is chosen.
    fn on_composition(&mut self, e: &CompositionEvent) {
        _ = e;
    }

    /// Called with each candidate's score (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_candidate_score(&mut self, s: &CandidateScore) {
        _ = s;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`VsyncSampleEvent`].
    #[inline]
    pub fn vsync_sample(&mut self, e: &VsyncSampleEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_vsync_sample(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`VsyncPredictionEvent`].
    #[inline]
    pub fn vsync_prediction(&mut self, e: &VsyncPredictionEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_vsync_prediction(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ChannelDispatchEvent`].
    #[inline]
    pub fn channel_dispatch(&mut self, e: &ChannelDispatchEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_channel_dispatch(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`RefreshRateDecisionEvent`].
    #[inline]
    pub fn refresh_rate_decision(&mut self, e: &RefreshRateDecisionEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_refresh_rate_decision(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`TimerTransitionEvent`].
    #[inline]
    pub fn timer_transition(&mut self, e: &TimerTransitionEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_timer_transition(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CompositionEvent`].
    #[inline]
    pub fn composition(&mut self, e: &CompositionEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_composition(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CandidateScore`]. A no-op unless `trace-rich` is enabled.
    #[inline]
    pub fn candidate_score(&mut self, candidate: &RefreshRate, score: f32) {
        #[cfg(feature = "trace-rich")]
        if let Some(s) = &mut self.sink {
            s.on_candidate_score(&CandidateScore {
                config_id: candidate.config_id,
                fps: candidate.fps,
                score,
            });
        }
        #[cfg(not(feature = "trace-rich"))]
        {
            _ = (candidate, score);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vsync() -> VsyncSampleEvent {
        VsyncSampleEvent {
            timestamp: HostTime(16_666_667),
            accepted: true,
            needs_hw_vsync: true,
            period_flushed: false,
        }
    }

    fn sample_decision() -> RefreshRateDecisionEvent {
        RefreshRateDecisionEvent {
            config_id: ConfigId(1),
            fps: 90.0,
            reason: RateReason::Touch,
            event: ConfigEvent::Changed,
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_vsync_sample(&sample_vsync());
        sink.on_refresh_rate_decision(&sample_decision());
        sink.on_composition(&CompositionEvent {
            display: None,
            uses_client: true,
            uses_device: false,
            hwc_error: None,
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        tracer.vsync_sample(&sample_vsync());
        tracer.refresh_rate_decision(&sample_decision());
        tracer.timer_transition(&TimerTransitionEvent {
            kind: TimerKind::Idle,
            state: TimerState::Expired,
            at: HostTime(0),
        });
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        use alloc::vec::Vec;

        struct RecordingSink {
            samples: Vec<HostTime>,
            decisions: Vec<ConfigId>,
        }
        impl TraceSink for RecordingSink {
            fn on_vsync_sample(&mut self, e: &VsyncSampleEvent) {
                self.samples.push(e.timestamp);
            }
            fn on_refresh_rate_decision(&mut self, e: &RefreshRateDecisionEvent) {
                self.decisions.push(e.config_id);
            }
        }

        let mut sink = RecordingSink {
            samples: Vec::new(),
            decisions: Vec::new(),
        };
        let mut tracer = Tracer::new(&mut sink);
        tracer.vsync_sample(&sample_vsync());
        tracer.refresh_rate_decision(&sample_decision());
        // Access sink after tracer is dropped.
        drop(tracer);
        assert_eq!(sink.samples, &[HostTime(16_666_667)], "one sample recorded");
        assert_eq!(sink.decisions, &[ConfigId(1)], "one decision recorded");
    }

    #[cfg(feature = "trace-rich")]
    #[test]
    fn candidate_scores_reach_rich_sinks() {
        use crate::refresh_rate::DisplayConfig;
        use alloc::vec::Vec;

        struct Scores(Vec<(ConfigId, f32)>);
        impl TraceSink for Scores {
            fn on_candidate_score(&mut self, s: &CandidateScore) {
                self.0.push((s.config_id, s.score));
            }
        }

        let rate = RefreshRate::from_config(&DisplayConfig::new(3, 0, 16_666_667));
        let mut sink = Scores(Vec::new());
        Tracer::new(&mut sink).candidate_score(&rate, 0.5);
        assert_eq!(sink.0, &[(ConfigId(3), 0.5)], "score forwarded");
    }
}
