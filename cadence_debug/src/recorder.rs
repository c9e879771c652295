// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].

use cadence_core::display::DisplayId;
use cadence_core::policy::{ConfigEvent, RateReason, TimerKind, TimerState};
use cadence_core::refresh_rate::ConfigId;
use cadence_core::time::{Duration, HostTime};
use cadence_core::trace::{
    CandidateScore, ChannelDispatchEvent, CompositionEvent, RefreshRateDecisionEvent,
    TimerTransitionEvent, TraceSink, VsyncPredictionEvent, VsyncSampleEvent,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_VSYNC_SAMPLE: u8 = 1;
const TAG_VSYNC_PREDICTION: u8 = 2;
const TAG_CHANNEL_DISPATCH: u8 = 3;
const TAG_REFRESH_RATE_DECISION: u8 = 4;
const TAG_TIMER_TRANSITION: u8 = 5;
const TAG_COMPOSITION: u8 = 6;
const TAG_CANDIDATE_SCORE: u8 = 7;

const FLAG_ACCEPTED: u8 = 1;
const FLAG_NEEDS_HW_VSYNC: u8 = 1 << 1;
const FLAG_PERIOD_FLUSHED: u8 = 1 << 2;

const REASONS: [RateReason; 7] = [
    RateReason::SwitchingUnsupported,
    RateReason::DisplayPower,
    RateReason::Touch,
    RateReason::Idle,
    RateReason::ContentUnknown,
    RateReason::LayerVotes,
    RateReason::ContentFps,
];

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_reason(&mut self, reason: RateReason) {
        let idx = REASONS.iter().position(|r| *r == reason).unwrap_or(0);
        self.write_u8(u8::try_from(idx).unwrap_or(0));
    }
}

impl TraceSink for RecorderSink {
    fn on_vsync_sample(&mut self, e: &VsyncSampleEvent) {
        self.write_u8(TAG_VSYNC_SAMPLE);
        self.write_i64(e.timestamp.nanos());
        let mut flags = 0;
        if e.accepted {
            flags |= FLAG_ACCEPTED;
        }
        if e.needs_hw_vsync {
            flags |= FLAG_NEEDS_HW_VSYNC;
        }
        if e.period_flushed {
            flags |= FLAG_PERIOD_FLUSHED;
        }
        self.write_u8(flags);
    }

    fn on_vsync_prediction(&mut self, e: &VsyncPredictionEvent) {
        self.write_u8(TAG_VSYNC_PREDICTION);
        self.write_i64(e.at.nanos());
        self.write_i64(e.period.nanos());
        self.write_i64(e.intercept);
        self.write_i64(e.next_vsync.nanos());
    }

    fn on_channel_dispatch(&mut self, e: &ChannelDispatchEvent) {
        self.write_u8(TAG_CHANNEL_DISPATCH);
        self.buf.extend_from_slice(&e.channel.to_le_bytes());
        self.write_i64(e.vsync.nanos());
        self.write_i64(e.wakeup.nanos());
        self.write_bool(e.delivered);
    }

    fn on_refresh_rate_decision(&mut self, e: &RefreshRateDecisionEvent) {
        self.write_u8(TAG_REFRESH_RATE_DECISION);
        self.write_u32(e.config_id.0);
        self.write_f32(e.fps);
        self.write_reason(e.reason);
        self.write_bool(e.event == ConfigEvent::Changed);
    }

    fn on_timer_transition(&mut self, e: &TimerTransitionEvent) {
        self.write_u8(TAG_TIMER_TRANSITION);
        self.write_u8(match e.kind {
            TimerKind::Idle => 0,
            TimerKind::Touch => 1,
            TimerKind::DisplayPower => 2,
        });
        self.write_bool(e.state == TimerState::Expired);
        self.write_i64(e.at.nanos());
    }

    fn on_composition(&mut self, e: &CompositionEvent) {
        self.write_u8(TAG_COMPOSITION);
        match e.display {
            Some(id) => {
                self.write_u8(1);
                self.buf.extend_from_slice(&id.0.to_le_bytes());
            }
            None => {
                self.write_u8(0);
                self.buf.extend_from_slice(&0_u64.to_le_bytes());
            }
        }
        self.write_bool(e.uses_client);
        self.write_bool(e.uses_device);
        self.write_bool(e.hwc_error.is_some());
        self.buf
            .extend_from_slice(&e.hwc_error.unwrap_or(0).to_le_bytes());
    }

    fn on_candidate_score(&mut self, s: &CandidateScore) {
        self.write_u8(TAG_CANDIDATE_SCORE);
        self.write_u32(s.config_id.0);
        self.write_f32(s.fps);
        self.write_f32(s.score);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Copy, Debug)]
pub enum RecordedEvent {
    /// A [`VsyncSampleEvent`].
    VsyncSample(VsyncSampleEvent),
    /// A [`VsyncPredictionEvent`].
    VsyncPrediction(VsyncPredictionEvent),
    /// A [`ChannelDispatchEvent`].
    ChannelDispatch(ChannelDispatchEvent),
    /// A [`RefreshRateDecisionEvent`].
    RefreshRateDecision(RefreshRateDecisionEvent),
    /// A [`TimerTransitionEvent`].
    TimerTransition(TimerTransitionEvent),
    /// A [`CompositionEvent`].
    Composition(CompositionEvent),
    /// A [`CandidateScore`].
    CandidateScore(CandidateScore),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|b| b != 0)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_i64(&mut self) -> Option<i64> {
        self.take().map(i64::from_le_bytes)
    }

    fn read_f32(&mut self) -> Option<f32> {
        self.read_u32().map(f32::from_bits)
    }

    fn decode_vsync_sample(&mut self) -> Option<RecordedEvent> {
        let timestamp = HostTime(self.read_i64()?);
        let flags = self.read_u8()?;
        Some(RecordedEvent::VsyncSample(VsyncSampleEvent {
            timestamp,
            accepted: flags & FLAG_ACCEPTED != 0,
            needs_hw_vsync: flags & FLAG_NEEDS_HW_VSYNC != 0,
            period_flushed: flags & FLAG_PERIOD_FLUSHED != 0,
        }))
    }

    fn decode_vsync_prediction(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::VsyncPrediction(VsyncPredictionEvent {
            at: HostTime(self.read_i64()?),
            period: Duration(self.read_i64()?),
            intercept: self.read_i64()?,
            next_vsync: HostTime(self.read_i64()?),
        }))
    }

    fn decode_channel_dispatch(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ChannelDispatch(ChannelDispatchEvent {
            channel: self.read_u64()?,
            vsync: HostTime(self.read_i64()?),
            wakeup: HostTime(self.read_i64()?),
            delivered: self.read_bool()?,
        }))
    }

    fn decode_refresh_rate_decision(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::RefreshRateDecision(RefreshRateDecisionEvent {
            config_id: ConfigId(self.read_u32()?),
            fps: self.read_f32()?,
            reason: *REASONS.get(usize::from(self.read_u8()?))?,
            event: if self.read_bool()? {
                ConfigEvent::Changed
            } else {
                ConfigEvent::None
            },
        }))
    }

    fn decode_timer_transition(&mut self) -> Option<RecordedEvent> {
        let kind = match self.read_u8()? {
            0 => TimerKind::Idle,
            1 => TimerKind::Touch,
            _ => TimerKind::DisplayPower,
        };
        let state = if self.read_bool()? {
            TimerState::Expired
        } else {
            TimerState::Reset
        };
        Some(RecordedEvent::TimerTransition(TimerTransitionEvent {
            kind,
            state,
            at: HostTime(self.read_i64()?),
        }))
    }

    fn decode_composition(&mut self) -> Option<RecordedEvent> {
        let has_display = self.read_bool()?;
        let display = self.read_u64()?;
        let uses_client = self.read_bool()?;
        let uses_device = self.read_bool()?;
        let has_error = self.read_bool()?;
        let error = i32::from_le_bytes(self.take()?);
        Some(RecordedEvent::Composition(CompositionEvent {
            display: has_display.then_some(DisplayId(display)),
            uses_client,
            uses_device,
            hwc_error: has_error.then_some(error),
        }))
    }

    fn decode_candidate_score(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CandidateScore(CandidateScore {
            config_id: ConfigId(self.read_u32()?),
            fps: self.read_f32()?,
            score: self.read_f32()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_VSYNC_SAMPLE => self.decode_vsync_sample(),
            TAG_VSYNC_PREDICTION => self.decode_vsync_prediction(),
            TAG_CHANNEL_DISPATCH => self.decode_channel_dispatch(),
            TAG_REFRESH_RATE_DECISION => self.decode_refresh_rate_decision(),
            TAG_TIMER_TRANSITION => self.decode_timer_transition(),
            TAG_COMPOSITION => self.decode_composition(),
            TAG_CANDIDATE_SCORE => self.decode_candidate_score(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
