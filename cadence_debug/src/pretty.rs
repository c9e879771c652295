// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Host times
//! are printed in milliseconds.

use std::io::Write;

use cadence_core::policy::ConfigEvent;
use cadence_core::time::HostTime;
use cadence_core::trace::{
    CandidateScore, ChannelDispatchEvent, CompositionEvent, RefreshRateDecisionEvent,
    TimerTransitionEvent, TraceSink, VsyncPredictionEvent, VsyncSampleEvent,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
///
/// Write errors are ignored.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the destination.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn ms(t: HostTime) -> f64 {
    t.nanos() as f64 / 1_000_000.0
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_vsync_sample(&mut self, e: &VsyncSampleEvent) {
        let _ = writeln!(
            self.writer,
            "[vsync] t={:.3}ms sample {}{}{}",
            ms(e.timestamp),
            if e.accepted { "accepted" } else { "rejected" },
            if e.needs_hw_vsync { ", needs hw vsync" } else { "" },
            if e.period_flushed { ", period flushed" } else { "" },
        );
    }

    fn on_vsync_prediction(&mut self, e: &VsyncPredictionEvent) {
        let _ = writeln!(
            self.writer,
            "[model] t={:.3}ms period={}ns intercept={}ns next={:.3}ms",
            ms(e.at),
            e.period.nanos(),
            e.intercept,
            ms(e.next_vsync),
        );
    }

    fn on_channel_dispatch(&mut self, e: &ChannelDispatchEvent) {
        let _ = writeln!(
            self.writer,
            "[pulse] t={:.3}ms channel={} {} vsync={:.3}ms",
            ms(e.wakeup),
            e.channel,
            if e.delivered { "pulsed" } else { "dropped" },
            ms(e.vsync),
        );
    }

    fn on_refresh_rate_decision(&mut self, e: &RefreshRateDecisionEvent) {
        let _ = writeln!(
            self.writer,
            "[rate] {} fps (config {}, {}){}",
            e.fps,
            e.config_id.0,
            e.reason,
            if e.event == ConfigEvent::Changed {
                ", repaint"
            } else {
                ""
            },
        );
    }

    fn on_timer_transition(&mut self, e: &TimerTransitionEvent) {
        let _ = writeln!(
            self.writer,
            "[timer] t={:.3}ms {:?} {:?}",
            ms(e.at),
            e.kind,
            e.state,
        );
    }

    fn on_composition(&mut self, e: &CompositionEvent) {
        let display = e
            .display
            .map_or_else(|| "none".to_owned(), |d| d.0.to_string());
        let _ = write!(
            self.writer,
            "[composition] display={display} client={} device={}",
            e.uses_client, e.uses_device,
        );
        if let Some(err) = e.hwc_error {
            let _ = write!(self.writer, " hwc_error={err}");
        }
        let _ = writeln!(self.writer);
    }

    fn on_candidate_score(&mut self, s: &CandidateScore) {
        let _ = writeln!(
            self.writer,
            "[candidate] {} fps (config {}) score={:.3}",
            s.fps, s.config_id.0, s.score,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::display::DisplayId;
    use cadence_core::policy::{RateReason, TimerKind, TimerState};
    use cadence_core::refresh_rate::ConfigId;

    fn lines(sink: PrettyPrintSink<Vec<u8>>) -> Vec<String> {
        String::from_utf8(sink.into_inner())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn one_line_per_event() {
        let mut sink = PrettyPrintSink::with_writer(Vec::new());
        sink.on_timer_transition(&TimerTransitionEvent {
            kind: TimerKind::Touch,
            state: TimerState::Reset,
            at: HostTime(1_500_000),
        });
        sink.on_refresh_rate_decision(&RefreshRateDecisionEvent {
            config_id: ConfigId(1),
            fps: 90.0,
            reason: RateReason::Touch,
            event: ConfigEvent::Changed,
        });
        sink.on_composition(&CompositionEvent {
            display: Some(DisplayId(7)),
            uses_client: false,
            uses_device: true,
            hwc_error: None,
        });

        let lines = lines(sink);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[timer] t=1.500ms Touch Reset");
        assert!(lines[1].starts_with("[rate] 90 fps (config 1"));
        assert!(lines[1].ends_with(", repaint"));
        assert_eq!(lines[2], "[composition] display=7 client=false device=true");
    }

    #[test]
    fn dropped_pulses_are_marked() {
        let mut sink = PrettyPrintSink::with_writer(Vec::new());
        sink.on_channel_dispatch(&ChannelDispatchEvent {
            channel: 4,
            vsync: HostTime(16_000_000),
            wakeup: HostTime(12_000_000),
            delivered: false,
        });
        let lines = lines(sink);
        assert_eq!(lines[0], "[pulse] t=12.000ms channel=4 dropped vsync=16.000ms");
    }
}
