// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format export.
//!
//! Converts a binary recording (from [`RecorderSink`](crate::recorder::RecorderSink))
//! into JSON that can be loaded in `chrome://tracing` or [Perfetto].
//!
//! Host times are nanoseconds and are written as microseconds. Events that
//! carry no timestamp of their own (decisions, compositions, candidate scores)
//! are placed at the most recent timestamp seen earlier in the stream.
//!
//! [Perfetto]: https://ui.perfetto.dev

use std::io::{self, Write};

use serde_json::{Value, json};

use crate::recorder::{RecordedEvent, decode};

/// Track ids, rendered as Chrome thread ids.
const TID_VSYNC: u64 = 1;
const TID_POLICY: u64 = 2;
const TID_TIMERS: u64 = 3;
const TID_COMPOSITION: u64 = 4;
/// Channel `n` renders on track `TID_CHANNEL_BASE + n`.
const TID_CHANNEL_BASE: u64 = 100;

fn micros(nanos: i64) -> f64 {
    nanos as f64 / 1000.0
}

/// Exports a binary recording as Chrome Trace Event Format JSON.
///
/// # Errors
///
/// Returns an I/O error if writing to `writer` fails.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let mut last_ts = 0.0_f64;

    for event in decode(bytes) {
        match event {
            RecordedEvent::VsyncSample(e) => {
                last_ts = micros(e.timestamp.nanos());
                events.push(json!({
                    "ph": "i",
                    "name": if e.accepted { "vsync" } else { "vsync (rejected)" },
                    "cat": "vsync",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_VSYNC,
                    "s": "t",
                    "args": {
                        "needs_hw_vsync": e.needs_hw_vsync,
                        "period_flushed": e.period_flushed,
                    }
                }));
            }
            RecordedEvent::VsyncPrediction(e) => {
                last_ts = micros(e.at.nanos());
                events.push(json!({
                    "ph": "C",
                    "name": "vsync period",
                    "cat": "vsync",
                    "ts": last_ts,
                    "pid": 0,
                    "args": {
                        "period_us": micros(e.period.nanos()),
                    }
                }));
                events.push(json!({
                    "ph": "i",
                    "name": "prediction",
                    "cat": "vsync",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_VSYNC,
                    "s": "t",
                    "args": {
                        "intercept_ns": e.intercept,
                        "next_vsync_us": micros(e.next_vsync.nanos()),
                    }
                }));
            }
            RecordedEvent::ChannelDispatch(e) => {
                last_ts = micros(e.wakeup.nanos());
                events.push(json!({
                    "ph": "i",
                    "name": if e.delivered { "pulse" } else { "pulse (dropped)" },
                    "cat": "channel",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_CHANNEL_BASE + e.channel,
                    "s": "t",
                    "args": {
                        "channel": e.channel,
                        "vsync_us": micros(e.vsync.nanos()),
                    }
                }));
            }
            RecordedEvent::RefreshRateDecision(e) => {
                events.push(json!({
                    "ph": "C",
                    "name": "refresh rate",
                    "cat": "policy",
                    "ts": last_ts,
                    "pid": 0,
                    "args": { "fps": e.fps }
                }));
                events.push(json!({
                    "ph": "i",
                    "name": format!("{} fps ({})", e.fps, e.reason),
                    "cat": "policy",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_POLICY,
                    "s": "t",
                    "args": {
                        "config_id": e.config_id.0,
                        "repaint": e.event == cadence_core::policy::ConfigEvent::Changed,
                    }
                }));
            }
            RecordedEvent::TimerTransition(e) => {
                last_ts = micros(e.at.nanos());
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?} {:?}", e.kind, e.state),
                    "cat": "timer",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_TIMERS,
                    "s": "t",
                }));
            }
            RecordedEvent::Composition(e) => {
                let mut args = json!({
                    "client": e.uses_client,
                    "device": e.uses_device,
                });
                if let Some(display) = e.display {
                    args["display"] = json!(display.0);
                }
                if let Some(err) = e.hwc_error {
                    args["hwc_error"] = json!(err);
                }
                events.push(json!({
                    "ph": "i",
                    "name": "composition",
                    "cat": "composition",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_COMPOSITION,
                    "s": "t",
                    "args": args,
                }));
            }
            RecordedEvent::CandidateScore(s) => {
                events.push(json!({
                    "ph": "i",
                    "name": "candidate",
                    "cat": "policy",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_POLICY,
                    "s": "t",
                    "args": {
                        "config_id": s.config_id.0,
                        "fps": s.fps,
                        "score": s.score,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events).map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use cadence_core::policy::{ConfigEvent, RateReason, TimerKind, TimerState};
    use cadence_core::refresh_rate::ConfigId;
    use cadence_core::time::HostTime;
    use cadence_core::trace::{
        ChannelDispatchEvent, RefreshRateDecisionEvent, TimerTransitionEvent, TraceSink,
        VsyncSampleEvent,
    };

    fn export_to_values(rec: &RecorderSink) -> Vec<Value> {
        let mut out = Vec::new();
        export(rec.as_bytes(), &mut out).unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn empty_recording_is_empty_array() {
        let values = export_to_values(&RecorderSink::new());
        assert!(values.is_empty());
    }

    #[test]
    fn timestamps_are_microseconds() {
        let mut rec = RecorderSink::new();
        rec.on_vsync_sample(&VsyncSampleEvent {
            timestamp: HostTime(16_667_000),
            accepted: true,
            needs_hw_vsync: true,
            period_flushed: false,
        });
        rec.on_timer_transition(&TimerTransitionEvent {
            kind: TimerKind::Idle,
            state: TimerState::Expired,
            at: HostTime(2_000_000),
        });

        let values = export_to_values(&rec);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["name"], "vsync");
        assert_eq!(values[0]["ts"], 16_667.0);
        assert_eq!(values[0]["args"]["needs_hw_vsync"], true);
        assert_eq!(values[1]["name"], "Idle Expired");
        assert_eq!(values[1]["ts"], 2_000.0);
        assert_eq!(values[1]["tid"], TID_TIMERS);
    }

    #[test]
    fn decisions_inherit_the_last_timestamp() {
        let mut rec = RecorderSink::new();
        rec.on_channel_dispatch(&ChannelDispatchEvent {
            channel: 2,
            vsync: HostTime(16_000_000),
            wakeup: HostTime(12_000_000),
            delivered: false,
        });
        rec.on_refresh_rate_decision(&RefreshRateDecisionEvent {
            config_id: ConfigId(1),
            fps: 90.0,
            reason: RateReason::Touch,
            event: ConfigEvent::None,
        });

        let values = export_to_values(&rec);
        assert_eq!(values.len(), 3);
        assert_eq!(values[0]["name"], "pulse (dropped)");
        assert_eq!(values[0]["tid"], TID_CHANNEL_BASE + 2);
        // Counter track followed by an instant, both at the dispatch time.
        assert_eq!(values[1]["ph"], "C");
        assert_eq!(values[1]["args"]["fps"], 90.0);
        assert_eq!(values[2]["ts"], 12_000.0);
        assert_eq!(values[2]["args"]["repaint"], false);
    }
}
