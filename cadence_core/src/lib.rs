// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Refresh-rate policy, vsync modeling and composition strategy for display
//! pipelines.
//!
//! `cadence_core` holds the deterministic half of a compositor's frame
//! pacing: given hardware vsync samples, layer frame timing and policy
//! inputs, it decides which refresh rate the display should run at, when
//! each vsync consumer should wake, and whether a frame is composed on the
//! GPU or by the hardware composer. It is `no_std` compatible (with `alloc`)
//! and owns no threads, clocks or locks; `cadence_scheduler` wraps it in a
//! threaded controller.
//!
//! # Architecture
//!
//! ```text
//!   hardware vsync / present fences
//!       │
//!       ▼
//!   VsyncTimeline ──► DispatchQueue ──► per-consumer wakeups
//!       ▲
//!       │ new period
//!   FeatureState::calculate() ◄── VoteAggregator ◄── ContentHistory
//!       │                                               ▲
//!       ▼                                               │
//!   RefreshRateCatalog (policy)            layer present timestamps
//!
//!   DisplayOutput::choose_strategy() ◄──► HwComposer   (per display, per frame)
//! ```
//!
//! **[`refresh_rate`]**: The display's configs as [`RefreshRate`]s, the
//! active [`Policy`] and nearest-rate queries.
//!
//! **[`vote`]**: Scores per-layer votes against the allowed rates.
//!
//! **[`history`]**: Per-layer present-time rings and frame-rate estimates.
//!
//! **[`vsync`]**: Regression model of hardware vsync, present-fence
//! tracking and the per-consumer dispatch queue.
//!
//! **[`policy`]**: The feature-state decision rules (display power, touch,
//! idle, content).
//!
//! **[`phase`]**: App and compositor phase offsets per refresh rate.
//!
//! **[`composition`]**: Client versus device composition per frame.
//!
//! **[`display`]**: Display ids and the explicit per-display context.
//!
//! **[`time`]**: Nanosecond [`HostTime`](time::HostTime) and
//! [`Duration`](time::Duration).
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! frame-pacing instrumentation, with zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-candidate
//!   score events.
//!
//! [`RefreshRate`]: refresh_rate::RefreshRate
//! [`Policy`]: refresh_rate::Policy

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod composition;
pub mod display;
pub mod history;
pub mod phase;
pub mod policy;
mod queue;
pub mod refresh_rate;
pub mod time;
pub mod trace;
pub mod vote;
pub mod vsync;
