// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Refresh-rate policy state machine.
//!
//! [`FeatureState`] is the controller's snapshot of everything that steers
//! the refresh rate: timers, touch, display power, content detection and the
//! latest layer votes. Every transition recomputes the winning config with
//! [`FeatureState::calculate`] and reports a [`ConfigChange`] only when the
//! winner differs from the previous one.
//!
//! The decision rules, first match wins:
//!
//! 1. Switching unsupported: the hardware's current config.
//! 2. Display power not normal, or its grace timer still running: the policy
//!    max.
//! 3. Touch active: the policy max.
//! 4. Idle timer expired: the policy min.
//! 5. Content detection off: the policy max.
//! 6. Layer votes, if any were supplied, otherwise the rate that best fits
//!    the detected content fps.
//!
//! This module holds no locks and no clocks. The threaded controller owns a
//! `FeatureState` behind one mutex and calls into it.

use alloc::vec::Vec;
use core::fmt;

use crate::refresh_rate::{ConfigId, RefreshRate, RefreshRateCatalog};
use crate::vote::{LayerRequirement, LayerVoteType, VoteAggregator};

/// Which scheduler timer fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// No new content for a while.
    Idle,
    /// Boost window after a touch.
    Touch,
    /// Grace window after a display power change.
    DisplayPower,
}

/// State of a restartable timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerState {
    /// The timer was (re)started and is running.
    Reset,
    /// The timer ran out.
    Expired,
}

/// A timer transition, fed to the controller through one queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerEvent {
    /// Which timer.
    pub kind: TimerKind,
    /// Its new state.
    pub state: TimerState,
}

impl TimerEvent {
    /// Creates a timer event.
    #[must_use]
    pub const fn new(kind: TimerKind, state: TimerState) -> Self {
        Self { kind, state }
    }
}

/// Whether a refresh-rate change requires a full repaint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConfigEvent {
    /// No repaint needed.
    #[default]
    None,
    /// Content-driven change; repaint.
    Changed,
}

/// Which decision rule picked the config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateReason {
    /// The display cannot switch rates.
    SwitchingUnsupported,
    /// Display power is abnormal or its grace timer is running.
    DisplayPower,
    /// Touch boost.
    Touch,
    /// Idle timer expired.
    Idle,
    /// Content rate is unknown.
    ContentUnknown,
    /// Layer vote aggregation.
    LayerVotes,
    /// Detected content rate.
    ContentFps,
}

impl fmt::Display for RateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SwitchingUnsupported => "switching unsupported",
            Self::DisplayPower => "display power",
            Self::Touch => "touch",
            Self::Idle => "idle",
            Self::ContentUnknown => "content unknown",
            Self::LayerVotes => "layer votes",
            Self::ContentFps => "content fps",
        })
    }
}

/// Output of [`FeatureState::calculate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    /// Winning config.
    pub config_id: ConfigId,
    /// Rule that produced it.
    pub reason: RateReason,
}

/// A change of winning config produced by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigChange {
    /// New winning config.
    pub config_id: ConfigId,
    /// Rule that produced it.
    pub reason: RateReason,
    /// Whether the change requires a repaint.
    pub event: ConfigEvent,
}

/// Snapshot of the inputs to the refresh-rate decision.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureState {
    content_detection: bool,
    content_fps: u32,
    touch_active: bool,
    idle_timer: TimerState,
    display_power_timer: TimerState,
    display_power_normal: bool,
    layers: Vec<LayerRequirement>,
    config_id: Option<ConfigId>,
}

impl Default for FeatureState {
    fn default() -> Self {
        Self {
            content_detection: false,
            content_fps: 0,
            touch_active: false,
            idle_timer: TimerState::Reset,
            display_power_timer: TimerState::Expired,
            display_power_normal: true,
            layers: Vec::new(),
            config_id: None,
        }
    }
}

impl FeatureState {
    /// Returns the last winning config, if any decision was made.
    #[inline]
    #[must_use]
    pub const fn config_id(&self) -> Option<ConfigId> {
        self.config_id
    }

    /// Returns `true` while content detection reports a rate.
    #[inline]
    #[must_use]
    pub const fn content_detection(&self) -> bool {
        self.content_detection
    }

    /// Returns the last rounded content rate.
    #[inline]
    #[must_use]
    pub const fn content_fps(&self) -> u32 {
        self.content_fps
    }

    /// Returns `true` while the touch boost is active.
    #[inline]
    #[must_use]
    pub const fn touch_active(&self) -> bool {
        self.touch_active
    }

    /// Returns the idle timer state.
    #[inline]
    #[must_use]
    pub const fn idle_timer(&self) -> TimerState {
        self.idle_timer
    }

    /// Returns the display power timer state.
    #[inline]
    #[must_use]
    pub const fn display_power_timer(&self) -> TimerState {
        self.display_power_timer
    }

    /// Returns `true` if the display is in its normal power state.
    #[inline]
    #[must_use]
    pub const fn display_power_normal(&self) -> bool {
        self.display_power_normal
    }

    /// Returns the latest layer votes.
    #[must_use]
    pub fn layer_requirements(&self) -> &[LayerRequirement] {
        &self.layers
    }

    /// Computes the winning config for the current state.
    #[must_use]
    pub fn calculate(&self, catalog: &RefreshRateCatalog, votes: &VoteAggregator) -> RateDecision {
        let pick = |rate: &RefreshRate, reason| RateDecision {
            config_id: rate.config_id,
            reason,
        };
        if !catalog.refresh_rate_switching_supported() {
            return pick(catalog.current(), RateReason::SwitchingUnsupported);
        }
        if !self.display_power_normal || self.display_power_timer == TimerState::Reset {
            return pick(catalog.max_by_policy(), RateReason::DisplayPower);
        }
        if self.touch_active {
            return pick(catalog.max_by_policy(), RateReason::Touch);
        }
        if self.idle_timer == TimerState::Expired {
            return pick(catalog.min_by_policy(), RateReason::Idle);
        }
        if !self.content_detection {
            return pick(catalog.max_by_policy(), RateReason::ContentUnknown);
        }
        if self.has_voting_layers() {
            return pick(
                votes.best_refresh_rate(catalog, &self.layers, false),
                RateReason::LayerVotes,
            );
        }
        pick(
            catalog.refresh_rate_for_content(self.content_fps as f32),
            RateReason::ContentFps,
        )
    }

    /// Applies a timer transition.
    ///
    /// Touch and display-power transitions request a repaint when content
    /// detection is on; idle transitions never do.
    pub fn on_timer(
        &mut self,
        event: TimerEvent,
        catalog: &RefreshRateCatalog,
        votes: &VoteAggregator,
    ) -> Option<ConfigChange> {
        let repaint_on_content = match event.kind {
            TimerKind::Idle => {
                if self.idle_timer == event.state {
                    return None;
                }
                self.idle_timer = event.state;
                false
            }
            TimerKind::Touch => {
                let active = event.state == TimerState::Reset;
                if self.touch_active == active {
                    return None;
                }
                self.touch_active = active;
                true
            }
            TimerKind::DisplayPower => {
                if self.display_power_timer == event.state {
                    return None;
                }
                self.display_power_timer = event.state;
                true
            }
        };
        let event = if repaint_on_content && self.content_detection {
            ConfigEvent::Changed
        } else {
            ConfigEvent::None
        };
        self.recompute(catalog, votes, event)
    }

    /// Records the display power state.
    pub fn set_display_power_normal(
        &mut self,
        normal: bool,
        catalog: &RefreshRateCatalog,
        votes: &VoteAggregator,
    ) -> Option<ConfigChange> {
        if self.display_power_normal == normal {
            return None;
        }
        self.display_power_normal = normal;
        let event = if self.content_detection {
            ConfigEvent::Changed
        } else {
            ConfigEvent::None
        };
        self.recompute(catalog, votes, event)
    }

    /// Records the summarized content rate, rounded to whole fps.
    ///
    /// A rate of zero turns content detection off.
    pub fn on_content_fps(
        &mut self,
        fps: u32,
        catalog: &RefreshRateCatalog,
        votes: &VoteAggregator,
    ) -> Option<ConfigChange> {
        if self.content_fps == fps {
            return None;
        }
        self.content_fps = fps;
        self.content_detection = fps > 0 || self.has_voting_layers();
        self.recompute(catalog, votes, ConfigEvent::Changed)
    }

    /// Replaces the layer votes.
    ///
    /// Content detection stays on while any layer casts a vote.
    pub fn on_layer_requirements(
        &mut self,
        layers: Vec<LayerRequirement>,
        catalog: &RefreshRateCatalog,
        votes: &VoteAggregator,
    ) -> Option<ConfigChange> {
        if self.layers == layers {
            return None;
        }
        self.layers = layers;
        self.content_detection = self.content_fps > 0 || self.has_voting_layers();
        self.recompute(catalog, votes, ConfigEvent::Changed)
    }

    /// Recomputes after an external change such as a new policy.
    pub fn refresh(
        &mut self,
        catalog: &RefreshRateCatalog,
        votes: &VoteAggregator,
    ) -> Option<ConfigChange> {
        self.recompute(catalog, votes, ConfigEvent::None)
    }

    fn has_voting_layers(&self) -> bool {
        self.layers.iter().any(|l| l.vote != LayerVoteType::NoVote)
    }

    fn recompute(
        &mut self,
        catalog: &RefreshRateCatalog,
        votes: &VoteAggregator,
        event: ConfigEvent,
    ) -> Option<ConfigChange> {
        let decision = self.calculate(catalog, votes);
        if self.config_id == Some(decision.config_id) {
            return None;
        }
        self.config_id = Some(decision.config_id);
        Some(ConfigChange {
            config_id: decision.config_id,
            reason: decision.reason,
            event,
        })
    }
}
