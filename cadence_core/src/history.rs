// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-layer content history.
//!
//! [`ContentHistory`] is an arena of fixed-capacity ring buffers, one per
//! registered layer, addressed by a generational [`LayerKey`]. Recording a
//! frame and clearing history never allocate; registration allocates the
//! ring once.
//!
//! From a layer's recent frame timestamps the tracker derives:
//!
//! - whether the layer is *active* (updated recently),
//! - whether it is *frequent* (enough recent frames at a useful rate),
//! - a smoothed frame-rate estimate, reported only once it moves by more
//!   than [`REPORT_MARGIN_FPS`].
//!
//! [`ContentHistory::layer_requirements`] turns those into votes for the
//! [`vote`](crate::vote) aggregator; [`ContentHistory::summarize`] gives the
//! single content rate used when per-layer votes are not wanted.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::time::{Duration, HostTime, NANOS_PER_SEC, abs_f32, fps_to_period};
use crate::vote::{LayerRequirement, LayerVoteType};

/// The smoothed rate is re-reported only when it moves by more than this.
pub const REPORT_MARGIN_FPS: f32 = 1.0;

/// Tunables for [`ContentHistory`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistoryConfig {
    /// Frames kept per layer.
    pub history_size: usize,
    /// A layer with fewer than `history_size` frames needs at least this
    /// span of history before its rate is estimated.
    pub history_window: Duration,
    /// A layer updated within this span of `now` is active.
    pub active_period: Duration,
    /// Frames needed inside the active span to judge frequency.
    pub frequent_window: usize,
    /// Minimum average rate for a layer to count as frequent.
    pub min_frequent_fps: f32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            history_size: 90,
            history_window: Duration(NANOS_PER_SEC),
            active_period: Duration::from_millis(1200),
            frequent_window: 3,
            min_frequent_fps: 10.0,
        }
    }
}

/// Stable handle of a layer in a [`ContentHistory`].
///
/// Keys of unregistered layers are never reused for a different layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerKey {
    index: u32,
    generation: u32,
}

impl fmt::Debug for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerKey({}v{})", self.index, self.generation)
    }
}

/// A lookup with a key whose layer is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnknownLayer(pub LayerKey);

impl fmt::Display for UnknownLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {:?} is not registered", self.0)
    }
}

impl core::error::Error for UnknownLayer {}

/// Fixed-capacity ring of frame timestamps.
#[derive(Clone, Debug)]
struct FrameRing {
    times: Vec<HostTime>,
    head: usize,
    len: usize,
}

impl FrameRing {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            times: vec![HostTime::ZERO; capacity.max(2)],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, t: HostTime) {
        let cap = self.times.len();
        let slot = (self.head + self.len) % cap;
        self.times[slot] = t;
        if self.len == cap {
            self.head = (self.head + 1) % cap;
        } else {
            self.len += 1;
        }
    }

    fn get(&self, i: usize) -> HostTime {
        self.times[(self.head + i) % self.times.len()]
    }

    fn oldest(&self) -> Option<HostTime> {
        (self.len > 0).then(|| self.get(0))
    }

    fn newest(&self) -> Option<HostTime> {
        (self.len > 0).then(|| self.get(self.len - 1))
    }

    fn iter(&self) -> impl Iterator<Item = HostTime> + '_ {
        (0..self.len).map(|i| self.get(i))
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[derive(Clone, Debug)]
struct LayerHistory {
    name: String,
    frames: FrameRing,
    last_updated: HostTime,
    low_fps: f32,
    high_fps: f32,
    weight: f32,
    reported_fps: f32,
    vote_override: Option<(LayerVoteType, f32)>,
}

impl LayerHistory {
    fn high_period(&self) -> i64 {
        fps_to_period(self.high_fps)
    }

    fn is_active(&self, now: HostTime, config: &HistoryConfig) -> bool {
        self.last_updated.nanos() >= now.nanos() - config.active_period.nanos()
    }

    /// Few frames on record is treated as frequent: it may be the start of
    /// an animation.
    fn is_frequent(&self, now: HostTime, config: &HistoryConfig) -> bool {
        if self.frames.len < config.frequent_window {
            return true;
        }
        let threshold = now.nanos() - config.active_period.nanos();
        let Some(first_active) = self.frames.iter().position(|t| t.nanos() >= threshold) else {
            return false;
        };
        let count = self.frames.len - first_active;
        if count < config.frequent_window {
            return false;
        }
        let span = self.frames.get(self.frames.len - 1).nanos()
            - self.frames.get(first_active).nanos();
        if span <= 0 {
            return true;
        }
        let fps = 1e9_f32 * (count - 1) as f32 / span as f32;
        fps >= config.min_frequent_fps
    }

    fn has_enough_data(&self, config: &HistoryConfig) -> bool {
        if self.frames.len >= config.history_size {
            return true;
        }
        match (self.frames.oldest(), self.frames.newest()) {
            (Some(oldest), Some(newest)) => newest - oldest >= config.history_window,
            _ => false,
        }
    }

    /// Average frame rate over the ring, or `None` when the data is too thin
    /// or too bursty to trust.
    ///
    /// A plain mean is robust enough here: deltas are floored at the highest
    /// refresh period, any delta more than twice the mean away from it
    /// rejects the estimate, and the reported rate only moves past a 1 fps
    /// margin.
    fn estimate_fps(&mut self, config: &HistoryConfig) -> Option<f32> {
        if !self.has_enough_data(config) || self.frames.len < 2 {
            return None;
        }
        let floor = self.high_period();
        let delta = |i: usize| (self.frames.get(i + 1).nanos() - self.frames.get(i).nanos()).max(floor);

        let pairs = self.frames.len - 1;
        let total: i64 = (0..pairs).map(delta).sum();
        let average = total as f32 / pairs as f32;
        if average <= 0.0 {
            return None;
        }
        // Bursts would skew the mean; refuse to estimate.
        if (0..pairs).any(|i| abs_f32(delta(i) as f32 - average) > 2.0 * average) {
            return None;
        }

        let fps = 1e9_f32 / average;
        if abs_f32(fps - self.reported_fps) > REPORT_MARGIN_FPS {
            self.reported_fps = fps;
        }
        Some(self.reported_fps)
    }

    fn requirement(&mut self, now: HostTime, config: &HistoryConfig) -> LayerRequirement {
        let (vote, fps) = if let Some(forced) = self.vote_override {
            forced
        } else if !self.is_frequent(now, config) {
            (LayerVoteType::Min, 0.0)
        } else if let Some(fps) = self.estimate_fps(config) {
            (LayerVoteType::Heuristic, fps.clamp(self.low_fps, self.high_fps))
        } else {
            (LayerVoteType::Max, 0.0)
        };
        LayerRequirement {
            name: self.name.clone(),
            vote,
            desired_fps: fps,
            weight: self.weight,
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    layer: Option<LayerHistory>,
}

/// Arena of per-layer frame histories.
#[derive(Clone, Debug)]
pub struct ContentHistory {
    config: HistoryConfig,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Default for ContentHistory {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl ContentHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Returns the tunables.
    #[must_use]
    pub const fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Registers a layer whose content may run between `low_fps` and
    /// `high_fps`.
    ///
    /// Static layers such as wallpapers pass the same value for both.
    pub fn register(&mut self, name: impl Into<String>, low_fps: f32, high_fps: f32) -> LayerKey {
        let low_fps = if low_fps.is_nan() { 0.0 } else { low_fps };
        let high_fps = if high_fps.is_nan() { f32::MAX } else { high_fps };
        let (low_fps, high_fps) = if low_fps <= high_fps {
            (low_fps, high_fps)
        } else {
            (high_fps, low_fps)
        };
        let layer = LayerHistory {
            name: name.into(),
            frames: FrameRing::with_capacity(self.config.history_size),
            last_updated: HostTime::ZERO,
            low_fps,
            high_fps,
            weight: 1.0,
            reported_fps: 0.0,
            vote_override: None,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.layer = Some(layer);
            return LayerKey {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            layer: Some(layer),
        });
        LayerKey {
            index,
            generation: 0,
        }
    }

    /// Forgets a layer. Its key becomes stale.
    pub fn unregister(&mut self, key: LayerKey) -> Result<(), UnknownLayer> {
        let slot = self.slot_mut(key)?;
        slot.layer = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        Ok(())
    }

    /// Returns the number of registered layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.layer.is_some()).count()
    }

    /// Returns `true` if no layers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records that `key` produced a frame for `present_time`, observed at
    /// `now`.
    pub fn record_frame(
        &mut self,
        key: LayerKey,
        present_time: HostTime,
        now: HostTime,
    ) -> Result<(), UnknownLayer> {
        let layer = self.layer_mut(key)?;
        layer.last_updated = if present_time > now { present_time } else { now };
        layer.frames.push(present_time);
        Ok(())
    }

    /// Forces a layer's vote, bypassing the heuristic. `None` restores it.
    pub fn set_layer_vote(
        &mut self,
        key: LayerKey,
        vote: Option<(LayerVoteType, f32)>,
    ) -> Result<(), UnknownLayer> {
        self.layer_mut(key)?.vote_override = vote;
        Ok(())
    }

    /// Sets a layer's weight in the aggregate vote.
    pub fn set_layer_weight(&mut self, key: LayerKey, weight: f32) -> Result<(), UnknownLayer> {
        self.layer_mut(key)?.weight = weight.clamp(0.0, 1.0);
        Ok(())
    }

    /// Returns one requirement per active layer.
    ///
    /// Inactive layers lose their history so a later burst starts fresh.
    pub fn layer_requirements(&mut self, now: HostTime) -> Vec<LayerRequirement> {
        let config = self.config;
        let mut out = Vec::new();
        for layer in self.slots.iter_mut().filter_map(|s| s.layer.as_mut()) {
            if layer.is_active(now, &config) {
                out.push(layer.requirement(now, &config));
            } else {
                layer.frames.clear();
            }
        }
        out
    }

    /// Returns the highest content rate among active layers with a usable
    /// estimate, clamped to each layer's range, or `0.0` if there is none.
    pub fn summarize(&mut self, now: HostTime) -> f32 {
        let config = self.config;
        let mut max_fps = 0.0_f32;
        for layer in self.slots.iter_mut().filter_map(|s| s.layer.as_mut()) {
            if !layer.is_active(now, &config) {
                continue;
            }
            if let Some(fps) = layer.estimate_fps(&config) {
                let fps = fps.clamp(layer.low_fps, layer.high_fps);
                if fps > max_fps {
                    max_fps = fps;
                }
            }
        }
        max_fps
    }

    /// Drops every layer's frames and reported rate. Keys stay valid.
    pub fn clear(&mut self) {
        for layer in self.slots.iter_mut().filter_map(|s| s.layer.as_mut()) {
            layer.frames.clear();
            layer.reported_fps = 0.0;
        }
    }

    fn slot_mut(&mut self, key: LayerKey) -> Result<&mut Slot, UnknownLayer> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|s| s.generation == key.generation && s.layer.is_some())
            .ok_or(UnknownLayer(key))
    }

    fn layer_mut(&mut self, key: LayerKey) -> Result<&mut LayerHistory, UnknownLayer> {
        self.slot_mut(key)?.layer.as_mut().ok_or(UnknownLayer(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD_60: i64 = 16_666_667;

    /// Feeds `count` evenly spaced frames starting at `start`, returning the
    /// time of the last one.
    fn feed(history: &mut ContentHistory, key: LayerKey, start: i64, period: i64, count: usize) -> HostTime {
        let mut t = HostTime(start);
        for i in 0..count {
            t = HostTime(start + period * i as i64);
            history.record_frame(key, t, t).unwrap();
        }
        t
    }

    #[test]
    fn new_layer_votes_max_until_enough_data() {
        let mut history = ContentHistory::default();
        let key = history.register("app", 0.0, 120.0);
        let last = feed(&mut history, key, 0, PERIOD_60, 10);
        let reqs = history.layer_requirements(last);
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].vote, LayerVoteType::Max);
    }

    #[test]
    fn steady_layer_reports_heuristic_rate() {
        let mut history = ContentHistory::default();
        let key = history.register("video", 0.0, 120.0);
        let period = 1_000_000_000 / 30;
        let last = feed(&mut history, key, 0, period, 40);
        let reqs = history.layer_requirements(last);
        assert_eq!(reqs[0].vote, LayerVoteType::Heuristic);
        assert!(abs_f32(reqs[0].desired_fps - 30.0) < 0.5, "got {}", reqs[0].desired_fps);
        assert!(abs_f32(history.summarize(last) - 30.0) < 0.5);
    }

    #[test]
    fn reported_rate_has_hysteresis() {
        let mut history = ContentHistory::default();
        let key = history.register("video", 0.0, 120.0);
        let last = feed(&mut history, key, 0, PERIOD_60, 91);
        let first = history.summarize(last);
        // A slightly slower run shifts the mean by well under 1 Hz.
        let start = last.nanos() + PERIOD_60 + 40_000;
        let last = feed(&mut history, key, start, PERIOD_60 + 40_000, 10);
        assert_eq!(history.summarize(last), first);
    }

    #[test]
    fn infrequent_layer_votes_min() {
        let mut history = ContentHistory::default();
        let key = history.register("clock", 0.0, 120.0);
        // One frame every 500 ms is 2 fps.
        let last = feed(&mut history, key, 0, 500_000_000, 4);
        let reqs = history.layer_requirements(last);
        assert_eq!(reqs[0].vote, LayerVoteType::Min);
    }

    #[test]
    fn bursty_layer_votes_max() {
        let mut history = ContentHistory::default();
        let key = history.register("bursty", 0.0, 120.0);
        let mut t = 0;
        for i in 0..90 {
            t += if i % 10 == 0 { 200_000_000 } else { 10_000_000 };
            history.record_frame(key, HostTime(t), HostTime(t)).unwrap();
        }
        let reqs = history.layer_requirements(HostTime(t));
        assert_eq!(reqs[0].vote, LayerVoteType::Max);
    }

    #[test]
    fn inactive_layers_are_skipped_and_cleared() {
        let mut history = ContentHistory::default();
        let key = history.register("app", 0.0, 120.0);
        let last = feed(&mut history, key, 0, PERIOD_60, 90);
        let later = last + Duration::from_millis(1500);
        assert!(history.layer_requirements(later).is_empty());
        assert_eq!(history.summarize(later), 0.0);
    }

    #[test]
    fn wallpaper_rate_is_pinned() {
        let mut history = ContentHistory::default();
        let key = history.register("wallpaper", 60.0, 60.0);
        let last = feed(&mut history, key, 0, 1_000_000_000 / 30, 40);
        let reqs = history.layer_requirements(last);
        assert_eq!(reqs[0].vote, LayerVoteType::Heuristic);
        assert_eq!(reqs[0].desired_fps, 60.0);
    }

    #[test]
    fn vote_override_wins() {
        let mut history = ContentHistory::default();
        let key = history.register("game", 0.0, 120.0);
        history
            .set_layer_vote(key, Some((LayerVoteType::ExplicitExactOrMultiple, 24.0)))
            .unwrap();
        let last = feed(&mut history, key, 0, PERIOD_60, 3);
        let reqs = history.layer_requirements(last);
        assert_eq!(reqs[0].vote, LayerVoteType::ExplicitExactOrMultiple);
        assert_eq!(reqs[0].desired_fps, 24.0);
        history.set_layer_vote(key, None).unwrap();
        assert_eq!(history.layer_requirements(last)[0].vote, LayerVoteType::Max);
    }

    #[test]
    fn clear_keeps_keys_and_drops_frames() {
        let mut history = ContentHistory::default();
        let key = history.register("app", 0.0, 120.0);
        let last = feed(&mut history, key, 0, PERIOD_60, 90);
        assert!(history.summarize(last) > 0.0);
        history.clear();
        assert_eq!(history.summarize(last), 0.0);
        assert!(history.record_frame(key, last, last).is_ok());
    }

    #[test]
    fn unregistered_keys_go_stale() {
        let mut history = ContentHistory::default();
        let a = history.register("a", 0.0, 120.0);
        history.unregister(a).unwrap();
        assert_eq!(history.record_frame(a, HostTime(0), HostTime(0)), Err(UnknownLayer(a)));
        let b = history.register("b", 0.0, 120.0);
        assert_ne!(a, b, "reused slot gets a new generation");
        assert_eq!(history.len(), 1);
        assert_eq!(history.unregister(a), Err(UnknownLayer(a)));
    }

    #[test]
    fn ring_drops_oldest_beyond_capacity() {
        let mut ring = FrameRing::with_capacity(3);
        for t in 1..=5 {
            ring.push(HostTime(t));
        }
        let kept: Vec<i64> = ring.iter().map(HostTime::nanos).collect();
        assert_eq!(kept, [3, 4, 5]);
        ring.clear();
        assert_eq!(ring.oldest(), None);
    }
}
