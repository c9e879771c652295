// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layer vote aggregation.
//!
//! Every visible layer states a [`LayerRequirement`]: a vote type, a desired
//! frame rate and a weight. [`VoteAggregator::best_refresh_rate`] turns the
//! set of requirements into one allowed [`RefreshRate`].
//!
//! Resolution order:
//!
//! 1. `NoVote` layers are dropped.
//! 2. No remaining layers: the policy max while touch is active, otherwise
//!    the current rate (as allowed by policy).
//! 3. Any `Max` vote: the policy max.
//! 4. A `Min` vote: the policy min (see [`MinVotePolicy`]).
//! 5. Touch active and no `ExplicitDefault` vote: the policy max.
//! 6. Otherwise every allowed rate is scored against every layer and the
//!    highest weighted sum wins. A candidate replaces the running best only
//!    if it beats it by more than [`SCORE_EPSILON`], so ties keep the lower
//!    rate.

use alloc::string::String;

use crate::refresh_rate::{RefreshRate, RefreshRateCatalog};
use crate::time::{abs_f32, fps_to_period, round_f32};
use crate::trace::Tracer;

/// Period slack within which a layer period counts as a whole number of
/// display frames, in nanoseconds.
pub const PERIOD_MARGIN_NANOS: i64 = 800_000;

/// Relative margin a candidate score must beat the running best by.
pub const SCORE_EPSILON: f32 = 0.001;

/// Beyond this many display frames per layer frame a cadence is not
/// considered smooth.
const MAX_FRAMES_TO_FIT: i64 = 10;

/// How a layer expresses its refresh-rate preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerVoteType {
    /// The layer does not care.
    NoVote,
    /// The layer wants the lowest allowed rate.
    Min,
    /// The layer wants the highest allowed rate.
    Max,
    /// Rate estimated from observed frame timing.
    Heuristic,
    /// App-declared rate; any display rate that can render it is fine.
    ExplicitDefault,
    /// App-declared rate that should be shown at an exact multiple.
    ExplicitExactOrMultiple,
}

/// One layer's vote.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerRequirement {
    /// Layer name, for logs.
    pub name: String,
    /// Vote type.
    pub vote: LayerVoteType,
    /// Desired frames per second. Ignored for `NoVote`, `Min` and `Max`.
    pub desired_fps: f32,
    /// Relative importance in `[0, 1]`.
    pub weight: f32,
}

impl LayerRequirement {
    /// Creates a requirement with full weight.
    #[must_use]
    pub fn new(name: impl Into<String>, vote: LayerVoteType, desired_fps: f32) -> Self {
        Self {
            name: name.into(),
            vote,
            desired_fps,
            weight: 1.0,
        }
    }

    /// Sets the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

/// How `Min` votes combine with other votes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MinVotePolicy {
    /// Any `Min` vote forces the policy min, whatever other layers want.
    #[default]
    Floor,
    /// The policy min is chosen only when every voting layer votes `Min`;
    /// otherwise `Min` votes are ignored.
    Unanimous,
}

/// Aggregator tunables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoteConfig {
    /// `Min` vote handling.
    pub min_vote_policy: MinVotePolicy,
    /// How close `display_fps / desired_fps` must be to an integer for an
    /// `ExplicitExactOrMultiple` layer to score a perfect match.
    pub exact_multiple_tolerance: f32,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            min_vote_policy: MinVotePolicy::Floor,
            exact_multiple_tolerance: 0.15,
        }
    }
}

/// Chooses a refresh rate from a set of layer votes.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoteAggregator {
    config: VoteConfig,
}

impl VoteAggregator {
    /// Creates an aggregator with the given tunables.
    #[must_use]
    pub const fn new(config: VoteConfig) -> Self {
        Self { config }
    }

    /// Returns the active tunables.
    #[must_use]
    pub const fn config(&self) -> &VoteConfig {
        &self.config
    }

    /// Returns the allowed refresh rate that best serves `layers`.
    pub fn best_refresh_rate<'c>(
        &self,
        catalog: &'c RefreshRateCatalog,
        layers: &[LayerRequirement],
        touch_active: bool,
    ) -> &'c RefreshRate {
        self.best_refresh_rate_traced(catalog, layers, touch_active, &mut Tracer::none())
    }

    /// Like [`best_refresh_rate`](Self::best_refresh_rate), reporting each
    /// candidate's score to `tracer`.
    pub fn best_refresh_rate_traced<'c>(
        &self,
        catalog: &'c RefreshRateCatalog,
        layers: &[LayerRequirement],
        touch_active: bool,
        tracer: &mut Tracer<'_>,
    ) -> &'c RefreshRate {
        let mut voting = 0_usize;
        let mut min_votes = 0_usize;
        let mut max_votes = 0_usize;
        let mut explicit_default = 0_usize;
        for layer in layers {
            match layer.vote {
                LayerVoteType::NoVote => continue,
                LayerVoteType::Min => min_votes += 1,
                LayerVoteType::Max => max_votes += 1,
                LayerVoteType::ExplicitDefault => explicit_default += 1,
                LayerVoteType::Heuristic | LayerVoteType::ExplicitExactOrMultiple => {}
            }
            voting += 1;
        }

        if voting == 0 {
            return if touch_active {
                catalog.max_by_policy()
            } else {
                catalog.current_by_policy()
            };
        }
        if max_votes > 0 {
            return catalog.max_by_policy();
        }
        if min_votes > 0 {
            match self.config.min_vote_policy {
                MinVotePolicy::Floor => return catalog.min_by_policy(),
                MinVotePolicy::Unanimous if min_votes == voting => {
                    return catalog.min_by_policy();
                }
                MinVotePolicy::Unanimous => {}
            }
        }
        if touch_active && explicit_default == 0 {
            return catalog.max_by_policy();
        }

        let mut best = catalog.min_by_policy();
        let mut best_score = 0.0_f32;
        for candidate in catalog.available() {
            let score: f32 = layers
                .iter()
                .filter(|l| {
                    matches!(
                        l.vote,
                        LayerVoteType::Heuristic
                            | LayerVoteType::ExplicitDefault
                            | LayerVoteType::ExplicitExactOrMultiple
                    )
                })
                .map(|l| self.layer_score(l, candidate) * l.weight)
                .sum();
            tracer.candidate_score(candidate, score);
            if score > best_score * (1.0 + SCORE_EPSILON) {
                best = candidate;
                best_score = score;
            }
        }
        tracing::trace!(rate = %best, score = best_score, "scored layer votes");
        best
    }

    /// Scores how well `rate` presents one layer, in `[0, 1]`.
    fn layer_score(&self, layer: &LayerRequirement, rate: &RefreshRate) -> f32 {
        if layer.desired_fps <= 0.0 {
            return 0.0;
        }
        let layer_period = fps_to_period(layer.desired_fps);
        let display_period = rate.vsync_period.nanos();
        if display_period <= 0 || layer_period <= 0 {
            return 0.0;
        }

        match layer.vote {
            LayerVoteType::ExplicitDefault => {
                // Smallest multiple of the display period that can hold one
                // layer frame.
                let fits_one = display_period.saturating_add(PERIOD_MARGIN_NANOS);
                let multiplier = if layer_period > fits_one {
                    (layer_period - PERIOD_MARGIN_NANOS - 1) / display_period + 1
                } else {
                    1
                };
                let actual = display_period.saturating_mul(multiplier);
                let ratio = layer_period as f32 / actual as f32;
                if ratio < 1.0 { ratio } else { 1.0 }
            }
            LayerVoteType::ExplicitExactOrMultiple => {
                let ratio = rate.fps / layer.desired_fps;
                let multiple = round_f32(ratio);
                if multiple >= 1.0 && abs_f32(ratio - multiple) <= self.config.exact_multiple_tolerance
                {
                    return 1.0;
                }
                cadence_score(layer_period, display_period)
            }
            LayerVoteType::Heuristic => cadence_score(layer_period, display_period),
            LayerVoteType::NoVote | LayerVoteType::Min | LayerVoteType::Max => 0.0,
        }
    }
}

/// Splits a layer period into whole display frames plus a remainder, snapping
/// remainders within [`PERIOD_MARGIN_NANOS`] of a frame boundary.
fn display_frames(layer_period: i64, display_period: i64) -> (i64, i64) {
    let mut quot = layer_period / display_period;
    let mut rem = layer_period % display_period;
    if rem <= PERIOD_MARGIN_NANOS {
        rem = 0;
    } else if display_period - rem <= PERIOD_MARGIN_NANOS {
        quot += 1;
        rem = 0;
    }
    (quot, rem)
}

/// Scores the cadence a layer would get on a display period.
///
/// An even cadence scores 1. A layer faster than the display scores by how
/// much of its rate survives. Otherwise the score falls with the number of
/// display frames needed before the uneven pattern repeats.
fn cadence_score(layer_period: i64, display_period: i64) -> f32 {
    let (quot, rem) = display_frames(layer_period, display_period);
    if rem == 0 {
        return 1.0;
    }
    if quot == 0 {
        return (layer_period as f32 / display_period as f32) / (MAX_FRAMES_TO_FIT + 1) as f32;
    }
    let mut diff = (rem - (display_period - rem)).abs();
    let mut iter = 2_i64;
    while diff > PERIOD_MARGIN_NANOS && iter < MAX_FRAMES_TO_FIT {
        diff -= display_period - diff;
        iter += 1;
    }
    1.0 / iter as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh_rate::{ConfigId, DisplayConfig};
    use alloc::vec;
    use alloc::vec::Vec;

    const VSYNC_30: i64 = 33_333_333;
    const VSYNC_60: i64 = 16_666_666;
    const VSYNC_72: i64 = 13_888_888;
    const VSYNC_90: i64 = 11_111_111;
    const VSYNC_120: i64 = 8_333_333;

    fn catalog(periods: &[i64]) -> RefreshRateCatalog {
        let configs: Vec<DisplayConfig> = periods
            .iter()
            .enumerate()
            .map(|(i, &p)| DisplayConfig::new(u32::try_from(i).unwrap(), 0, p))
            .collect();
        RefreshRateCatalog::new(&configs, ConfigId(0)).unwrap()
    }

    #[expect(clippy::cast_possible_truncation, reason = "test rates are small")]
    fn fps_of(rate: &RefreshRate) -> u32 {
        round_f32(rate.fps) as u32
    }

    fn layer(vote: LayerVoteType, fps: f32) -> LayerRequirement {
        LayerRequirement::new("test", vote, fps)
    }

    #[test]
    fn min_and_max_votes() {
        let catalog = catalog(&[VSYNC_60, VSYNC_90]);
        let agg = VoteAggregator::default();
        let min = agg.best_refresh_rate(&catalog, &[layer(LayerVoteType::Min, 0.0)], false);
        assert_eq!(fps_of(min), 60);
        let max = agg.best_refresh_rate(&catalog, &[layer(LayerVoteType::Max, 0.0)], false);
        assert_eq!(fps_of(max), 90);
    }

    #[test]
    fn heuristic_prefers_even_cadence() {
        let catalog = catalog(&[VSYNC_60, VSYNC_90]);
        let agg = VoteAggregator::default();
        for (fps, expected) in [(45.0, 90), (30.0, 60), (60.0, 60), (90.0, 90), (24.0, 60)] {
            let rate =
                agg.best_refresh_rate(&catalog, &[layer(LayerVoteType::Heuristic, fps)], false);
            assert_eq!(fps_of(rate), expected, "heuristic at {fps}");
        }
    }

    #[test]
    fn two_heuristic_layers_share_a_cover() {
        let catalog = catalog(&[VSYNC_30, VSYNC_60, VSYNC_72, VSYNC_90, VSYNC_120]);
        let agg = VoteAggregator::default();
        let rate = agg.best_refresh_rate(
            &catalog,
            &[
                layer(LayerVoteType::Heuristic, 24.0),
                layer(LayerVoteType::Heuristic, 60.0),
            ],
            false,
        );
        assert_eq!(fps_of(rate), 120);
        let rate = agg.best_refresh_rate(
            &catalog,
            &[
                layer(LayerVoteType::Heuristic, 24.0),
                layer(LayerVoteType::Heuristic, 48.0),
            ],
            false,
        );
        assert_eq!(fps_of(rate), 72);
    }

    #[test]
    fn exact_or_multiple_sweep_resolves_to_72() {
        let catalog = catalog(&[VSYNC_60, VSYNC_72, VSYNC_90]);
        let agg = VoteAggregator::default();
        for step in 0..=20 {
            let fps = 23.0 + step as f32 * 0.1;
            let rate = agg.best_refresh_rate(
                &catalog,
                &[layer(LayerVoteType::ExplicitExactOrMultiple, fps)],
                false,
            );
            assert_eq!(fps_of(rate), 72, "content at {fps}");
        }
    }

    #[test]
    fn explicit_default_renders_at_lowest_sufficient_rate() {
        let catalog = catalog(&[VSYNC_60, VSYNC_90]);
        let agg = VoteAggregator::default();
        let rate =
            agg.best_refresh_rate(&catalog, &[layer(LayerVoteType::ExplicitDefault, 90.0)], false);
        assert_eq!(fps_of(rate), 90);
        let rate =
            agg.best_refresh_rate(&catalog, &[layer(LayerVoteType::ExplicitDefault, 60.0)], false);
        assert_eq!(fps_of(rate), 60);
    }

    #[test]
    fn explicit_default_at_vanishing_rates_scores_without_looping() {
        let catalog = catalog(&[VSYNC_60, VSYNC_90]);
        let agg = VoteAggregator::default();
        for fps in [1e-9, 1e-12, f32::MIN_POSITIVE] {
            let slow = layer(LayerVoteType::ExplicitDefault, fps);
            for rate in catalog.available() {
                let score = agg.layer_score(&slow, rate);
                assert!((0.0..=1.0).contains(&score), "{fps} on {rate}: {score}");
            }
            let rate = agg.best_refresh_rate(&catalog, &[slow], false);
            assert!(matches!(fps_of(rate), 60 | 90), "{fps}: {rate}");
        }
    }

    #[test]
    fn explicit_default_multiplier_matches_frame_count() {
        let agg = VoteAggregator::default();
        let catalog = catalog(&[VSYNC_60]);
        let rate = catalog.available().next().unwrap();
        // 24 fps needs three 60 Hz frames; 30 fps fits two within the margin.
        let film = agg.layer_score(&layer(LayerVoteType::ExplicitDefault, 24.0), rate);
        assert!((film - fps_to_period(24.0) as f32 / (3 * VSYNC_60) as f32).abs() < 1e-6);
        let half = agg.layer_score(&layer(LayerVoteType::ExplicitDefault, 30.0), rate);
        assert_eq!(half, 1.0);
    }

    #[test]
    fn empty_votes_keep_current_unless_touched() {
        let catalog = catalog(&[VSYNC_60, VSYNC_90]);
        let agg = VoteAggregator::default();
        assert_eq!(fps_of(agg.best_refresh_rate(&catalog, &[], false)), 60);
        assert_eq!(fps_of(agg.best_refresh_rate(&catalog, &[], true)), 90);
        let no_votes = [layer(LayerVoteType::NoVote, 0.0)];
        assert_eq!(fps_of(agg.best_refresh_rate(&catalog, &no_votes, false)), 60);
    }

    #[test]
    fn max_vote_dominates() {
        let catalog = catalog(&[VSYNC_30, VSYNC_60, VSYNC_72, VSYNC_90, VSYNC_120]);
        let agg = VoteAggregator::default();
        let others = [
            layer(LayerVoteType::Min, 0.0),
            layer(LayerVoteType::Heuristic, 24.0),
            layer(LayerVoteType::ExplicitDefault, 30.0),
            layer(LayerVoteType::ExplicitExactOrMultiple, 48.0),
            layer(LayerVoteType::NoVote, 0.0),
        ];
        for n in 0..=others.len() {
            let mut layers = others[..n].to_vec();
            layers.push(layer(LayerVoteType::Max, 0.0));
            for touch in [false, true] {
                let rate = agg.best_refresh_rate(&catalog, &layers, touch);
                assert_eq!(rate, catalog.max_by_policy(), "{n} other layers, touch={touch}");
            }
        }
    }

    #[test]
    fn no_vote_layers_never_change_the_result() {
        let catalog = catalog(&[VSYNC_30, VSYNC_60, VSYNC_72, VSYNC_90, VSYNC_120]);
        let agg = VoteAggregator::default();
        let sets = [
            vec![],
            vec![layer(LayerVoteType::Heuristic, 45.0)],
            vec![layer(LayerVoteType::Min, 0.0)],
            vec![
                layer(LayerVoteType::ExplicitDefault, 30.0),
                layer(LayerVoteType::Heuristic, 24.0),
            ],
        ];
        for set in sets {
            for touch in [false, true] {
                let base = agg.best_refresh_rate(&catalog, &set, touch);
                let mut padded = set.clone();
                for _ in 0..3 {
                    padded.push(layer(LayerVoteType::NoVote, 120.0));
                    let rate = agg.best_refresh_rate(&catalog, &padded, touch);
                    assert_eq!(rate, base, "{set:?} touch={touch}");
                }
            }
        }
    }

    #[test]
    fn touch_never_lowers_the_rate() {
        let catalog = catalog(&[VSYNC_60, VSYNC_72, VSYNC_90, VSYNC_120]);
        let agg = VoteAggregator::default();
        let sets = [
            vec![],
            vec![layer(LayerVoteType::Heuristic, 30.0)],
            vec![layer(LayerVoteType::ExplicitDefault, 60.0)],
            vec![layer(LayerVoteType::ExplicitExactOrMultiple, 24.0)],
            vec![layer(LayerVoteType::Min, 0.0)],
            vec![
                layer(LayerVoteType::ExplicitDefault, 30.0),
                layer(LayerVoteType::Heuristic, 90.0),
            ],
        ];
        for set in sets {
            let idle = agg.best_refresh_rate(&catalog, &set, false);
            let touched = agg.best_refresh_rate(&catalog, &set, true);
            assert!(touched.fps >= idle.fps, "{set:?}: {touched} < {idle}");
        }
    }

    #[test]
    fn min_vote_policy_floor_vs_unanimous() {
        let catalog = catalog(&[VSYNC_60, VSYNC_90]);
        let layers = [
            layer(LayerVoteType::Min, 0.0),
            layer(LayerVoteType::ExplicitExactOrMultiple, 90.0),
        ];
        let floor = VoteAggregator::default();
        assert_eq!(fps_of(floor.best_refresh_rate(&catalog, &layers, false)), 60);

        let unanimous = VoteAggregator::new(VoteConfig {
            min_vote_policy: MinVotePolicy::Unanimous,
            ..VoteConfig::default()
        });
        assert_eq!(fps_of(unanimous.best_refresh_rate(&catalog, &layers, false)), 90);
        let all_min = [layer(LayerVoteType::Min, 0.0), layer(LayerVoteType::Min, 0.0)];
        assert_eq!(fps_of(unanimous.best_refresh_rate(&catalog, &all_min, false)), 60);
    }

    #[test]
    fn weight_scales_contribution() {
        let catalog = catalog(&[VSYNC_60, VSYNC_90]);
        let agg = VoteAggregator::default();
        let layers = [
            layer(LayerVoteType::Heuristic, 45.0).with_weight(0.2),
            layer(LayerVoteType::Heuristic, 30.0),
        ];
        // 30 fps fits both rates evenly, so even a light 45 fps layer tips
        // the choice to 90 Hz.
        assert_eq!(fps_of(agg.best_refresh_rate(&catalog, &layers, false)), 90);
        let layers = [
            layer(LayerVoteType::Heuristic, 45.0).with_weight(0.0),
            layer(LayerVoteType::Heuristic, 60.0),
        ];
        assert_eq!(fps_of(agg.best_refresh_rate(&catalog, &layers, false)), 60);
    }

    #[test]
    fn cadence_score_shapes() {
        assert_eq!(cadence_score(VSYNC_30 + 1, VSYNC_60), 1.0, "2:1 cadence");
        let faster = cadence_score(VSYNC_120, VSYNC_60);
        assert!(faster > 0.0 && faster < 0.1, "layer faster than display: {faster}");
        assert_eq!(cadence_score(fps_to_period(45.0), VSYNC_60), 1.0 / 3.0);
    }
}
