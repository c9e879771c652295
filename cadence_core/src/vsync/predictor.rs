// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Linear-regression vsync predictor.
//!
//! Accepted hardware vsync timestamps are fit to `t = slope * n + intercept`,
//! where `n` is each sample's vsync ordinal snapped to the ideal period. The
//! slope is the observed period. Ordinals are scaled by 10 so the mean keeps
//! one fixed-point fractional digit for the intercept.
//!
//! Each ideal period keeps its own fitted model in a small cache, so
//! switching back to a recently used refresh rate is accurate immediately.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::time::{Duration, HostTime, NANOS_PER_MILLI};

/// Maximum number of per-period models kept.
const RATE_MAP_LIMIT: usize = 30;

/// Fixed-point scale applied to ordinals.
const ORDINAL_SCALE: i64 = 10;

/// A sample this old means the model has to be refreshed.
const STALE_SAMPLE_NANOS: i64 = 500 * NANOS_PER_MILLI;

/// A fitted vsync model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncModel {
    /// Observed vsync period in nanoseconds.
    pub slope: i64,
    /// Offset of the fitted line relative to the oldest sample.
    pub intercept: i64,
}

impl VsyncModel {
    const fn ideal(period: i64) -> Self {
        Self {
            slope: period,
            intercept: 0,
        }
    }
}

/// Why a timestamp was not added to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleRejection {
    /// Not after the last accepted sample.
    OutOfOrder,
    /// Phase too far from the last accepted sample.
    Outlier,
}

/// Fits hardware vsync timestamps and predicts future vsyncs.
#[derive(Clone, Debug)]
pub struct VsyncPredictor {
    history_size: usize,
    min_samples: usize,
    outlier_tolerance_percent: i64,
    ideal_period: i64,
    timestamps: Vec<i64>,
    last_index: Option<usize>,
    known_timestamp: Option<i64>,
    rate_map: BTreeMap<i64, VsyncModel>,
}

impl VsyncPredictor {
    /// Creates a predictor for `ideal_period`.
    ///
    /// `outlier_tolerance_percent` is clamped to 100.
    #[must_use]
    pub fn new(
        ideal_period: Duration,
        history_size: usize,
        min_samples: usize,
        outlier_tolerance_percent: u32,
    ) -> Self {
        let ideal_period = ideal_period.nanos().max(1);
        let mut rate_map = BTreeMap::new();
        rate_map.insert(ideal_period, VsyncModel::ideal(ideal_period));
        Self {
            history_size: history_size.max(2),
            min_samples: min_samples.max(2),
            outlier_tolerance_percent: i64::from(outlier_tolerance_percent.min(100)),
            ideal_period,
            timestamps: Vec::with_capacity(history_size.max(2)),
            last_index: None,
            known_timestamp: None,
            rate_map,
        }
    }

    /// Returns the model for the current ideal period.
    #[must_use]
    pub fn model(&self) -> VsyncModel {
        self.rate_map
            .get(&self.ideal_period)
            .copied()
            .unwrap_or(VsyncModel::ideal(self.ideal_period))
    }

    /// Returns the fitted period for the current ideal period.
    #[must_use]
    pub fn current_period(&self) -> Duration {
        Duration(self.model().slope)
    }

    /// Returns the period the hardware was configured with.
    #[must_use]
    pub const fn ideal_period(&self) -> Duration {
        Duration(self.ideal_period)
    }

    /// Returns the number of samples currently in the fit.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.timestamps.len()
    }

    fn last_timestamp(&self) -> Option<i64> {
        self.last_index.map(|i| self.timestamps[i])
    }

    fn validate(&self, timestamp: i64) -> Result<(), SampleRejection> {
        let Some(last) = self.last_timestamp() else {
            return Ok(());
        };
        if timestamp <= last {
            return Err(SampleRejection::OutOfOrder);
        }
        let percent = (timestamp - last) % self.ideal_period * 100 / self.ideal_period;
        if percent < self.outlier_tolerance_percent
            || percent > 100 - self.outlier_tolerance_percent
        {
            Ok(())
        } else {
            Err(SampleRejection::Outlier)
        }
    }

    /// Adds a hardware vsync timestamp and refits the model.
    pub fn add_vsync_timestamp(&mut self, timestamp: HostTime) -> Result<(), SampleRejection> {
        let ts = timestamp.nanos();
        if let Err(reason) = self.validate(ts) {
            tracing::warn!(timestamp = ts, ?reason, "dropping vsync sample");
            return Err(reason);
        }

        if self.timestamps.len() < self.history_size {
            self.timestamps.push(ts);
            self.last_index = Some(self.timestamps.len() - 1);
        } else {
            let next = self.last_index.map_or(0, |i| (i + 1) % self.timestamps.len());
            self.timestamps[next] = ts;
            self.last_index = Some(next);
        }

        let ideal = self.ideal_period;
        if self.timestamps.len() < self.min_samples {
            self.rate_map.insert(ideal, VsyncModel::ideal(ideal));
            return Ok(());
        }

        let model = self.fit();
        self.rate_map.insert(ideal, model);
        tracing::trace!(
            timestamp = ts,
            slope = model.slope,
            intercept = model.intercept,
            "vsync model update"
        );
        Ok(())
    }

    fn fit(&self) -> VsyncModel {
        let Some(&oldest) = self.timestamps.iter().min() else {
            return VsyncModel::ideal(self.ideal_period);
        };
        let period = self.model().slope.max(1);
        let n = self.timestamps.len() as i64;

        let offsets = self.timestamps.iter().map(|&t| t - oldest);
        let ordinals = offsets
            .clone()
            .map(|ts| ((ts + period / 2) / period) * ORDINAL_SCALE);

        let mean_ts = offsets.clone().sum::<i64>() / n;
        let mean_ord = ordinals.clone().sum::<i64>() / n;

        let (top, bottom) = offsets.zip(ordinals).fold((0_i64, 0_i64), |(top, bottom), (ts, ord)| {
            let dt = ts - mean_ts;
            let dn = ord - mean_ord;
            (top + dt * dn, bottom + dn * dn)
        });

        if bottom == 0 {
            return VsyncModel::ideal(self.ideal_period);
        }
        let slope = top / bottom * ORDINAL_SCALE;
        if slope <= 0 {
            return VsyncModel::ideal(self.ideal_period);
        }
        let intercept = mean_ts - slope * mean_ord / ORDINAL_SCALE;
        VsyncModel { slope, intercept }
    }

    /// Predicts the first vsync strictly after `time_point`.
    ///
    /// At or after the newest sample, the vsync that sample reported is never
    /// returned again, even if the refit places it slightly later.
    #[must_use]
    pub fn next_anticipated_vsync_from(&self, time_point: HostTime) -> HostTime {
        let t = time_point.nanos();
        let VsyncModel { slope, intercept } = self.model();

        let Some(&oldest) = self.timestamps.iter().min() else {
            let known = self.known_timestamp.unwrap_or(t);
            let periods_out = (t - known).div_euclid(self.ideal_period) + 1;
            return HostTime(known + periods_out * self.ideal_period);
        };

        let zero_point = oldest + intercept;
        let ordinal = (t - zero_point + slope).div_euclid(slope);
        let mut prediction = ordinal * slope + intercept + oldest;
        while prediction <= t {
            prediction += slope;
        }
        // The newest sample is itself a vsync. Once it has been seen, a refit
        // that places that vsync after the sample must not offer it again.
        if let Some(last) = self.last_timestamp()
            && t >= last
        {
            while prediction <= last + slope / 2 {
                prediction += slope;
            }
        }
        HostTime(prediction)
    }

    /// Switches the ideal period.
    ///
    /// The newest sample is kept as an anchor for predictions until fresh
    /// samples arrive; the sample history is discarded.
    pub fn set_period(&mut self, period: Duration) {
        let period = period.nanos().max(1);
        if self.rate_map.len() >= RATE_MAP_LIMIT && !self.rate_map.contains_key(&period) {
            self.rate_map.pop_first();
        }
        self.ideal_period = period;
        self.rate_map
            .entry(period)
            .or_insert(VsyncModel::ideal(period));

        if let Some(&newest) = self.timestamps.iter().max() {
            self.known_timestamp = Some(newest);
            self.timestamps.clear();
            self.last_index = None;
        }
    }

    /// Returns `true` if the model is not trustworthy at `now`.
    #[must_use]
    pub fn needs_more_samples(&self, now: HostTime) -> bool {
        if self.timestamps.len() < self.min_samples {
            return true;
        }
        match self.last_timestamp() {
            Some(last) => last + STALE_SAMPLE_NANOS <= now.nanos(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: i64 = 16_666_667;

    fn predictor() -> VsyncPredictor {
        VsyncPredictor::new(Duration(PERIOD), 20, 6, 25)
    }

    #[test]
    fn no_samples_predicts_from_ideal_period() {
        let p = predictor();
        assert_eq!(p.next_anticipated_vsync_from(HostTime(1000)), HostTime(1000 + PERIOD));
        assert!(p.needs_more_samples(HostTime(0)));
        assert_eq!(p.current_period(), Duration(PERIOD));
    }

    #[test]
    fn exact_samples_lock_onto_period_and_phase() {
        let mut p = predictor();
        let base = 1_000_000_000;
        for i in 0..10 {
            p.add_vsync_timestamp(HostTime(base + i * PERIOD)).unwrap();
        }
        let model = p.model();
        assert!((model.slope - PERIOD).abs() < 10, "slope {}", model.slope);
        let last = base + 9 * PERIOD;
        let next = p.next_anticipated_vsync_from(HostTime(last + 1));
        assert!((next.nanos() - (last + PERIOD)).abs() < 100, "next {next:?}");
        assert!(!p.needs_more_samples(HostTime(last)));
        assert!(p.needs_more_samples(HostTime(last + 500 * NANOS_PER_MILLI)), "stale");
    }

    #[test]
    fn faster_hardware_is_learned() {
        let mut p = predictor();
        let actual = PERIOD - 100_000;
        for i in 0..12 {
            p.add_vsync_timestamp(HostTime(i * actual)).unwrap();
        }
        assert!((p.current_period().nanos() - actual).abs() < 1000);
    }

    #[test]
    fn out_of_order_and_outliers_are_dropped() {
        let mut p = predictor();
        p.add_vsync_timestamp(HostTime(10 * PERIOD)).unwrap();
        assert_eq!(
            p.add_vsync_timestamp(HostTime(10 * PERIOD)),
            Err(SampleRejection::OutOfOrder)
        );
        assert_eq!(
            p.add_vsync_timestamp(HostTime(9 * PERIOD)),
            Err(SampleRejection::OutOfOrder)
        );
        assert_eq!(
            p.add_vsync_timestamp(HostTime(10 * PERIOD + PERIOD / 2)),
            Err(SampleRejection::Outlier)
        );
        assert_eq!(p.sample_count(), 1);
        assert!(p.add_vsync_timestamp(HostTime(11 * PERIOD + 1000)).is_ok());
    }

    #[test]
    fn prediction_is_strictly_after_time_point() {
        let mut p = predictor();
        for i in 0..8 {
            p.add_vsync_timestamp(HostTime(i * PERIOD)).unwrap();
        }
        for t in [0, 1, PERIOD - 1, PERIOD, 5 * PERIOD + 3, 100 * PERIOD] {
            let next = p.next_anticipated_vsync_from(HostTime(t));
            assert!(next.nanos() > t, "{next:?} <= {t}");
            assert!(next.nanos() - t <= PERIOD + 100, "{next:?} too far past {t}");
        }
    }

    #[test]
    fn early_sample_does_not_reoffer_its_own_vsync() {
        let mut p = predictor();
        for i in 0..8 {
            p.add_vsync_timestamp(HostTime(i * PERIOD)).unwrap();
        }
        // Reported a tenth of a period early; the refit keeps that vsync
        // after the sample.
        let early = HostTime(8 * PERIOD - PERIOD / 10);
        p.add_vsync_timestamp(early).unwrap();
        let next = p.next_anticipated_vsync_from(early);
        assert!(next.nanos() > 8 * PERIOD + PERIOD / 2, "{next:?}");
        assert!((next.nanos() - 9 * PERIOD).abs() < PERIOD / 10, "{next:?}");
    }

    #[test]
    fn set_period_anchors_on_newest_sample() {
        let mut p = predictor();
        for i in 0..8 {
            p.add_vsync_timestamp(HostTime(i * PERIOD)).unwrap();
        }
        let newest = 7 * PERIOD;
        let new_period = 11_111_111;
        p.set_period(Duration(new_period));
        assert_eq!(p.sample_count(), 0);
        assert_eq!(p.current_period(), Duration(new_period));
        assert_eq!(
            p.next_anticipated_vsync_from(HostTime(newest)),
            HostTime(newest + new_period)
        );
        assert_eq!(
            p.next_anticipated_vsync_from(HostTime(newest + new_period)),
            HostTime(newest + 2 * new_period)
        );
    }

    #[test]
    fn returning_to_a_period_restores_its_model() {
        let mut p = predictor();
        let actual = PERIOD + 50_000;
        for i in 0..10 {
            p.add_vsync_timestamp(HostTime(i * actual)).unwrap();
        }
        let learned = p.current_period();
        p.set_period(Duration(11_111_111));
        p.set_period(Duration(PERIOD));
        assert_eq!(p.current_period(), learned);
    }

    #[test]
    fn rate_map_is_bounded() {
        let mut p = predictor();
        for i in 0..40 {
            p.set_period(Duration(10_000_000 + i));
        }
        assert!(p.rate_map.len() <= RATE_MAP_LIMIT);
        assert_eq!(p.current_period(), Duration(10_000_039));
    }
}
