// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Refresh-rate catalog and allowed-range policy.
//!
//! A [`RefreshRateCatalog`] is built once from the hardware's display
//! configs. Each config becomes an immutable [`RefreshRate`]. A [`Policy`]
//! narrows the catalog to an allowed fps range within the config group of a
//! preferred default config; every policy-aware query answers from that
//! allowed set.
//!
//! The hardware's actual active config is tracked separately through
//! [`RefreshRateCatalog::set_current_config_id`], so
//! [`RefreshRateCatalog::current`] reflects hardware truth even while a
//! policy change is in flight.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::time::{Duration, abs_f32, period_to_fps, round_f32};

/// Tolerance used when filtering configs against the policy range.
///
/// Absorbs float rounding from the period to fps conversion.
pub const POLICY_FILTER_EPSILON: f32 = 0.01;

/// Tolerance used when validating that a default config sits inside a range.
pub const IN_POLICY_EPSILON: f32 = 0.001;

/// Opaque handle of a hardware display config.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConfigId(pub u32);

impl fmt::Debug for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigId({})", self.0)
    }
}

/// Hardware-defined group of configs switchable without a visible glitch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConfigGroup(pub u32);

impl fmt::Debug for ConfigGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigGroup({})", self.0)
    }
}

/// One hardware config as reported by the display HAL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayConfig {
    /// Config handle.
    pub config_id: ConfigId,
    /// Seamless-switching group.
    pub config_group: ConfigGroup,
    /// Vsync period of the config.
    pub vsync_period: Duration,
}

impl DisplayConfig {
    /// Creates a config description.
    #[must_use]
    pub const fn new(config_id: u32, config_group: u32, vsync_period_nanos: i64) -> Self {
        Self {
            config_id: ConfigId(config_id),
            config_group: ConfigGroup(config_group),
            vsync_period: Duration(vsync_period_nanos),
        }
    }
}

/// A hardware-supported display mode.
///
/// `fps` is derived from the period once at construction. Equality covers
/// the id, the period and the group; `name` and `fps` are descriptive.
#[derive(Clone, Debug)]
pub struct RefreshRate {
    /// Config handle.
    pub config_id: ConfigId,
    /// Vsync period.
    pub vsync_period: Duration,
    /// Seamless-switching group.
    pub config_group: ConfigGroup,
    /// Human-readable name, e.g. `"60fps"`.
    pub name: String,
    /// Frames per second.
    pub fps: f32,
}

impl RefreshRate {
    /// Builds a refresh rate from a config, deriving `fps` and `name`.
    #[must_use]
    pub fn from_config(config: &DisplayConfig) -> Self {
        let fps = period_to_fps(config.vsync_period.nanos());
        Self {
            config_id: config.config_id,
            vsync_period: config.vsync_period,
            config_group: config.config_group,
            name: format!("{fps:2.0}fps"),
            fps,
        }
    }

    /// Returns `true` if `fps` lies in `[min, max]` within
    /// [`IN_POLICY_EPSILON`].
    #[inline]
    #[must_use]
    pub fn in_policy(&self, min_fps: f32, max_fps: f32) -> bool {
        self.fps >= min_fps - IN_POLICY_EPSILON && self.fps <= max_fps + IN_POLICY_EPSILON
    }

    fn in_filter_range(&self, min_fps: f32, max_fps: f32) -> bool {
        self.fps >= min_fps - POLICY_FILTER_EPSILON && self.fps <= max_fps + POLICY_FILTER_EPSILON
    }
}

impl PartialEq for RefreshRate {
    fn eq(&self, other: &Self) -> bool {
        self.config_id == other.config_id
            && self.vsync_period == other.vsync_period
            && self.config_group == other.config_group
    }
}

impl Eq for RefreshRate {}

impl fmt::Display for RefreshRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The allowed refresh-rate range plus a preferred default config.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Policy {
    /// Preferred config. Its group scopes every policy query.
    pub default_config: ConfigId,
    /// Lowest allowed fps.
    pub min_fps: f32,
    /// Highest allowed fps.
    pub max_fps: f32,
}

impl Policy {
    /// A policy that allows every rate in the default config's group.
    #[must_use]
    pub const fn unbounded(default_config: ConfigId) -> Self {
        Self {
            default_config,
            min_fps: 0.0,
            max_fps: f32::MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Status code returned for rejected arguments.
pub const BAD_VALUE: i32 = -22;

/// Errors from building a [`RefreshRateCatalog`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatalogError {
    /// No configs were supplied.
    Empty,
    /// The initial active config is not among the supplied configs.
    UnknownInitialConfig(ConfigId),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("refresh-rate catalog needs at least one config"),
            Self::UnknownInitialConfig(id) => {
                write!(f, "initial config {} is not in the catalog", id.0)
            }
        }
    }
}

impl core::error::Error for CatalogError {}

/// Errors from [`RefreshRateCatalog::set_policy`] and config lookups.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PolicyError {
    /// The config id is not in the catalog.
    UnknownConfig(ConfigId),
    /// `min_fps > max_fps`, or either bound is NaN.
    InvertedRange {
        /// Requested lower bound.
        min_fps: f32,
        /// Requested upper bound.
        max_fps: f32,
    },
    /// The default config's rate does not lie inside the requested range.
    DefaultOutsideRange {
        /// Requested default config.
        config_id: ConfigId,
        /// Rate of the requested default config.
        fps: f32,
    },
}

impl PolicyError {
    /// Returns the negative status code for this rejection.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> i32 {
        BAD_VALUE
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConfig(id) => write!(f, "unknown config {}", id.0),
            Self::InvertedRange { min_fps, max_fps } => {
                write!(f, "invalid fps range [{min_fps}, {max_fps}]")
            }
            Self::DefaultOutsideRange { config_id, fps } => write!(
                f,
                "default config {} ({fps:.2} fps) is outside the requested range",
                config_id.0
            ),
        }
    }
}

impl core::error::Error for PolicyError {}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Registry of the display's refresh rates and the active policy.
#[derive(Clone, Debug)]
pub struct RefreshRateCatalog {
    /// All rates, sorted by ascending fps.
    rates: Vec<RefreshRate>,
    /// Indices into `rates` allowed by `policy`, ascending fps.
    available: Vec<usize>,
    current: usize,
    policy: Policy,
    switching: bool,
}

impl RefreshRateCatalog {
    /// Builds a catalog with refresh-rate switching enabled whenever more
    /// than one config exists.
    pub fn new(configs: &[DisplayConfig], current: ConfigId) -> Result<Self, CatalogError> {
        Self::with_switching(configs, current, true)
    }

    /// Builds a catalog, optionally forcing refresh-rate switching off.
    pub fn with_switching(
        configs: &[DisplayConfig],
        current: ConfigId,
        switching: bool,
    ) -> Result<Self, CatalogError> {
        if configs.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut rates: Vec<RefreshRate> = configs.iter().map(RefreshRate::from_config).collect();
        // Longest period first is lowest fps first.
        rates.sort_by(|a, b| b.vsync_period.cmp(&a.vsync_period));

        let current_idx = rates
            .iter()
            .position(|r| r.config_id == current)
            .ok_or(CatalogError::UnknownInitialConfig(current))?;

        let switching = switching && rates.len() > 1;
        let mut catalog = Self {
            rates,
            available: Vec::new(),
            current: current_idx,
            policy: Policy::unbounded(current),
            switching,
        };
        catalog.rebuild_available();
        Ok(catalog)
    }

    /// Returns every rate in the catalog, ascending fps.
    #[inline]
    #[must_use]
    pub fn all(&self) -> &[RefreshRate] {
        &self.rates
    }

    /// Returns the rate for a config id.
    #[must_use]
    pub fn by_id(&self, id: ConfigId) -> Option<&RefreshRate> {
        self.rates.iter().find(|r| r.config_id == id)
    }

    /// Returns the lowest rate the hardware supports.
    #[inline]
    #[must_use]
    pub fn min_supported(&self) -> &RefreshRate {
        &self.rates[0]
    }

    /// Returns the highest rate the hardware supports.
    #[inline]
    #[must_use]
    pub fn max_supported(&self) -> &RefreshRate {
        &self.rates[self.rates.len() - 1]
    }

    /// Returns `true` if this display can change refresh rate at runtime.
    #[inline]
    #[must_use]
    pub const fn refresh_rate_switching_supported(&self) -> bool {
        self.switching
    }

    /// Returns the active policy.
    #[inline]
    #[must_use]
    pub const fn policy(&self) -> Policy {
        self.policy
    }

    /// Returns the rates allowed by the active policy, ascending fps.
    pub fn available(&self) -> impl DoubleEndedIterator<Item = &RefreshRate> + '_ {
        self.available.iter().map(|&i| &self.rates[i])
    }

    /// Returns the lowest rate allowed by the active policy.
    #[must_use]
    pub fn min_by_policy(&self) -> &RefreshRate {
        &self.rates[self.available[0]]
    }

    /// Returns the highest rate allowed by the active policy.
    #[must_use]
    pub fn max_by_policy(&self) -> &RefreshRate {
        &self.rates[self.available[self.available.len() - 1]]
    }

    /// Returns the hardware's active rate.
    #[inline]
    #[must_use]
    pub fn current(&self) -> &RefreshRate {
        &self.rates[self.current]
    }

    /// Returns the active rate if the policy allows it, otherwise the policy
    /// default.
    #[must_use]
    pub fn current_by_policy(&self) -> &RefreshRate {
        if self.available.contains(&self.current) {
            return self.current();
        }
        self.by_id(self.policy.default_config)
            .unwrap_or_else(|| self.current())
    }

    /// Returns `true` if the active policy allows `id`.
    #[must_use]
    pub fn is_config_allowed(&self, id: ConfigId) -> bool {
        self.available().any(|r| r.config_id == id)
    }

    /// Records the config the hardware is actually running.
    pub fn set_current_config_id(&mut self, id: ConfigId) -> Result<(), PolicyError> {
        let idx = self
            .rates
            .iter()
            .position(|r| r.config_id == id)
            .ok_or(PolicyError::UnknownConfig(id))?;
        self.current = idx;
        Ok(())
    }

    /// Replaces the active policy.
    ///
    /// Returns `Ok(true)` if the policy changed, `Ok(false)` if it was
    /// identical to the active one. On error nothing is modified.
    pub fn set_policy(
        &mut self,
        default_config: ConfigId,
        min_fps: f32,
        max_fps: f32,
    ) -> Result<bool, PolicyError> {
        let requested = Policy {
            default_config,
            min_fps,
            max_fps,
        };
        if requested == self.policy {
            return Ok(false);
        }
        // `!(a <= b)` also rejects NaN bounds.
        if !(min_fps <= max_fps) {
            return Err(PolicyError::InvertedRange { min_fps, max_fps });
        }
        let default = self
            .by_id(default_config)
            .ok_or(PolicyError::UnknownConfig(default_config))?;
        if !default.in_policy(min_fps, max_fps) {
            return Err(PolicyError::DefaultOutsideRange {
                config_id: default_config,
                fps: default.fps,
            });
        }
        self.policy = requested;
        self.rebuild_available();
        Ok(true)
    }

    /// Returns the allowed rate whose fps is closest to `target`.
    ///
    /// Exact ties resolve to the higher fps.
    #[must_use]
    pub fn nearest_to_fps(&self, target: f32) -> &RefreshRate {
        let mut best = self.min_by_policy();
        let mut best_dist = abs_f32(best.fps - target);
        for rate in self.available() {
            let dist = abs_f32(rate.fps - target);
            // Ascending scan: `<=` lets the later, higher rate win a tie.
            if dist <= best_dist {
                best = rate;
                best_dist = dist;
            }
        }
        best
    }

    /// Picks the allowed rate that best presents content at `content_fps`.
    ///
    /// Starts from the nearest rate. If that rate is not close to an integer
    /// multiple of the content rate, walks upward to the first one that is
    /// (45 fps content prefers 90 Hz over 60 Hz). Keeps the nearest rate
    /// when none align. Non-positive content rates map to the policy max.
    #[must_use]
    pub fn refresh_rate_for_content(&self, content_fps: f32) -> &RefreshRate {
        const MARGIN: f32 = 0.05;
        if content_fps <= 0.0 {
            return self.max_by_policy();
        }

        let mut nearest_pos = 0;
        let mut nearest_dist = f32::MAX;
        for (pos, rate) in self.available().enumerate() {
            let dist = abs_f32(rate.fps - content_fps);
            if dist < nearest_dist {
                nearest_dist = dist;
                nearest_pos = pos;
            }
        }

        let aligned = |rate: &RefreshRate| {
            let ratio = rate.fps / content_fps;
            abs_f32(round_f32(ratio) - ratio) <= MARGIN
        };

        let nearest = &self.rates[self.available[nearest_pos]];
        if aligned(nearest) {
            return nearest;
        }
        self.available()
            .skip(nearest_pos)
            .find(|rate| aligned(rate))
            .unwrap_or(nearest)
    }

    fn rebuild_available(&mut self) {
        let group = self
            .by_id(self.policy.default_config)
            .map(|r| r.config_group);
        let Policy {
            min_fps, max_fps, ..
        } = self.policy;
        self.available = self
            .rates
            .iter()
            .enumerate()
            .filter(|(_, r)| Some(r.config_group) == group && r.in_filter_range(min_fps, max_fps))
            .map(|(i, _)| i)
            .collect();
        if self.available.is_empty() {
            tracing::warn!(
                min_fps,
                max_fps,
                "no config matches the policy; allowing every config"
            );
            self.available = (0..self.rates.len()).collect();
        }
    }
}
