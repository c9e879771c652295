// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display identification and per-display context.
//!
//! [`DisplayId`] is the hardware composer's handle for a physical display.
//! Virtual or otherwise non-HWC displays have no id.
//!
//! [`DisplayContext`] is the explicit bundle of per-display facts that the
//! scheduler and composition stages need. It is passed by value into each
//! component so several simulated displays can coexist in one process.

use alloc::string::String;
use core::fmt;

/// Identifies a physical display known to the hardware composer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DisplayId(pub u64);

impl fmt::Debug for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayId({})", self.0)
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-display facts threaded explicitly through the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayContext {
    /// Hardware composer identity, or `None` for virtual displays.
    pub hwc_id: Option<DisplayId>,
    /// Human-readable name used in logs and dumps.
    pub name: String,
    /// Whether this display drives the primary vsync timeline.
    pub is_primary: bool,
}

impl DisplayContext {
    /// Context for a physical display with hardware composition.
    #[must_use]
    pub fn physical(id: DisplayId, name: impl Into<String>) -> Self {
        Self {
            hwc_id: Some(id),
            name: name.into(),
            is_primary: true,
        }
    }

    /// Context for a virtual display composed entirely on the GPU.
    #[must_use]
    pub fn virtual_display(name: impl Into<String>) -> Self {
        Self {
            hwc_id: None,
            name: name.into(),
            is_primary: false,
        }
    }

    /// Returns `true` when the hardware composer knows this display.
    #[inline]
    #[must_use]
    pub const fn has_hwc(&self) -> bool {
        self.hwc_id.is_some()
    }
}
