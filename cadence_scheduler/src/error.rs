// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scheduler error type.

use std::fmt;
use std::io;

use cadence_core::refresh_rate::{BAD_VALUE, CatalogError, PolicyError};

/// Errors returned by [`Scheduler`](crate::Scheduler) and
/// [`VsyncDistributor`](crate::VsyncDistributor).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SchedulerError {
    /// The handle was never issued or was already destroyed.
    InvalidHandle(u64),
    /// The catalog rejected a policy or config change.
    Policy(PolicyError),
    /// The display configs could not form a catalog.
    Catalog(CatalogError),
    /// A timer or event thread could not be spawned.
    Spawn(io::ErrorKind),
}

impl SchedulerError {
    /// Negative status code for C-style callers.
    #[must_use]
    pub const fn status(&self) -> i32 {
        match self {
            Self::InvalidHandle(_) | Self::Catalog(_) => BAD_VALUE,
            Self::Policy(err) => err.status(),
            // -ENOMEM
            Self::Spawn(_) => -12,
        }
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle(handle) => write!(f, "invalid handle {handle}"),
            Self::Policy(err) => write!(f, "policy rejected: {err}"),
            Self::Catalog(err) => write!(f, "bad display configs: {err}"),
            Self::Spawn(kind) => write!(f, "failed to spawn scheduler thread: {kind}"),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidHandle(_) | Self::Spawn(_) => None,
            Self::Policy(err) => Some(err),
            Self::Catalog(err) => Some(err),
        }
    }
}

impl From<PolicyError> for SchedulerError {
    fn from(err: PolicyError) -> Self {
        Self::Policy(err)
    }
}

impl From<CatalogError> for SchedulerError {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}

impl From<io::Error> for SchedulerError {
    fn from(err: io::Error) -> Self {
        Self::Spawn(err.kind())
    }
}
