//! # Staleness Policy
//!
//! Decides whether a cached node is fresh enough to answer a request
//! without calling the remote service.

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::Node;

/// How long a focus-cached node stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Every read refetches. Equivalent to always forcing.
    Always,
    /// Refetch once `now - last_read_at` exceeds the window.
    Window(TimeDelta),
    /// Never refetch a node once it has been fetched as a focus.
    Never,
}

impl StalenessPolicy {
    /// Build a policy from a configured number of hours.
    ///
    /// `0` means always stale; a negative value means never stale.
    #[must_use]
    pub fn from_hours(hours: i64) -> Self {
        match hours {
            0 => Self::Always,
            h if h < 0 => Self::Never,
            h => TimeDelta::try_hours(h).map_or(Self::Never, Self::Window),
        }
    }

    /// Whether a remote fetch is required before answering.
    #[must_use]
    pub fn needs_fetch(&self, cached: Option<&Node>, force: bool, now: DateTime<Utc>) -> bool {
        let Some(node) = cached else {
            return true;
        };
        if force || !node.is_focus_cached {
            return true;
        }
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Window(window) => now.signed_duration_since(node.last_read_at) > *window,
        }
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from_hours(24)
    }
}

// =============================================================================
// TESTS
// =============================================================================
