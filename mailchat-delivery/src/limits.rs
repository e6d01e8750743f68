//! Per-destination delivery limits
//!
//! A destination key (the recipient domain) may override the queue-wide
//! concurrency and start rate:
//!
//! ```ron
//! (name: "destination", args: ["b.com"], children: [
//!     (name: "concurrency", args: ["1"]),
//!     (name: "rate", args: ["10", "1m"]),
//! ])
//! ```

use std::time::Duration;

use ahash::AHashMap;

/// At most `count` attempt starts within any window of `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub count: u32,
    pub interval: Duration,
}

/// Limits applied to one destination key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of in-flight attempts.
    pub concurrency: usize,

    /// Maximum start rate; `None` is unlimited.
    pub rate: Option<Rate>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rate: None,
        }
    }
}

const fn default_concurrency() -> usize {
    16
}

/// Queue-wide limits plus per-destination overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationLimits {
    default: Limits,
    overrides: AHashMap<String, Limits>,
}

impl DestinationLimits {
    #[must_use]
    pub fn new(default: Limits) -> Self {
        Self {
            default,
            overrides: AHashMap::new(),
        }
    }

    /// Add or replace the limits of `key`.
    pub fn insert(&mut self, key: &str, limits: Limits) {
        self.overrides.insert(key.to_ascii_lowercase(), limits);
    }

    /// Limits for `key`, falling back to the queue-wide ones.
    #[must_use]
    pub fn get(&self, key: &str) -> Limits {
        self.overrides.get(key).copied().unwrap_or(self.default)
    }

    #[must_use]
    pub fn has_override(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    #[must_use]
    pub const fn default_limits(&self) -> Limits {
        self.default
    }
}
