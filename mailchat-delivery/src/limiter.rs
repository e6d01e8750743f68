//! Per-destination admission control
//!
//! Every destination key gets a counting semaphore sized to its concurrency
//! limit and, when a rate is configured, a sliding window of recent attempt
//! starts. An attempt may start only when both admit it; the permit it
//! receives releases the concurrency slot when dropped.
//!
//! Window timestamps come from the caller, so the scheduler can be driven by
//! a simulated clock.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::limits::{DestinationLimits, Limits, Rate};

#[derive(Debug)]
struct Destination {
    slots: Arc<Semaphore>,
    limits: Limits,
    starts: Mutex<VecDeque<SystemTime>>,
}

impl Destination {
    fn new(limits: Limits) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limits.concurrency)),
            limits,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Forget starts that left the window ending at `now`.
    fn expire(starts: &mut VecDeque<SystemTime>, rate: Rate, now: SystemTime) {
        while let Some(start) = starts.front()
            && now.duration_since(*start).unwrap_or_default() >= rate.interval
        {
            starts.pop_front();
        }
    }
}

/// Why an attempt could not start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    /// Every concurrency slot of the destination is taken.
    Concurrency,
    /// The rate window is full; a slot frees up after the given delay.
    Rate(Duration),
}

/// Held for the duration of an attempt.
#[derive(Debug)]
pub struct Permit {
    _slot: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct Limiter {
    limits: DestinationLimits,
    destinations: DashMap<String, Arc<Destination>>,
}

impl Limiter {
    #[must_use]
    pub fn new(limits: DestinationLimits) -> Self {
        Self {
            limits,
            destinations: DashMap::new(),
        }
    }

    fn destination(&self, key: &str) -> Arc<Destination> {
        Arc::clone(
            self.destinations
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Destination::new(self.limits.get(key))))
                .value(),
        )
    }

    /// Admit one attempt start for `key` at `now`.
    ///
    /// # Errors
    ///
    /// Returns the limit that refused the start; nothing is recorded then.
    pub fn try_acquire(&self, key: &str, now: SystemTime) -> Result<Permit, Blocked> {
        let destination = self.destination(key);
        let mut starts = destination.starts.lock();

        if let Some(rate) = destination.limits.rate {
            Destination::expire(&mut starts, rate, now);
            if starts.len() >= usize::try_from(rate.count).unwrap_or(usize::MAX) {
                let wait = starts.front().map_or(Duration::ZERO, |oldest| {
                    rate.interval
                        .saturating_sub(now.duration_since(*oldest).unwrap_or_default())
                });
                tracing::debug!(
                    domain = %key,
                    wait_seconds = wait.as_secs_f64(),
                    "Rate limit reached, delaying attempt"
                );
                return Err(Blocked::Rate(wait));
            }
        }

        let slot = Arc::clone(&destination.slots)
            .try_acquire_owned()
            .map_err(|_| Blocked::Concurrency)?;

        if destination.limits.rate.is_some() {
            starts.push_back(now);
        }

        Ok(Permit { _slot: slot })
    }

    /// Forget destinations with no attempt running and no start left in
    /// their rate window at `now`.
    ///
    /// A destination whose state is shared with a caller of
    /// [`Limiter::try_acquire`] at that moment is kept.
    pub fn evict_idle(&self, now: SystemTime) {
        self.destinations.retain(|_, destination| {
            if Arc::strong_count(destination) > 1
                || destination.slots.available_permits() < destination.limits.concurrency
            {
                return true;
            }

            let mut starts = destination.starts.lock();
            if let Some(rate) = destination.limits.rate {
                Destination::expire(&mut starts, rate, now);
            }
            !starts.is_empty()
        });
    }

    /// Destinations currently tracked
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.destinations.len()
    }

    /// Attempts currently holding a slot for `key`.
    #[must_use]
    pub fn in_flight(&self, key: &str) -> usize {
        self.destinations.get(key).map_or(0, |destination| {
            destination
                .limits
                .concurrency
                .saturating_sub(destination.slots.available_permits())
        })
    }

    #[must_use]
    pub const fn limits(&self) -> &DestinationLimits {
        &self.limits
    }
}
