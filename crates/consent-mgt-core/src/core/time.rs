// consent-mgt-core/src/core/time.rs
// ============================================================================
// Module: Consent Time Model
// Description: Epoch-second clock abstraction for consent timestamps.
// Purpose: Keep wall-clock reads injectable so lifecycle checks are testable.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Consent timestamps (`createdTime`, `updatedTime`, `validityTime`, audit and
//! history times) are unix epoch seconds. Runtime services never read the wall
//! clock directly; they ask a [`Clock`] owned by the composition root.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use time::OffsetDateTime;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of the current time in unix epoch seconds.
pub trait Clock: Send + Sync {
    /// Returns the current unix time in seconds.
    fn now(&self) -> i64;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock {
    /// Current time in unix seconds.
    seconds: AtomicI64,
}

impl FixedClock {
    /// Creates a clock pinned at the provided unix time.
    #[must_use]
    pub const fn new(seconds: i64) -> Self {
        Self {
            seconds: AtomicI64::new(seconds),
        }
    }

    /// Moves the clock to an absolute time.
    pub fn set(&self, seconds: i64) {
        self.seconds.store(seconds, Ordering::SeqCst);
    }

    /// Advances the clock by the provided number of seconds.
    pub fn advance(&self, seconds: i64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }
}
