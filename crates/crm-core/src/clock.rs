//! Time sources
//!
//! Everything that asks "what time is it" goes through a [`Clock`] so that
//! triggers, schedules and the poller can be driven by a [`MockClock`] in
//! tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

/// A source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A controllable time source
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific time
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(RwLock::new(time)),
        }
    }

    /// Set the current time
    pub fn set(&self, time: DateTime<Utc>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = time;
    }

    /// Advance time by a duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }

    /// Advance time by minutes
    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }

    /// Advance time by hours
    pub fn advance_hours(&self, hours: i64) {
        self.advance(Duration::hours(hours));
    }

    /// Advance time by days
    pub fn advance_days(&self, days: i64) {
        self.advance(Duration::days(days));
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}
