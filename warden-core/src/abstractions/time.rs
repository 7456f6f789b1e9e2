//! Time abstractions for testability
//!
//! All election deadlines and failover timers are measured on a monotonic
//! clock behind this trait, so tests can drive time by hand.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Instant in time (monotonic clock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64); // Microseconds since the clock's epoch

impl Instant {
    /// The clock's epoch
    pub const ZERO: Instant = Instant(0);

    /// A deadline that never passes
    pub const MAX: Instant = Instant(u64::MAX);

    /// Create from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Get microseconds value
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Duration since another instant, zero if `earlier` is later
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Instant `duration` after this one, saturating at `Instant::MAX`
    pub fn saturating_add(&self, duration: Duration) -> Instant {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        Instant(self.0.saturating_add(micros))
    }
}

/// Abstraction for time operations
#[async_trait]
pub trait Clock: Send + Sync {
    /// Get current instant (monotonic)
    fn now(&self) -> Instant;

    /// Sleep for a duration
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the tokio timer
pub struct SystemClock {
    epoch: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let micros = u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX);
        Instant::from_micros(micros)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Mock clock for deterministic testing
#[derive(Clone, Default)]
pub struct MockClock {
    current_micros: Arc<Mutex<u64>>,
    time_advanced: Arc<Notify>,
}

impl MockClock {
    /// Create new mock clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance time by duration
    pub fn advance(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        {
            let mut current = self.current_micros.lock();
            *current = current.saturating_add(micros);
        }
        self.time_advanced.notify_waiters();
    }

    /// Set absolute time
    pub fn set_time(&self, micros: u64) {
        *self.current_micros.lock() = micros;
        self.time_advanced.notify_waiters();
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_micros(*self.current_micros.lock())
    }

    async fn sleep(&self, duration: Duration) {
        let target = self.now().saturating_add(duration);

        loop {
            // Register before checking so an advance in between is not lost
            let notified = self.time_advanced.notified();
            if self.now() >= target {
                break;
            }
            notified.await;
        }
    }
}
