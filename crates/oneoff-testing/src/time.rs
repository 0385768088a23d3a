//! Deterministic clock for reproducible time-based tests.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use oneoff_core::Clock;

/// Test clock with manually advanced virtual time.
///
/// `sleep` advances the clock by the requested duration and yields, so poll
/// loops driven by this clock run as fast as the scheduler awaits them.
#[derive(Clone)]
pub struct TestClock {
    base: DateTime<Utc>,
    offset_ms: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock starting at a fixed instant.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self { base, offset_ms: Arc::new(AtomicI64::new(0)) }
    }

    /// Creates a clock at a well-known epoch, handy for assertions.
    pub fn at_epoch() -> Self {
        Self::starting_at(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now))
    }

    /// Advances virtual time.
    pub fn advance(&self, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// Elapsed virtual time since construction.
    pub fn elapsed(&self) -> Duration {
        let ms = self.offset_ms.load(Ordering::Acquire).max(0);
        Duration::from_millis(ms.unsigned_abs())
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_wall_clock() {
        let clock = TestClock::at_epoch();
        let start = clock.now_utc();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now_utc() - start, chrono::Duration::seconds(90));
        assert_eq!(clock.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn sleep_advances_instead_of_waiting() {
        let clock = TestClock::at_epoch();
        let start = clock.now_utc();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.now_utc() - start, chrono::Duration::hours(1));
    }
}
