//! Clock abstraction for retry timers and event timestamps.
//!
//! The delivery client never calls `tokio::time::sleep` or `SystemTime::now`
//! directly for its retry wait. Production uses `RealClock`; tests inject a
//! `TestClock` so a retry interval of minutes completes immediately while
//! still being observable.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Clock abstraction for time operations.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current system time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    ///
    /// In production this maps to `tokio::time::sleep`, in tests this
    /// advances virtual time immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Current wall-clock time as a UTC timestamp.
    fn timestamp(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Real clock backed by the system time and the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock for deterministic time control.
///
/// Every `sleep` call is recorded, so tests can assert both that a retry
/// wait happened and how long it was meant to be.
#[derive(Debug, Clone)]
pub struct TestClock {
    system_ns: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl TestClock {
    /// Creates a new test clock starting at the current time.
    pub fn new() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            system_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Moves virtual time forward.
    pub fn advance(&self, duration: Duration) {
        self.system_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
    }

    /// Durations of every `sleep` requested so far, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_system(&self) -> SystemTime {
        let ns = self.system_ns.load(Ordering::Acquire);
        UNIX_EPOCH + Duration::from_nanos(ns)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_follows_advance() {
        let clock = TestClock::new();
        let start = clock.timestamp();

        clock.advance(Duration::from_secs(60));
        assert_eq!((clock.timestamp() - start).num_seconds(), 60);
    }

    #[tokio::test]
    async fn sleep_is_recorded_and_advances_time() {
        let clock = TestClock::new();
        let start = clock.timestamp();

        clock.sleep(Duration::from_secs(300)).await;
        clock.sleep(Duration::ZERO).await;

        assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(300), Duration::ZERO]);
        assert_eq!((clock.timestamp() - start).num_seconds(), 300);
    }
}
