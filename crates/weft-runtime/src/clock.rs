//! Time sources for the interpreter.
//!
//! Every `Sleep`, retry delay and timeout measurement goes through a
//! [`Clock`]. [`SystemClock`] reads the host clocks and blocks the thread;
//! [`VirtualClock`] keeps a counter that only moves when told to, so retry
//! and timeout behavior can be asserted to the millisecond without waiting.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use weft_runtime::clock::{Clock, VirtualClock};
//!
//! let clock = VirtualClock::new(1_000);
//! clock.sleep(Duration::from_millis(250));
//! clock.advance(Duration::from_millis(50));
//!
//! assert_eq!(clock.current_time_millis(), 1_300);
//! assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// A source of time and a way to wait.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Wall-clock milliseconds.
    fn current_time_millis(&self) -> u64;

    /// Monotonic nanoseconds, only meaningful as a difference.
    fn nano_time(&self) -> u64;

    fn sleep(&self, duration: Duration);
}

/// Time elapsed between two [`Clock::nano_time`] samples.
pub fn elapsed_since(clock: &dyn Clock, started_at: u64) -> Duration {
    Duration::from_nanos(clock.nano_time().saturating_sub(started_at))
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// ============================================================================
// System clock
// ============================================================================

/// The host clocks. `sleep` blocks the current thread.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn current_time_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn nano_time(&self) -> u64 {
        saturating_nanos(self.origin.elapsed())
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

// ============================================================================
// Virtual clock
// ============================================================================

struct VirtualInner {
    nanos: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

/// A deterministic clock for tests.
///
/// Time starts at the given millisecond value and moves only through
/// [`VirtualClock::advance`], [`VirtualClock::adjust`] or `sleep`, which
/// returns immediately after moving the counter. Clones share the counter.
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<VirtualInner>,
}

impl VirtualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            inner: Arc::new(VirtualInner {
                nanos: AtomicU64::new(start_millis.saturating_mul(NANOS_PER_MILLI)),
                sleeps: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Move time forward.
    pub fn advance(&self, duration: Duration) {
        let delta = saturating_nanos(duration);
        let mut now = self.inner.nanos.load(Ordering::Acquire);
        loop {
            let next = now.saturating_add(delta);
            match self
                .inner
                .nanos
                .compare_exchange_weak(now, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => now = actual,
            }
        }
    }

    /// Same as [`VirtualClock::advance`].
    pub fn adjust(&self, duration: Duration) {
        self.advance(duration);
    }

    /// Every duration served by `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.sleeps.lock().clone()
    }

    pub fn sleep_count(&self) -> usize {
        self.inner.sleeps.lock().len()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for VirtualClock {
    fn current_time_millis(&self) -> u64 {
        self.inner.nanos.load(Ordering::Acquire) / NANOS_PER_MILLI
    }

    fn nano_time(&self) -> u64 {
        self.inner.nanos.load(Ordering::Acquire)
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualClock")
            .field("millis", &self.current_time_millis())
            .field("sleeps", &self.sleep_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_virtual_clock_starts_at_given_millis() {
        let clock = VirtualClock::new(42);
        assert_eq!(clock.current_time_millis(), 42);
        assert_eq!(clock.nano_time(), 42 * NANOS_PER_MILLI);
    }

    #[test]
    fn test_virtual_sleep_advances_without_blocking() {
        let clock = VirtualClock::new(0);
        let wall = Instant::now();
        clock.sleep(Duration::from_secs(3600));

        assert_eq!(clock.current_time_millis(), 3_600_000);
        assert!(wall.elapsed() < Duration::from_secs(1));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3600)]);
    }

    #[test]
    fn test_advance_is_not_recorded_as_sleep() {
        let clock = VirtualClock::default();
        clock.advance(Duration::from_millis(10));
        clock.adjust(Duration::from_millis(5));

        assert_eq!(clock.current_time_millis(), 15);
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn test_advance_saturates() {
        let clock = VirtualClock::new(1);
        clock.advance(Duration::MAX);
        assert_eq!(clock.nano_time(), u64::MAX);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.nano_time(), u64::MAX);
    }

    #[test]
    fn test_concurrent_advances_all_land() {
        let clock = VirtualClock::new(0);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        clock.advance(Duration::from_nanos(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(clock.nano_time(), 4000);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = VirtualClock::new(0);
        let other = clock.clone();
        other.sleep(Duration::from_millis(7));
        assert_eq!(clock.current_time_millis(), 7);
        assert_eq!(clock.sleep_count(), 1);
    }

    #[test]
    fn test_elapsed_since() {
        let clock = VirtualClock::new(0);
        let start = clock.nano_time();
        clock.advance(Duration::from_millis(150));
        assert_eq!(elapsed_since(&clock, start), Duration::from_millis(150));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.nano_time();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.nano_time() > first);
        assert!(clock.current_time_millis() > 0);
    }
}
