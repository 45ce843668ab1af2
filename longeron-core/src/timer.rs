//! Periodic timer utility.
//!
//! Repeatedly invokes a callback on a fixed period until the callback
//! returns false or the timer is cancelled. Network timeouts are an
//! application concern layered on this; the library itself imposes
//! none.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Periodic callback driver.
///
/// The callback receives the elapsed time since `run` began and
/// returns whether to keep running. `cancel` may be called from any
/// thread; it takes effect at the next period boundary.
///
/// # Example
///
/// ```no_run
/// use longeron_core::timer::PeriodicTimer;
/// use std::time::Duration;
///
/// #[compio::main]
/// async fn main() {
///     let timer = PeriodicTimer::new(Duration::from_millis(250));
///     timer
///         .run(|elapsed| elapsed < Duration::from_secs(2))
///         .await;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    period: Duration,
    cancelled: Arc<AtomicBool>,
}

impl PeriodicTimer {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Request the timer to stop at the next period boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Drive the callback until it returns false or the timer is
    /// cancelled.
    pub async fn run<F>(&self, mut cb: F)
    where
        F: FnMut(Duration) -> bool,
    {
        let started = Instant::now();
        loop {
            compio::time::sleep(self.period).await;
            if self.cancelled.load(Ordering::Acquire) {
                break;
            }
            if !cb(started.elapsed()) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn stops_when_callback_returns_false() {
        let timer = PeriodicTimer::new(Duration::from_millis(5));
        let started = Instant::now();
        let mut ticks = 0;
        timer
            .run(|_| {
                ticks += 1;
                ticks < 3
            })
            .await;
        assert_eq!(ticks, 3);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[compio::test]
    async fn cancel_stops_the_run() {
        let timer = PeriodicTimer::new(Duration::from_millis(5));
        timer.cancel();
        let mut ticks = 0;
        timer
            .run(|_| {
                ticks += 1;
                true
            })
            .await;
        assert_eq!(ticks, 0);
    }

    #[compio::test]
    async fn callback_sees_monotonic_elapsed() {
        let timer = PeriodicTimer::new(Duration::from_millis(2));
        let mut last = Duration::ZERO;
        timer
            .run(|elapsed| {
                assert!(elapsed >= last);
                last = elapsed;
                last < Duration::from_millis(10)
            })
            .await;
    }
}
