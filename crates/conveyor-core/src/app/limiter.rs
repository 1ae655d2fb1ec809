//! ConcurrencyLimiter - counting permit pool for heavy processing.
//!
//! Bounds how many envelopes are processed at once in this process,
//! independent of how many listener tasks / partitions feed it. Process-local,
//! not distributed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shared by every listener of a pipeline (clone the `Arc`, not the limiter).
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

/// Held while processing; dropping it releases the permit on every exit path.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// `max_concurrency` is clamped to at least 1.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Wait up to `timeout` for a permit. `None` means denied: backpressure,
    /// not a failure.
    pub async fn try_acquire(&self, timeout: Duration) -> Option<Permit> {
        // Fast path avoids arming a timer when a permit is free.
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Some(Permit { _permit: permit });
        }

        match tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Some(Permit { _permit: permit }),
            // Elapsed, or the semaphore was closed.
            Ok(Err(_)) | Err(_) => None,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn permits_are_released_on_drop() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.try_acquire(Duration::from_millis(10)).await.unwrap();
        let _b = limiter.try_acquire(Duration::from_millis(10)).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);
        assert_eq!(limiter.available(), 0);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_after_timeout_when_exhausted() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.try_acquire(Duration::from_secs(1)).await.unwrap();

        let start = tokio::time::Instant::now();
        assert!(limiter.try_acquire(Duration::from_secs(1)).await.is_none());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_permit_when_released_in_time() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let held = limiter.try_acquire(Duration::from_secs(1)).await.unwrap();

        let waiter = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move { limiter.try_acquire(Duration::from_secs(5)).await.is_some() }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn zero_is_clamped_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).max_concurrency(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_more_than_max_inside() {
        const MAX: usize = 3;
        let limiter = Arc::new(ConcurrencyLimiter::new(MAX));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for _ in 0..(MAX + 7) {
            let limiter = Arc::clone(&limiter);
            let inside = Arc::clone(&inside);
            let peak = Arc::clone(&peak);
            joins.push(tokio::spawn(async move {
                let _permit = limiter.try_acquire(Duration::from_secs(10)).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for j in joins {
            j.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= MAX);
        assert_eq!(limiter.available(), MAX);
    }
}
