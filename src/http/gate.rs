use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::NetworkError;

/// Process-wide admission control for outgoing requests: a token bucket
/// shared by every worker, a cap on in-flight requests and the scan's stop
/// signal. One instance is built per scan and handed to each worker.
pub struct RequestGate {
    limiter: Option<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    in_flight: Semaphore,
    cancel: CancellationToken,
    admitted: AtomicUsize,
}

impl RequestGate {
    pub fn new(rps: u32, max_in_flight: usize, cancel: CancellationToken) -> Self {
        let limiter = NonZeroU32::new(rps).map(|rate| GovernorRateLimiter::direct(Quota::per_second(rate)));
        debug!(rps, max_in_flight, "request gate configured");

        Self {
            limiter,
            in_flight: Semaphore::new(max_in_flight.max(1)),
            cancel,
            admitted: AtomicUsize::new(0),
        }
    }

    /// Gate with no rate limit, for tests and one-off probes.
    pub fn unlimited(max_in_flight: usize) -> Self {
        Self::new(0, max_in_flight, CancellationToken::new())
    }

    /// Waits for a concurrency slot and a rate token. Returns
    /// `NetworkError::Cancelled` as soon as the scan is stopped.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>, NetworkError> {
        if self.cancel.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }

        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(NetworkError::Cancelled),
            permit = self.in_flight.acquire() => permit.map_err(|_| NetworkError::Cancelled)?,
        };

        if let Some(limiter) = &self.limiter {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(NetworkError::Cancelled),
                _ = limiter.until_ready() => {}
            }
        }

        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(permit)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_admit_counts_requests() {
        let gate = RequestGate::unlimited(2);
        for _ in 0..5 {
            let _permit = gate.admit().await.unwrap();
        }
        assert_eq!(gate.admitted(), 5);
    }

    #[tokio::test]
    async fn test_cancelled_gate_rejects() {
        let cancel = CancellationToken::new();
        let gate = RequestGate::new(0, 1, cancel.clone());
        cancel.cancel();
        assert_eq!(gate.admit().await.unwrap_err(), NetworkError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let cancel = CancellationToken::new();
        let gate = RequestGate::new(0, 1, cancel.clone());
        let _held = gate.admit().await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), gate.admit()).await;
        assert!(matches!(result, Ok(Err(NetworkError::Cancelled))));
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_requests() {
        let gate = RequestGate::new(10, 4, CancellationToken::new());
        let start = Instant::now();
        for _ in 0..15 {
            let _permit = gate.admit().await.unwrap();
        }
        // Burst of 10, then five more at 10/s.
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
