//! Outbound call pacing.
//!
//! A [`RateGate`] enforces a minimum spacing between consecutive calls. Each job
//! owns its own gate; items are processed sequentially, so the gate is what
//! keeps a job inside its external API quota.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Paces calls to a fixed rate.
#[derive(Debug)]
pub struct RateGate {
    interval: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateGate {
    /// Create a gate allowing `calls_per_second` calls. Zero, negative or
    /// non-finite rates disable pacing.
    pub fn new(calls_per_second: f64) -> Self {
        let interval = (calls_per_second.is_finite() && calls_per_second > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / calls_per_second));
        Self::with_interval(interval)
    }

    /// A gate that never waits.
    pub fn unlimited() -> Self {
        Self::with_interval(None)
    }

    pub fn with_interval(interval: Option<Duration>) -> Self {
        Self {
            interval: interval.filter(|d| !d.is_zero()),
            next_slot: Mutex::new(None),
        }
    }

    /// Minimum spacing between calls, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Wait until the next call is allowed. The first call never waits.
    pub async fn acquire(&self) {
        if let Some(at) = self.reserve() {
            tokio::time::sleep_until(at).await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires.
    /// Returns `false` if cancelled before the slot was reached.
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let Some(at) = self.reserve() else {
            return true;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(at) => true,
        }
    }

    /// Claim the next slot and return the instant to wait for, or `None` when
    /// the caller may proceed immediately.
    fn reserve(&self) -> Option<Instant> {
        let interval = self.interval?;
        let now = Instant::now();
        let mut next_slot = self.next_slot.lock();
        let slot = match *next_slot {
            Some(at) if at > now => at,
            _ => now,
        };
        *next_slot = Some(slot + interval);
        (slot > now).then_some(slot)
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_to_interval() {
        assert_eq!(RateGate::new(2.0).interval(), Some(Duration::from_millis(500)));
        assert_eq!(RateGate::new(0.1).interval(), Some(Duration::from_secs(10)));
        assert_eq!(RateGate::new(0.0).interval(), None);
        assert_eq!(RateGate::new(-1.0).interval(), None);
        assert_eq!(RateGate::new(f64::INFINITY).interval(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let gate = RateGate::new(1.0);
        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_calls() {
        let gate = RateGate::new(4.0);
        let start = Instant::now();
        for _ in 0..5 {
            gate.acquire().await;
        }
        // four waits of 250ms after the free first call
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_idle_period() {
        let gate = RateGate::new(1.0);
        gate.acquire().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_waits() {
        let gate = RateGate::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            gate.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let gate = RateGate::new(0.1);
        let cancel = CancellationToken::new();
        assert!(gate.acquire_cancellable(&cancel).await);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        assert!(!gate.acquire_cancellable(&cancel).await);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
