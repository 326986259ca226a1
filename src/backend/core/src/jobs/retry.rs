//! Retry classification and backoff.
//!
//! [`RetryClassifier`] is the one place that decides whether a failed external
//! call is worth repeating. [`RetryPolicy`] turns that decision into a wait,
//! and [`call_with_retry`] runs the bounded attempt loop around a single call,
//! passing every attempt through the job's [`RateGate`].

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::rate_gate::RateGate;
use crate::services::ExternalCallError;
use crate::telemetry::JobMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Classification
// ═══════════════════════════════════════════════════════════════════════════════

/// How a failed external call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The service signalled backoff, optionally with a suggested wait.
    RateLimited { retry_after: Option<Duration> },
    /// Worth repeating a bounded number of times.
    Transient,
    /// Never retried.
    Permanent,
}

impl RetryClass {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// Maps external call errors onto [`RetryClass`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryClassifier;

impl RetryClassifier {
    pub fn classify(error: &ExternalCallError) -> RetryClass {
        match error {
            ExternalCallError::RateLimited { retry_after, .. } => RetryClass::RateLimited {
                retry_after: *retry_after,
            },
            ExternalCallError::Other { retryable: true, .. } => RetryClass::Transient,
            ExternalCallError::Other { retryable: false, .. } => RetryClass::Permanent,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Backoff for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay: Duration },
    /// `initial + increment * attempt`
    Linear { initial: Duration, increment: Duration },
    /// `initial * multiplier^attempt`, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given retry number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear { initial, increment } => *initial + increment.saturating_mul(attempt),
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let secs = initial.as_secs_f64() * multiplier.powi(attempt as i32);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of consulting a [`RetryPolicy`] after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounds and delays for retrying one item's external call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Escalation step for rate limits without a usable hint
    pub rate_limit_base_delay: Duration,
    /// Hints shorter than this are not trusted
    pub retry_after_floor: Duration,
    pub transient_backoff: BackoffStrategy,
    /// When false a rate limit ends the attempt loop immediately
    pub retry_rate_limited: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_base_delay: Duration::from_secs(5),
            retry_after_floor: Duration::from_secs(1),
            transient_backoff: BackoffStrategy::default(),
            retry_rate_limited: true,
        }
    }
}

impl RetryPolicy {
    /// Moderation trusts the API's Retry-After and otherwise escalates by 30s
    /// per attempt.
    pub fn moderation() -> Self {
        Self {
            rate_limit_base_delay: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Translation never waits out a rate limit; the caller defers the batch.
    pub fn translation() -> Self {
        Self {
            retry_rate_limited: false,
            ..Self::default()
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_rate_limit_base_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_base_delay = delay;
        self
    }

    pub fn with_retry_after_floor(mut self, floor: Duration) -> Self {
        self.retry_after_floor = floor;
        self
    }

    pub fn with_transient_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.transient_backoff = backoff;
        self
    }

    /// Wait after a rate-limited attempt (1-based). A hint at or above the
    /// floor is used as is; otherwise `max(hint, base * attempt)`.
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>, attempt: u32) -> Duration {
        match retry_after {
            Some(hint) if hint >= self.retry_after_floor => hint,
            hint => hint
                .unwrap_or_default()
                .max(self.rate_limit_base_delay.saturating_mul(attempt.max(1))),
        }
    }

    /// Decide what to do after `attempt` (1-based) failed with `class`.
    pub fn decide(&self, class: &RetryClass, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match class {
            RetryClass::Permanent => RetryDecision::GiveUp,
            RetryClass::RateLimited { .. } if !self.retry_rate_limited => RetryDecision::GiveUp,
            RetryClass::RateLimited { retry_after } => {
                RetryDecision::RetryAfter(self.rate_limit_wait(*retry_after, attempt))
            }
            RetryClass::Transient => RetryDecision::RetryAfter(
                self.transient_backoff
                    .delay_for_attempt(attempt.saturating_sub(1)),
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Attempt Loop
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-item attempt bookkeeping. Lives for one item only.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Attempts started so far
    pub attempt: u32,
    /// Earliest instant the next attempt may start
    pub next_allowed_at: Option<Instant>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&mut self) {
        self.attempt += 1;
        self.next_allowed_at = None;
    }

    fn schedule(&mut self, delay: Duration) {
        self.next_allowed_at = Some(Instant::now() + delay);
    }

    /// Sleep until the next attempt is allowed. Returns `false` if cancelled.
    async fn wait(&self, cancel: &CancellationToken) -> bool {
        let Some(at) = self.next_allowed_at else {
            return !cancel.is_cancelled();
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(at) => true,
        }
    }
}

/// Result of the attempt loop for one external call.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempted<T> {
    Done(T),
    /// Gave up; `error` is the last failure.
    Failed {
        error: ExternalCallError,
        class: RetryClass,
        attempts: u32,
    },
    /// The token fired while waiting or calling.
    Cancelled,
}

impl<T> Attempted<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Run `call` until it succeeds, the policy gives up, or `cancel` fires.
///
/// Every attempt first passes through `gate`. Backoff waits and the call
/// itself are both abandoned promptly on cancellation.
pub async fn call_with_retry<T, F, Fut>(
    gate: &RateGate,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut call: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalCallError>>,
{
    let mut state = RetryState::new();

    loop {
        if !gate.acquire_cancellable(cancel).await {
            return Attempted::Cancelled;
        }
        state.begin();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempted::Cancelled,
            result = call() => result,
        };

        let error = match result {
            Ok(value) => return Attempted::Done(value),
            Err(error) => error,
        };

        let class = RetryClassifier::classify(&error);
        match policy.decide(&class, state.attempt) {
            RetryDecision::GiveUp => {
                debug!(
                    service = error.service(),
                    attempts = state.attempt,
                    class = class.label(),
                    error = %error,
                    "Giving up on external call"
                );
                return Attempted::Failed {
                    error,
                    class,
                    attempts: state.attempt,
                };
            }
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    service = error.service(),
                    attempt = state.attempt,
                    class = class.label(),
                    retry_after_ms = delay.as_millis() as u64,
                    error = %error,
                    "External call failed, retrying"
                );
                JobMetrics::record_retry(error.service(), class.label());
                state.schedule(delay);
                if !state.wait(cancel).await {
                    return Attempted::Cancelled;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn rate_limited(after: Option<Duration>) -> ExternalCallError {
        ExternalCallError::rate_limited("test", after, "429")
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            RetryClassifier::classify(&rate_limited(Some(Duration::from_secs(2)))),
            RetryClass::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert_eq!(
            RetryClassifier::classify(&ExternalCallError::transient("test", "502")),
            RetryClass::Transient
        );
        assert_eq!(
            RetryClassifier::classify(&ExternalCallError::permanent("test", "400")),
            RetryClass::Permanent
        );
    }

    #[test]
    fn test_backoff_strategies() {
        let fixed = BackoffStrategy::fixed(Duration::from_secs(3));
        assert_eq!(fixed.delay_for_attempt(0), Duration::from_secs(3));
        assert_eq!(fixed.delay_for_attempt(5), Duration::from_secs(3));

        let linear = BackoffStrategy::Linear {
            initial: Duration::from_secs(1),
            increment: Duration::from_secs(2),
        };
        assert_eq!(linear.delay_for_attempt(2), Duration::from_secs(5));

        let exp = BackoffStrategy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        };
        assert_eq!(exp.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(exp.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(exp.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(exp.delay_for_attempt(500), Duration::from_secs(10));
    }

    #[test]
    fn test_rate_limit_wait_uses_hint_above_floor() {
        let policy = RetryPolicy::moderation();
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(4)), 1),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_rate_limit_wait_escalates_without_hint() {
        let policy = RetryPolicy::moderation();
        assert_eq!(policy.rate_limit_wait(None, 1), Duration::from_secs(30));
        assert_eq!(policy.rate_limit_wait(None, 2), Duration::from_secs(60));
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_millis(200)), 2),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_decide_bounds() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(&RetryClass::Transient, 1),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(policy.decide(&RetryClass::Transient, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(&RetryClass::Permanent, 1), RetryDecision::GiveUp);

        let translation = RetryPolicy::translation();
        assert_eq!(
            translation.decide(&RetryClass::RateLimited { retry_after: None }, 1),
            RetryDecision::GiveUp
        );
        assert!(matches!(
            translation.decide(&RetryClass::Transient, 1),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let gate = RateGate::unlimited();
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::moderation();

        let counter = calls.clone();
        let start = Instant::now();
        let outcome = call_with_retry(&gate, &policy, &cancel, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(rate_limited(None))
                } else {
                    Ok("verdict")
                }
            }
        })
        .await;

        assert_eq!(outcome, Attempted::Done("verdict"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: Attempted<()> = call_with_retry(
            &RateGate::unlimited(),
            &RetryPolicy::default(),
            &CancellationToken::new(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ExternalCallError::permanent("test", "empty input")) }
            },
        )
        .await;

        assert!(matches!(
            outcome,
            Attempted::Failed {
                class: RetryClass::Permanent,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: Attempted<()> = call_with_retry(
            &RateGate::unlimited(),
            &RetryPolicy::default(),
            &CancellationToken::new(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ExternalCallError::transient("test", "timeout")) }
            },
        )
        .await;

        assert!(matches!(outcome, Attempted::Failed { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_returns_promptly() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome: Attempted<()> = call_with_retry(
            &RateGate::unlimited(),
            &RetryPolicy::moderation(),
            &cancel,
            || async { Err(rate_limited(Some(Duration::from_secs(600)))) },
        )
        .await;

        assert_eq!(outcome, Attempted::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(600));
    }
}
