//! Retry policies and the retry stage.
//!
//! A [`RetryPolicy`] answers two questions after a failed attempt: should the
//! call be tried again, and after how long. [`RetryInterceptor`] drives the
//! loop, sleeping between attempts and giving up early if the call is
//! cancelled.
//!
//! Attempts are numbered from 1. `attempt` passed to a policy is the number of
//! the attempt that just failed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::response::Response;

/// Decides whether a failed error is worth another attempt.
pub type Classifier = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Policy consulted by [`RetryInterceptor`] after each failed attempt.
pub trait RetryPolicy: Send + Sync {
    /// Total attempts allowed, including the first.
    fn max_attempts(&self) -> u32;

    /// Whether attempt number `attempt`, which failed with `error`, may be retried.
    fn should_retry(&self, attempt: u32, error: &Error) -> bool;

    /// How long to wait before the next attempt. `None` stops retrying.
    fn delay(&self, attempt: u32, error: &Error) -> Option<Duration>;
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn max_attempts(&self) -> u32 {
        1
    }

    fn should_retry(&self, _attempt: u32, _error: &Error) -> bool {
        false
    }

    fn delay(&self, _attempt: u32, _error: &Error) -> Option<Duration> {
        None
    }
}

/// Exponential backoff with optional jitter.
///
/// The delay after attempt `n` is `min(base × multiplier^(n−1), cap)`, then
/// shifted by up to `± delay × jitter`, and never negative.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use courier::error::Error;
/// use courier::retry::{ExponentialBackoff, RetryPolicy};
///
/// let policy = ExponentialBackoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(10), 0.0, 5);
/// let timeout = Error::TimedOut { after: Duration::from_secs(1) };
/// assert_eq!(policy.delay(1, &timeout), Some(Duration::from_secs(1)));
/// assert_eq!(policy.delay(3, &timeout), Some(Duration::from_secs(4)));
/// assert_eq!(policy.delay(5, &timeout), Some(Duration::from_secs(10)));
/// ```
#[derive(Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    multiplier: f64,
    cap: Duration,
    jitter: f64,
    max_attempts: u32,
    classifier: Classifier,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, multiplier: f64, cap: Duration, jitter: f64, max_attempts: u32) -> Self {
        Self {
            base,
            multiplier,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
            classifier: Arc::new(Error::is_retryable),
        }
    }

    /// Replaces the default [`Error::is_retryable`] classification.
    #[must_use]
    pub fn classify_with<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(30), 0.1, 3)
    }
}

impl fmt::Debug for ExponentialBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialBackoff")
            .field("base", &self.base)
            .field("multiplier", &self.multiplier)
            .field("cap", &self.cap)
            .field("jitter", &self.jitter)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn should_retry(&self, attempt: u32, error: &Error) -> bool {
        attempt < self.max_attempts && (self.classifier)(error)
    }

    fn delay(&self, attempt: u32, _error: &Error) -> Option<Duration> {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap.as_secs_f64())
        } else {
            self.cap.as_secs_f64()
        };
        Some(jittered(capped, self.jitter))
    }
}

/// A constant delay between attempts, with the same jitter rule as
/// [`ExponentialBackoff`].
#[derive(Clone)]
pub struct FixedInterval {
    interval: Duration,
    jitter: f64,
    max_attempts: u32,
    classifier: Classifier,
}

impl FixedInterval {
    pub fn new(interval: Duration, jitter: f64, max_attempts: u32) -> Self {
        Self {
            interval,
            jitter: jitter.clamp(0.0, 1.0),
            max_attempts: max_attempts.max(1),
            classifier: Arc::new(Error::is_retryable),
        }
    }

    #[must_use]
    pub fn classify_with<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }
}

impl fmt::Debug for FixedInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedInterval")
            .field("interval", &self.interval)
            .field("jitter", &self.jitter)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy for FixedInterval {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn should_retry(&self, attempt: u32, error: &Error) -> bool {
        attempt < self.max_attempts && (self.classifier)(error)
    }

    fn delay(&self, _attempt: u32, _error: &Error) -> Option<Duration> {
        Some(jittered(self.interval.as_secs_f64(), self.jitter))
    }
}

fn jittered(seconds: f64, jitter: f64) -> Duration {
    let offset = if jitter > 0.0 {
        seconds * jitter * rand::thread_rng().gen_range(-1.0..=1.0)
    } else {
        0.0
    };
    let total = seconds + offset;
    if total.is_finite() && total > 0.0 {
        Duration::try_from_secs_f64(total).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Stage that re-runs the rest of the chain according to a [`RetryPolicy`].
///
/// It sits low in the user stages by default so that only transport, dedup and
/// parsing are repeated. Sleeps end early, with [`Error::Cancelled`], when the
/// call is cancelled.
pub struct RetryInterceptor {
    policy: Arc<dyn RetryPolicy>,
    events: Option<EventBus>,
    priority: i32,
}

impl RetryInterceptor {
    pub const DEFAULT_PRIORITY: i32 = -1_000;

    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            policy,
            events: None,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Publishes retry events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Interceptor for RetryInterceptor {
    fn name(&self) -> &str {
        "retry"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>> {
        let policy = Arc::clone(&self.policy);
        let events = self.events.clone();

        Box::pin(async move {
            let url = ctx.request().url();
            let mut attempt: u32 = 1;

            loop {
                let error = match next.run(ctx.clone()).await {
                    Ok(response) => {
                        if attempt > 1 {
                            info!(%url, attempts = attempt, "request succeeded after retrying");
                            if let Some(events) = &events {
                                events.publish(&url, EventKind::RetrySucceeded { attempts: attempt });
                            }
                        }
                        return Ok(response);
                    }
                    Err(error) => error,
                };

                if ctx.is_cancelled() || !policy.should_retry(attempt, &error) {
                    if attempt > 1 || error.is_retryable() {
                        warn!(%url, attempts = attempt, error = %error, "giving up on request");
                        if let Some(events) = &events {
                            events.publish(
                                &url,
                                EventKind::RetriesExhausted {
                                    attempts: attempt,
                                    error: error.to_string(),
                                },
                            );
                        }
                    }
                    return Err(error);
                }

                let Some(delay) = policy.delay(attempt, &error) else {
                    return Err(error);
                };
                info!(%url, attempt, ?delay, error = %error, "scheduling retry");
                if let Some(events) = &events {
                    events.publish(
                        &url,
                        EventKind::RetryScheduled {
                            attempt,
                            delay,
                            error: error.to_string(),
                        },
                    );
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancelled() => return Err(Error::Cancelled),
                }
                attempt += 1;
            }
        })
    }
}
