//! Retry with exponential backoff around fallible async stage calls.
//!
//! Backoff is a pure function of the attempt number and the policy; the
//! actual waiting goes through a [`Sleeper`] so tests can record delays
//! instead of sleeping.

use async_trait::async_trait;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How an error should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying cannot help (403, bad input, auth).
    Terminal,
    /// Retry with the normal backoff.
    Transient,
    /// Retry, but wait at least the policy's rate-limit delay.
    RateLimited,
}

/// Errors that know their own retry class.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Terminal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 disables).
    pub jitter: f64,
    /// Minimum wait after a rate-limited failure.
    pub rate_limit_delay: Duration,
    /// Deadline for a single attempt.
    pub attempt_timeout: Option<Duration>,
    /// Overall budget across attempts and sleeps.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            rate_limit_delay: Duration::from_secs(60),
            attempt_timeout: None,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` is the 1-based
    /// number of the attempt that just failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Backoff adjusted for the failure class. Rate limiting never waits less
    /// than `rate_limit_delay`, even when that exceeds `max_delay`.
    pub fn delay_for(&self, attempt: u32, class: ErrorClass) -> Duration {
        let base = self.backoff_delay(attempt);
        match class {
            ErrorClass::RateLimited => base.max(self.rate_limit_delay),
            ErrorClass::Transient | ErrorClass::Terminal => base,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Scale `delay` by `1 + fraction * sample`, with `sample` in `[-1, 1]`.
pub fn apply_jitter(delay: Duration, fraction: f64, sample: f64) -> Duration {
    let fraction = fraction.clamp(0.0, 1.0);
    let sample = sample.clamp(-1.0, 1.0);
    Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + fraction * sample)).max(0.0))
}

/// Something that can wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A single attempt ran past the policy's `attempt_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("attempt timed out after {0:?}")]
pub struct AttemptTimeout(pub Duration);

type Predicate<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;
type Classifier<'a, E> = Box<dyn Fn(&E) -> ErrorClass + Send + Sync + 'a>;

/// Runs an operation under a [`RetryPolicy`].
///
/// Without a predicate every error is retried until attempts (or the elapsed
/// budget) run out. The final error is returned exactly as the operation
/// produced it.
pub struct RetryEngine<'a, E> {
    policy: &'a RetryPolicy,
    sleeper: &'a dyn Sleeper,
    should_retry: Option<Predicate<'a, E>>,
    classify: Option<Classifier<'a, E>>,
    operation: &'static str,
}

impl<'a, E> RetryEngine<'a, E>
where
    E: Display + From<AttemptTimeout>,
{
    pub fn new(policy: &'a RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            policy,
            sleeper,
            should_retry: None,
            classify: None,
            operation: "operation",
        }
    }

    /// Name used in logs and metrics.
    pub fn named(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    /// Only retry errors for which `predicate` returns true.
    pub fn when(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    /// Pick the backoff class per error (rate limiting waits longer).
    pub fn delay_class(mut self, classify: impl Fn(&E) -> ErrorClass + Send + Sync + 'a) -> Self {
        self.classify = Some(Box::new(classify));
        self
    }

    /// Run `op`, passing the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(E::from(AttemptTimeout(limit))),
                },
                None => op(attempt).await,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = self.operation, attempt, "Succeeded after retry");
                    }
                    metrics::counter!("retry_attempts_total", "operation" => self.operation, "outcome" => "success")
                        .increment(1);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let retryable = self.should_retry.as_ref().map_or(true, |p| p(&error));
            if !retryable {
                tracing::warn!(operation = self.operation, attempt, error = %error, "Non-retryable failure");
                metrics::counter!("retry_attempts_total", "operation" => self.operation, "outcome" => "terminal")
                    .increment(1);
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::warn!(operation = self.operation, attempt, error = %error, "Retry attempts exhausted");
                metrics::counter!("retry_attempts_total", "operation" => self.operation, "outcome" => "exhausted")
                    .increment(1);
                return Err(error);
            }

            let class = self
                .classify
                .as_ref()
                .map_or(ErrorClass::Transient, |c| c(&error));
            let delay = self.next_delay(attempt, class);

            if let Some(budget) = self.policy.max_elapsed {
                if started.elapsed() + delay > budget {
                    tracing::warn!(operation = self.operation, attempt, error = %error, "Retry budget exhausted");
                    metrics::counter!("retry_attempts_total", "operation" => self.operation, "outcome" => "exhausted")
                        .increment(1);
                    return Err(error);
                }
            }

            tracing::warn!(
                operation = self.operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                rate_limited = class == ErrorClass::RateLimited,
                error = %error,
                "Attempt failed, backing off"
            );
            metrics::counter!("retry_attempts_total", "operation" => self.operation, "outcome" => "retry")
                .increment(1);

            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    fn next_delay(&self, attempt: u32, class: ErrorClass) -> Duration {
        let delay = self.policy.delay_for(attempt, class);
        if self.policy.jitter <= 0.0 {
            return delay;
        }
        let sample = rand::rng().random_range(-1.0..=1.0);
        let jittered = apply_jitter(delay, self.policy.jitter, sample);
        // Jitter may lengthen but never shorten a rate-limit wait.
        if class == ErrorClass::RateLimited {
            jittered.max(self.policy.rate_limit_delay)
        } else {
            jittered
        }
    }
}

impl<'a, E> RetryEngine<'a, E>
where
    E: Classify + Display + From<AttemptTimeout> + 'a,
{
    /// Policy used around the scraper and extractor: terminal errors stop
    /// immediately, rate-limited ones get the elevated delay.
    pub fn classified(policy: &'a RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self::new(policy, sleeper)
            .when(|e: &E| e.is_retryable())
            .delay_class(|e: &E| e.class())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    enum TestError {
        #[error("flaky")]
        Flaky,
        #[error("fatal")]
        Fatal,
        #[error("slow down")]
        Throttled,
        #[error("timeout")]
        Timeout,
    }

    impl From<AttemptTimeout> for TestError {
        fn from(_: AttemptTimeout) -> Self {
            TestError::Timeout
        }
    }

    impl Classify for TestError {
        fn class(&self) -> ErrorClass {
            match self {
                TestError::Fatal => ErrorClass::Terminal,
                TestError::Throttled => ErrorClass::RateLimited,
                TestError::Flaky | TestError::Timeout => ErrorClass::Transient,
            }
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
            rate_limit_delay: Duration::from_secs(10),
            attempt_timeout: None,
            max_elapsed: None,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy();
        assert_eq!(p.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(p.backoff_delay(5), Duration::from_secs(1));
        assert_eq!(p.backoff_delay(200), Duration::from_secs(1));
    }

    #[test]
    fn test_rate_limited_delay_is_elevated() {
        let p = policy();
        assert_eq!(p.delay_for(1, ErrorClass::Transient), Duration::from_millis(100));
        assert_eq!(p.delay_for(1, ErrorClass::RateLimited), Duration::from_secs(10));
    }

    #[test]
    fn test_apply_jitter_bounds() {
        let d = Duration::from_millis(1000);
        assert_eq!(apply_jitter(d, 0.2, 0.0), d);
        assert_eq!(apply_jitter(d, 0.2, 1.0), Duration::from_millis(1200));
        assert_eq!(apply_jitter(d, 0.2, -1.0), Duration::from_millis(800));
        assert_eq!(apply_jitter(d, 0.0, 1.0), d);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_without_predicate() {
        let p = policy();
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = RetryEngine::new(&p, &sleeper)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_predicate_false_stops_after_one_attempt() {
        let p = policy();
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = RetryEngine::new(&p, &sleeper)
            .when(|e: &TestError| *e != TestError::Flaky)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Flaky) }
            })
            .await;

        assert_eq!(result, Err(TestError::Flaky));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let p = policy();
        let sleeper = RecordingSleeper::default();

        let result = RetryEngine::classified(&p, &sleeper)
            .run(|attempt| async move {
                if attempt < 3 {
                    Err(TestError::Flaky)
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_classified_uses_rate_limit_delay() {
        let p = policy();
        let sleeper = RecordingSleeper::default();

        let result: Result<(), TestError> = RetryEngine::classified(&p, &sleeper)
            .run(|attempt| async move {
                if attempt == 1 {
                    Err(TestError::Throttled)
                } else {
                    Err(TestError::Flaky)
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Flaky));
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_secs(10), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_classified_terminal_is_not_retried() {
        let p = policy();
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = RetryEngine::classified(&p, &sleeper)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retried() {
        let p = policy().with_attempt_timeout(Duration::from_millis(20));
        let sleeper = RecordingSleeper::default();

        let result = RetryEngine::classified(&p, &sleeper)
            .run(|attempt| async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, TestError>(attempt)
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(sleeper.delays.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_elapsed_budget_stops_retrying() {
        let mut p = policy();
        p.max_elapsed = Some(Duration::from_millis(50));
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = RetryEngine::new(&p, &sleeper)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Flaky) }
            })
            .await;

        assert_eq!(result, Err(TestError::Flaky));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
