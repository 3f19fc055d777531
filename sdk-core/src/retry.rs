//! Attempt-handle retry driver with a resettable counter.
//!
//! Mirrors the contract the rest of the runtime depends on: a caller runs a
//! closure once per attempt, classifies the failure as suppressible or
//! fatal, and the driver decides whether to sleep-and-retry or give up.

use std::time::Duration;

use tracing::{debug, warn};

/// A backoff policy. All variants clamp to `max` when provided; a
/// non-positive delay means "do not sleep."
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffMethod {
    Linear { factor: f64, max: Option<f64> },
    Incremental { factor: f64, max: Option<f64> },
    Exponential { factor: f64, max: Option<f64> },
}

impl BackoffMethod {
    pub fn linear(factor: f64) -> Self {
        BackoffMethod::Linear { factor, max: None }
    }

    pub fn incremental(factor: f64) -> Self {
        BackoffMethod::Incremental { factor, max: None }
    }

    pub fn exponential(factor: f64) -> Self {
        BackoffMethod::Exponential { factor, max: None }
    }

    pub fn with_max(self, max: f64) -> Self {
        match self {
            BackoffMethod::Linear { factor, .. } => BackoffMethod::Linear {
                factor,
                max: Some(max),
            },
            BackoffMethod::Incremental { factor, .. } => BackoffMethod::Incremental {
                factor,
                max: Some(max),
            },
            BackoffMethod::Exponential { factor, .. } => BackoffMethod::Exponential {
                factor,
                max: Some(max),
            },
        }
    }

    /// Delay in seconds before the `attempt_number`-th retry (1-indexed).
    fn delay_seconds(&self, attempt_number: u32) -> f64 {
        let n = attempt_number as f64;
        let (raw, max) = match *self {
            BackoffMethod::Linear { factor, max } => (factor, max),
            BackoffMethod::Incremental { factor, max } => (factor * n, max),
            BackoffMethod::Exponential { factor, max } => (factor * 2f64.powf(n), max),
        };
        match max {
            Some(max) => raw.min(max),
            None => raw,
        }
    }
}

/// Raised once the retry budget is exhausted, or immediately for a fatal
/// (non-suppressed) error.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("attempt failed fatally")]
    Fatal(E),
    #[error("retries exhausted after {} suppressed attempt(s)", .0.len())]
    Exhausted(Vec<E>),
}

/// Outcome of one attempt, returned by the closure passed to [`Retry::run`].
pub enum Action<T, E> {
    /// The attempt succeeded; stop and return `T`.
    Done(T),
    /// The attempt failed with a suppressible error; retry if budget remains.
    Retry(E),
    /// The attempt failed with a non-suppressible error; stop immediately.
    Fatal(E),
}

/// A handle to the current attempt, passed to the closure so it can declare
/// forward progress.
pub struct Attempt<'r> {
    retry: &'r mut Retry,
}

impl Attempt<'_> {
    /// Declares forward progress: the attempt counter returns to 1 without
    /// losing the configured policy. Used by long transfers so a transient
    /// mid-transfer error does not monotonically consume the retry budget.
    pub fn reset_counter(&mut self) {
        self.retry.attempt_number = 1;
    }

    pub fn attempt_number(&self) -> u32 {
        self.retry.attempt_number
    }
}

/// Attempt-iterator retry driver.
#[derive(Debug, Clone)]
pub struct Retry {
    max_attempts: u32,
    backoff: BackoffMethod,
    attempt_number: u32,
}

impl Retry {
    pub fn new(max_attempts: u32, backoff: BackoffMethod) -> Self {
        Self {
            max_attempts,
            backoff,
            attempt_number: 1,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `f` until it succeeds, is exhausted, or fails fatally.
    ///
    /// `f` receives an [`Attempt`] handle and returns an [`Action`]
    /// describing the outcome of that attempt.
    pub async fn run<T, E, F, Fut>(&mut self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(Attempt<'_>) -> Fut,
        Fut: std::future::Future<Output = Action<T, E>>,
    {
        let mut suppressed = Vec::new();
        loop {
            let attempt = Attempt { retry: self };
            match f(attempt).await {
                Action::Done(value) => return Ok(value),
                Action::Fatal(err) => return Err(RetryError::Fatal(err)),
                Action::Retry(err) => {
                    let attempt_number = self.attempt_number;
                    suppressed.push(err);
                    if attempt_number < self.max_attempts {
                        let delay = self.backoff.delay_seconds(attempt_number);
                        self.attempt_number = attempt_number + 1;
                        debug!(
                            attempt_number,
                            max_attempts = self.max_attempts,
                            delay,
                            "retry attempt failed; backing off"
                        );
                        if delay > 0.0 {
                            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                        }
                    } else {
                        warn!(
                            attempts = suppressed.len(),
                            "retry budget exhausted"
                        );
                        return Err(RetryError::Exhausted(suppressed));
                    }
                }
            }
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(3, BackoffMethod::incremental(2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_configured_attempts_with_incremental_backoff() {
        let mut retry = Retry::new(5, BackoffMethod::incremental(1.0));
        let start = tokio::time::Instant::now();
        let sleeps: std::rc::Rc<Cell<Vec<f64>>> = Default::default();

        let result: Result<(), RetryError<&str>> = retry
            .run(|attempt| {
                let sleeps = sleeps.clone();
                async move {
                    let mut v = sleeps.take();
                    v.push(attempt.attempt_number() as f64);
                    sleeps.set(v);
                    Action::Retry("boom")
                }
            })
            .await;

        match result {
            Err(RetryError::Exhausted(errs)) => assert_eq!(errs.len(), 5),
            _ => panic!("expected Exhausted"),
        }
        // 4 backoffs of 1,2,3,4 seconds = 10 seconds total.
        assert_eq!(tokio::time::Instant::now() - start, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_counter_grants_a_fresh_budget() {
        let mut retry = Retry::new(5, BackoffMethod::incremental(1.0));
        let failures = std::rc::Rc::new(Cell::new(0u32));

        let result: Result<(), RetryError<&str>> = retry
            .run(|mut attempt| {
                let failures = failures.clone();
                async move {
                    let n = failures.get() + 1;
                    failures.set(n);
                    if n == 5 {
                        attempt.reset_counter();
                    }
                    if n == 9 {
                        return Action::Done(());
                    }
                    Action::Retry("boom")
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(failures.get(), 9);
    }

    #[tokio::test]
    async fn fatal_error_propagates_without_retry() {
        let mut retry = Retry::new(5, BackoffMethod::incremental(1.0));
        let calls = std::rc::Rc::new(Cell::new(0u32));
        let result: Result<(), RetryError<&str>> = retry
            .run(|_attempt| {
                let calls = calls.clone();
                async move {
                    calls.set(calls.get() + 1);
                    Action::Fatal("nope")
                }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Fatal("nope"))));
        assert_eq!(calls.get(), 1);
    }
}
