//! Stateless retry policy for transient network operations.
//!
//! The policy is a plain value handed to each call site. There is no
//! process-wide retry state.

use log::debug;
use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// How often, and how patiently, a fallible operation is repeated.
///
/// # Examples
///
/// ```
/// use rootstrap_common::retry::RetryPolicy;
///
/// let policy = RetryPolicy::immediate(3);
/// let mut calls = 0;
/// let result: Result<u32, String> = policy.run(|attempt| {
///     calls += 1;
///     if attempt < 2 { Err("flaky".to_owned()) } else { Ok(attempt) }
/// });
/// assert_eq!(result, Ok(2));
/// assert_eq!(calls, 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Attempt count used when nothing else is configured.
    pub const DEFAULT_ATTEMPTS: u32 = 3;

    /// Create a policy. A zero attempt count is raised to one.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        let attempts = if attempts == 0 { 1 } else { attempts };
        Self { attempts, delay }
    }

    /// Retry immediately, without pausing between attempts.
    #[must_use]
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    /// Maximum number of attempts, including the first.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `operation` until it succeeds or the attempts are exhausted.
    ///
    /// The closure receives the 1-based attempt number. The first success
    /// short-circuits. On exhaustion the last error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error from the final attempt.
    pub fn run<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_while(operation, |_| true)
    }

    /// Like [`Self::run`], but stops early when `is_transient` rejects an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the error from the final
    /// attempt.
    pub fn run_while<T, E, F, P>(&self, mut operation: F, is_transient: P) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.attempts || !is_transient(&err) => return Err(err),
                Err(err) => {
                    debug!("attempt {attempt}/{} failed: {err}", self.attempts);
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(Self::DEFAULT_ATTEMPTS)
    }
}
