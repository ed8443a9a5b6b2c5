//! Circuit breaker for the render pipeline
//!
//! After `threshold` consecutive failures the breaker opens and every call
//! returns its fallback without invoking the operation. There is no
//! automatic half-open probe: only [`CircuitBreaker::reset`] closes it again.
//!
//! State lives in `Cell`s because the breaker is owned by a single-threaded
//! renderer service, so it is not `Sync`.

use std::cell::Cell;
use std::future::Future;

use serde::Serialize;
use tracing::{debug, warn};

/// Consecutive failures that open the circuit by default
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitStatus {
    /// Operations are invoked
    Closed,
    /// Operations are short-circuited to the fallback
    Open,
}

/// Snapshot of breaker health for host dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitHealth {
    pub state: CircuitStatus,
    pub failures: u32,
}

/// Why an operation did not produce a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection<E> {
    /// The circuit was open; the operation was not invoked
    Open,
    /// The operation ran and failed
    Failed(E),
}

#[derive(Debug)]
pub struct CircuitBreaker {
    status: Cell<CircuitStatus>,
    failures: Cell<u32>,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    /// A threshold of zero is treated as one
    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            status: Cell::new(CircuitStatus::Closed),
            failures: Cell::new(0),
            threshold: threshold.max(1),
        }
    }

    pub fn state(&self) -> CircuitStatus {
        self.status.get()
    }

    pub fn failures(&self) -> u32 {
        self.failures.get()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn health(&self) -> CircuitHealth {
        CircuitHealth {
            state: self.state(),
            failures: self.failures(),
        }
    }

    /// Close the circuit and forget past failures
    pub fn reset(&self) {
        self.status.set(CircuitStatus::Closed);
        self.failures.set(0);
        debug!("Circuit breaker reset");
    }

    /// Run `operation` unless the circuit is open
    ///
    /// Returns `fallback` when the circuit is open or the operation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_markdown_bridge::circuit_breaker::{CircuitBreaker, CircuitStatus};
    ///
    /// let breaker = CircuitBreaker::new();
    /// for _ in 0..3 {
    ///     let value = breaker.execute(|| Err::<u32, _>("boom"), 0);
    ///     assert_eq!(value, 0);
    /// }
    /// assert_eq!(breaker.state(), CircuitStatus::Open);
    /// ```
    pub fn execute<T, E, F>(&self, operation: F, fallback: T) -> T
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.execute_or_else(operation, |_| fallback)
    }

    /// Run `operation` unless the circuit is open, building the fallback from the rejection
    pub fn execute_or_else<T, E, F, R>(&self, operation: F, on_reject: R) -> T
    where
        F: FnOnce() -> Result<T, E>,
        R: FnOnce(Rejection<E>) -> T,
    {
        if self.is_open() {
            return on_reject(Rejection::Open);
        }

        match operation() {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(err) => {
                self.record_failure();
                on_reject(Rejection::Failed(err))
            }
        }
    }

    /// Async form of [`CircuitBreaker::execute_or_else`]
    ///
    /// The open check happens before `operation` is called, so an open
    /// circuit never constructs the future.
    pub async fn execute_async_or_else<T, E, F, Fut, R>(&self, operation: F, on_reject: R) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(Rejection<E>) -> T,
    {
        if self.is_open() {
            return on_reject(Rejection::Open);
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(err) => {
                self.record_failure();
                on_reject(Rejection::Failed(err))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.status.get() == CircuitStatus::Open
    }

    fn record_success(&self) {
        self.failures.set(0);
    }

    fn record_failure(&self) {
        let failures = self.failures.get().saturating_add(1);
        self.failures.set(failures);

        if failures >= self.threshold && self.status.get() == CircuitStatus::Closed {
            self.status.set(CircuitStatus::Open);
            warn!(failures, "Circuit breaker opened after consecutive failures");
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..3 {
            assert_eq!(breaker.execute(|| Err::<&str, _>(()), "fallback"), "fallback");
        }
        assert_eq!(breaker.state(), CircuitStatus::Open);
        assert_eq!(breaker.failures(), 3);

        let mut invoked = false;
        let value = breaker.execute(
            || {
                invoked = true;
                Ok::<_, ()>("value")
            },
            "fallback",
        );
        assert_eq!(value, "fallback");
        assert!(!invoked, "Open circuit must not invoke the operation");

        breaker.reset();
        assert_eq!(breaker.state(), CircuitStatus::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new();
        breaker.execute(|| Err::<u8, _>(()), 0);
        breaker.execute(|| Err::<u8, _>(()), 0);
        assert_eq!(breaker.failures(), 2);

        assert_eq!(breaker.execute(|| Ok::<_, ()>(7), 0), 7);
        assert_eq!(breaker.failures(), 0);
        assert_eq!(breaker.state(), CircuitStatus::Closed);
    }

    #[test]
    fn test_rejection_distinguishes_open_and_failed() {
        let breaker = CircuitBreaker::with_threshold(1);
        let first = breaker.execute_or_else(|| Err::<String, _>("bad"), |r| format!("{:?}", r));
        assert_eq!(first, "Failed(\"bad\")");

        let second = breaker.execute_or_else(|| Ok::<_, &str>("ok".to_string()), |r| format!("{:?}", r));
        assert_eq!(second, "Open");
    }

    #[test]
    fn test_async_variant_skips_future_when_open() {
        let breaker = CircuitBreaker::with_threshold(1);
        block_on(breaker.execute_async_or_else(|| async { Err::<u8, _>(()) }, |_| 0));
        assert_eq!(breaker.state(), CircuitStatus::Open);

        let mut constructed = false;
        let value = block_on(breaker.execute_async_or_else(
            || {
                constructed = true;
                async { Ok::<_, ()>(1) }
            },
            |_| 0,
        ));
        assert_eq!(value, 0);
        assert!(!constructed);
    }

    #[test]
    fn test_health_serializes() {
        let breaker = CircuitBreaker::new();
        breaker.execute(|| Err::<u8, _>(()), 0);
        let json = serde_json::to_value(breaker.health()).unwrap();
        assert_eq!(json, serde_json::json!({"state": "closed", "failures": 1}));
    }
}
