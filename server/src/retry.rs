use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Fixed-delay retry with a hard attempt cap.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub(crate) struct RetryError<E> {
    pub(crate) attempts: u32,
    pub(crate) last_error: E,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub(crate) async fn run<T, E, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= self.max_attempts => {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        %error,
                        "operation failed; retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
