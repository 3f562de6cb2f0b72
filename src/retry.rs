//! Fixed-delay retry policy for flaky provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How often to attempt an operation and how long to wait between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation` until it succeeds or the attempts are exhausted.
    ///
    /// Returns the last error when every attempt fails.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "{} attempt {}/{} failed, retrying in {:?}: {}",
                        operation_name, attempt, self.max_attempts, self.delay, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    warn!(
                        "{} failed after {} attempts: {}",
                        operation_name, attempt, e
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, String> = quick()
            .run("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = quick()
            .run("broken", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            })
            .await;
        assert_eq!(result, Err("nope".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
