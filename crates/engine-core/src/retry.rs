use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Bounded exponential backoff for short idempotent statements, primarily
/// the checkpoint store's point writes. Bulk-load work is never retried at
/// this level: a failed partition rolls back whole and stays pending for a
/// resume.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Preset for checkpoint-store writes: a few quick attempts, capped
    /// under the time a partition takes anyway.
    pub fn for_checkpoint() -> Self {
        Self::new(5, Duration::from_millis(250), Duration::from_secs(5))
    }

    /// Runs `op` until it succeeds or the attempts are exhausted, returning
    /// the final error in the latter case.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    sleep(self.backoff_delay(attempt - 1)).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u128 << attempt.min(6);
        let delay_ms = self.base_delay.as_millis().saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let policy = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);
        let attempts = Arc::new(AtomicUsize::new(0));
        let op_attempts = attempts.clone();

        let result: Result<&str, &str> = policy
            .run(move || {
                let op_attempts = op_attempts.clone();
                async move {
                    if op_attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient")
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_the_last_error() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        let attempts = Arc::new(AtomicUsize::new(0));
        let op_attempts = attempts.clone();

        let result: Result<(), &str> = policy
            .run(move || {
                let op_attempts = op_attempts.clone();
                async move {
                    op_attempts.fetch_add(1, Ordering::SeqCst);
                    Err("still down")
                }
            })
            .await;

        assert_eq!(result, Err("still down"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(60), Duration::from_secs(1));
    }
}
