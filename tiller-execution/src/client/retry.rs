use crate::ExecutionError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Timeout & backoff policy applied to exchange port reads.
///
/// Write calls (order placement) must NOT be blindly retried: a timeout there
/// is an ambiguous outcome resolved by the caller via an idempotency-key
/// status query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            call_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `op` with the per-call timeout, retrying transient failures with
    /// exponential backoff until `max_attempts` is exhausted.
    pub async fn call<F, Fut, T>(
        &self,
        name: &'static str,
        token: &CancellationToken,
        op: F,
    ) -> Result<T, ExecutionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let mut attempt = 1;

        loop {
            if token.is_cancelled() {
                return Err(ExecutionError::Canceled);
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ExecutionError::Canceled),
                result = tokio::time::timeout(self.call_timeout, op()) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(ExecutionError::Timeout(self.call_timeout.as_secs())),
                    }
                }
            };

            match outcome {
                Err(error) if error.is_transient() && attempt < self.max_attempts => {
                    let backoff = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        %error,
                        call = name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient exchange fault, backing off before retry"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::SmolStr;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_faults() {
        let policy = RetryPolicy {
            max_attempts: 3,
            call_timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(1),
        };
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let actual = policy
            .call("get_price", &token, || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(ExecutionError::Transient(SmolStr::new("flaky"))),
                    _ => Ok(42u32),
                }
            })
            .await;

        assert_eq!(actual, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(1),
        };
        let token = CancellationToken::new();

        let actual: Result<u32, _> = policy
            .call("get_price", &token, || async {
                Err(ExecutionError::Transient(SmolStr::new("down")))
            })
            .await;

        assert!(matches!(actual, Err(ExecutionError::Transient(_))));
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_permanent_faults() {
        let policy = RetryPolicy::default();
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let actual: Result<u32, _> = policy
            .call("get_price", &token, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::Permanent(SmolStr::new("bad symbol")))
            })
            .await;

        assert!(matches!(actual, Err(ExecutionError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_honours_cancellation() {
        let policy = RetryPolicy::default();
        let token = CancellationToken::new();
        token.cancel();

        let actual: Result<u32, _> = policy
            .call("get_price", &token, || async { Ok(1) })
            .await;

        assert_eq!(actual, Err(ExecutionError::Canceled));
    }
}
