use std::{future::Future, time::Duration};

use log::*;
use rand::Rng;

use crate::traits::ClassifiedError;

/// How often, and how patiently, an operation that lost a race on the database is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 5, base_delay: Duration::from_millis(25) }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self { attempts: attempts.max(1), base_delay }
    }

    /// Never retries.
    pub fn once() -> Self {
        Self { attempts: 1, base_delay: Duration::ZERO }
    }

    /// Exponential backoff with up to 50% random jitter, so that contending callers spread out.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(10);
        let delay = self.base_delay.saturating_mul(factor);
        let max_jitter = (delay.as_millis() / 2) as u64;
        let jitter = if max_jitter > 0 { rand::thread_rng().gen_range(0..=max_jitter) } else { 0 };
        delay + Duration::from_millis(jitter)
    }
}

/// Runs `op` until it succeeds, fails with an error that is not a concurrency conflict, or the policy runs out of
/// attempts. The last error is returned in the latter case.
pub async fn retry_on_conflict<T, E, F, Fut>(policy: RetryPolicy, name: &str, mut op: F) -> Result<T, E>
where
    E: ClassifiedError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt + 1 < policy.attempts => {
                let delay = policy.delay_for_attempt(attempt);
                debug!("🔁️ {name} lost a race ({e}). Retrying in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) if e.is_retryable() => {
                warn!("🔁️ {name} gave up after {} attempts. {e}", policy.attempts);
                return Err(e);
            },
            result => return result,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::traits::LedgerError;

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result = retry_on_conflict(policy, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(LedgerError::ConcurrencyConflict("busy".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_final_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result: Result<(), _> = retry_on_conflict(policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::WalletNotFound(1))
        })
        .await;
        assert!(matches!(result, Err(LedgerError::WalletNotFound(1))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<(), _> = retry_on_conflict(policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::ConcurrencyConflict("busy".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
