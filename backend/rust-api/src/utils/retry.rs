use rand::Rng;
use std::time::Duration;

use crate::config::SyncConfig;

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_sync(config: &SyncConfig) -> Self {
        let base = Duration::from_millis(config.base_backoff_ms);
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: base,
            max_backoff: base * 16,
            jitter_max: Some(base / 2),
        }
    }

    fn wait_for(&self, backoff: Duration) -> Duration {
        match self.jitter_max {
            Some(jitter) if !jitter.is_zero() => {
                let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
                backoff + Duration::from_millis(extra)
            }
            _ => backoff,
        }
    }
}

/// Retries `f` while it fails and `retryable` accepts the error.
///
/// Errors rejected by `retryable` are returned immediately.
pub async fn retry_if<F, Fut, T, E, P>(policy: &RetryPolicy, retryable: P, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempts_left = policy.max_attempts.max(1);
    let mut backoff = policy.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left = attempts_left.saturating_sub(1);
                if attempts_left == 0 || !retryable(&e) {
                    return Err(e);
                }

                let wait = policy.wait_for(backoff);
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                backoff = std::cmp::min(backoff * 2, policy.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_retries() {
        let counter = AtomicUsize::new(0);

        let res: Result<usize, &'static str> = retry_if(&quick(3), |_| true, || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("fail")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(res, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> = retry_if(&quick(2), |_| true, || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always fail")
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);

        let res: Result<(), &'static str> =
            retry_if(&quick(5), |e| *e != "unauthorized", || async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("unauthorized")
            })
            .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_follows_sync_config() {
        let policy = RetryPolicy::from_sync(&SyncConfig {
            mode: crate::config::SyncMode::Background,
            max_attempts: 0,
            base_backoff_ms: 40,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_backoff, Duration::from_millis(640));
        assert_eq!(policy.jitter_max, Some(Duration::from_millis(20)));
    }
}
