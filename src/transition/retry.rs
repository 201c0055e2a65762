use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use retry_policies::policies::ExponentialBackoff;
use retry_policies::{RetryDecision, RetryPolicy};

use crate::error::TransitionError;
use crate::settings::TransitionSettings;

pub fn make_retry_policy(settings: &TransitionSettings) -> ExponentialBackoff {
    ExponentialBackoff::builder()
        .retry_bounds(settings.min_retry_interval, settings.max_retry_interval)
        .build_with_max_retries(settings.max_retries)
}

/// Runs `op`, retrying transient failures with randomized exponential backoff until the policy gives up. Other
/// failures return immediately.
pub async fn with_retries<T, F, Fut>(
    operation: &str, policy: &ExponentialBackoff, mut op: F,
) -> Result<T, TransitionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransitionError>>,
{
    let mut past_retries = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };

        match policy.should_retry(past_retries) {
            RetryDecision::Retry { execute_after } => {
                let wait = (execute_after - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tracing::warn!(error=?err, %operation, ?wait, attempt=%(past_retries + 1), "retrying provisioning call");
                tokio::time::sleep(wait).await;
                past_retries += 1;
            },
            RetryDecision::DoNotRetry => {
                tracing::error!(error=?err, %operation, "giving up on provisioning call");
                return Err(TransitionError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: past_retries + 1,
                    source: Box::new(err),
                });
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> ExponentialBackoff {
        make_retry_policy(&TransitionSettings {
            max_retries,
            min_retry_interval: Duration::from_millis(1),
            max_retry_interval: Duration::from_millis(5),
        })
    }

    fn transient() -> TransitionError {
        TransitionError::Transient { operation: "describe".to_string(), reason: "timeout".to_string() }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let actual = with_retries("describe", &policy(3), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(17)
            }
        })
        .await;
        assert_eq!(assert_ok!(actual), 17);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let actual: Result<(), _> = with_retries("describe", &policy(2), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        match assert_err!(actual) {
            TransitionError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            err => panic!("unexpected error: {err}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_control_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let actual: Result<(), _> = with_retries("resize", &policy(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransitionError::Control { operation: "resize".to_string(), reason: "invalid".to_string() })
        })
        .await;
        assert_err!(actual);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
