//! Retry with exponential backoff for outbound HTTP calls.
//!
//! Used by the remote proof backend and the external anchoring adapter.
//! Transport failures (connect errors, timeouts) and 5xx responses are
//! retried. Anything else, including 4xx, is handed back to the caller on
//! the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::config::RETRY_BASE_DELAY_MS;

/// Retry budget for one logical call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubles every attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// All attempts failed.
#[derive(Debug, thiserror::Error)]
#[error("{attempts} attempt(s) failed, last error: {last}")]
pub struct Exhausted {
    pub attempts: u32,
    pub last: String,
}

/// Send a request built by `f`, retrying per `policy`.
///
/// Delays with the default policy: 200ms → 400ms → 800ms.
pub(crate) async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    f: F,
) -> Result<reqwest::Response, Exhausted>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut last = String::new();
    for attempt in 0..=policy.retries {
        match f().await {
            Ok(resp) if resp.status().is_server_error() => {
                last = format!("HTTP {}", resp.status());
            }
            Ok(resp) => return Ok(resp),
            Err(e) if e.is_timeout() => last = "request timed out".to_string(),
            Err(e) => last = e.to_string(),
        }

        if attempt < policy.retries {
            let delay = policy.delay(attempt);
            tracing::warn!(
                target_service = target,
                attempt = attempt + 1,
                max_retries = policy.retries,
                "request failed, retrying in {delay:?}: {last}"
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(Exhausted {
        attempts: policy.retries + 1,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(1), Duration::from_millis(400));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn exhausts_all_attempts_on_transport_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let result = send_with_retry(&fast(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            // Guaranteed-closed port: connection refused.
            client.get("http://127.0.0.1:1/").send()
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let resp = send_with_retry(&fast(3), "test", || client.get(&url).send())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let resp = send_with_retry(&fast(3), "test", || client.get(&url).send())
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }
}
