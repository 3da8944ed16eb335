//! HTTP GET with retry and backoff for transient failures.
//!
//! Connection errors, timeouts, `429` and `5xx` responses are retried.
//! Any other non-2xx status fails immediately as [`FetchError::InvalidResponse`].

use crate::error::{FetchError, Result};
use reqwest::{Client, Response, StatusCode, Url};
use std::time::Duration;
use tracing::warn;

/// Default number of fetch attempts (1 initial + 1 retry).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default backoff between attempts in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 500;

/// Configuration for [`fetch_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (0 is treated as 1).
    pub max_attempts: u32,
    /// Sleep duration between consecutive attempts.
    pub backoff: Duration,
    /// Per-attempt timeout. When `None`, the client's own timeout applies.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            timeout: None,
        }
    }
}

/// Scheme, host and path only; query strings may carry credentials.
pub(crate) fn redacted(url: &Url) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.path()
    )
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Fetch a URL via HTTP GET, retrying transient failures.
///
/// # Errors
///
/// Returns the last failure once attempts are exhausted, or the first
/// non-transient status as [`FetchError::InvalidResponse`].
pub async fn fetch_with_retry(client: &Client, url: &Url, config: &RetryConfig) -> Result<Response> {
    let max_attempts = config.max_attempts.max(1);
    let target = redacted(url);
    let mut attempt = 1;

    loop {
        let mut request = client.get(url.clone());
        if let Some(timeout) = config.timeout {
            request = request.timeout(timeout);
        }

        let error = match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                warn!(
                    "HTTP fetch returned {} for {} (attempt {}/{})",
                    status, target, attempt, max_attempts
                );
                let error = FetchError::InvalidResponse(format!("HTTP {status}"));
                if !is_transient(status) {
                    return Err(error);
                }
                error
            }
            Err(e) => {
                let error = FetchError::from(e);
                warn!(
                    "HTTP fetch failed for {} (attempt {}/{}): {}",
                    target, attempt, max_attempts, error
                );
                error
            }
        };

        if attempt >= max_attempts {
            return Err(error);
        }

        warn!("Retrying HTTP fetch in {}ms...", config.backoff.as_millis());
        tokio::time::sleep(config.backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: Duration::from_millis(1),
            timeout: None,
        }
    }

    fn url(server: &MockServer) -> Url {
        Url::parse(&server.uri()).unwrap()
    }

    #[test]
    fn retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(cfg.backoff, Duration::from_millis(DEFAULT_BACKOFF_MS));
        assert!(cfg.timeout.is_none());
    }

    #[test]
    fn redacted_drops_query() {
        let url = Url::parse("https://api.example.com/3/movie/550?api_key=secret").unwrap();
        assert_eq!(redacted(&url), "https://api.example.com/3/movie/550");
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(StatusCode::NOT_FOUND));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
    }

    // ---- Integration tests using wiremock ----

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let response = fetch_with_retry(&Client::new(), &url(&server), &fast(2))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;

        // 200 fallback (lower priority, mounted first)
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        // 500 on first hit (higher priority, deactivates after 1)
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let response = fetch_with_retry(&Client::new(), &url(&server), &fast(2))
            .await
            .expect("success after retry");
        assert_eq!(response.text().await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn returns_last_error_after_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetch_with_retry(&Client::new(), &url(&server), &fast(3))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::InvalidResponse("HTTP 503 Service Unavailable".into()));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetch_with_retry(&Client::new(), &url(&server), &fast(3))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_with_retry(&Client::new(), &url(&server), &fast(0)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_failure() {
        let url = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
        let err = fetch_with_retry(&Client::new(), &url, &fast(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
