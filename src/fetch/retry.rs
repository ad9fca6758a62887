//! Retry loop for source requests.
//!
//! Connection failures, HTTP 429 and HTTP 5xx are retried up to
//! [`FetchPolicy::retries`] times with exponential backoff. Other 4xx
//! statuses are permanent. A timeout is never retried: it aborts the run.

use std::time::Duration;

use reqwest::{Method, Request, Response, StatusCode, Url};
use tracing::{debug, warn};

use super::client::HttpClient;
use crate::config::FetchPolicy;
use crate::error::FetchError;

/// Sends a GET for `url` and returns the body of the first successful
/// response. Each attempt, body included, must finish within
/// [`FetchPolicy::timeout`].
pub(crate) async fn get_text_with_retry<C: HttpClient>(
    client: &C,
    url: &Url,
    policy: &FetchPolicy,
) -> Result<String, FetchError> {
    let mut attempt: u32 = 0;

    loop {
        debug!(url = %url, attempt, "Sending request");

        match tokio::time::timeout(policy.timeout, send_once(client, url)).await {
            Err(_) => return Err(timeout_error(url, policy)),
            Ok(Err(e)) if e.is_timeout() => return Err(timeout_error(url, policy)),
            Ok(Err(e)) => {
                if !is_transient(&e) || attempt >= policy.retries {
                    return Err(FetchError::Request {
                        url: url.to_string(),
                        source: e,
                    });
                }
                warn!(url = %url, error = %e, attempt, "Transient request error");
            }
            Ok(Ok(Outcome::Body(text))) => return Ok(text),
            Ok(Ok(Outcome::Status(status))) => {
                if !is_retryable_status(status) || attempt >= policy.retries {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status,
                    });
                }
                warn!(url = %url, %status, attempt, "Retryable HTTP status");
            }
        }

        attempt += 1;
        let delay = backoff_delay(policy.backoff, attempt);
        warn!(url = %url, retry = attempt, of = policy.retries, ?delay, "Retrying");
        tokio::time::sleep(delay).await;
    }
}

enum Outcome {
    Body(String),
    Status(StatusCode),
}

async fn send_once<C: HttpClient>(client: &C, url: &Url) -> reqwest::Result<Outcome> {
    let resp = client.execute(Request::new(Method::GET, url.clone())).await?;
    let status = resp.status();
    if !status.is_success() {
        return Ok(Outcome::Status(status));
    }
    resp.text().await.map(Outcome::Body)
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`.
pub(crate) fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exp = retry.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

fn timeout_error(url: impl ToString, policy: &FetchPolicy) -> FetchError {
    FetchError::Timeout {
        url: url.to_string(),
        secs: policy.timeout.as_secs(),
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_request() || e.is_body()
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
