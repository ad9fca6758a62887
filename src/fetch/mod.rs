//! Source retrieval.
//!
//! Both sources are query results shaped as
//! `{ "query_result": { "data": { "rows": [ ... ] } } }`. A source that is
//! not an `http(s)` URL is read from disk instead.

mod basic;
mod client;
mod retry;

pub use basic::BasicClient;
pub use client::HttpClient;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::{Config, FetchPolicy};
use crate::error::FetchError;

/// One untyped row as delivered by a source.
pub type RawRow = serde_json::Map<String, Value>;

const ROWS_POINTER: &str = "/query_result/data/rows";

/// Rows from both sources, fetched together.
#[derive(Debug, Default)]
pub struct SourceRows {
    pub segments: Vec<RawRow>,
    pub stats: Vec<RawRow>,
}

/// Loads the row list from `source`, a URL or a local path.
#[tracing::instrument(skip_all, fields(source = %source))]
pub async fn fetch_rows<C: HttpClient>(
    client: &C,
    source: &str,
    policy: &FetchPolicy,
) -> Result<Vec<RawRow>, FetchError> {
    let body = if is_http(source) {
        fetch_text(client, source, policy).await?
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| FetchError::Io {
                url: source.to_string(),
                source: e,
            })?
    };
    debug!(bytes = body.len(), "Source body received");

    let rows = parse_rows(source, &body)?;
    info!(rows = rows.len(), "Source rows extracted");
    Ok(rows)
}

/// Fetches the segments and infographics sources concurrently. The first
/// failure aborts the other request.
pub async fn fetch_sources<C: HttpClient>(
    client: &C,
    config: &Config,
) -> Result<SourceRows, FetchError> {
    let (segments, stats) = tokio::try_join!(
        fetch_rows(client, &config.segments_url, &config.fetch),
        fetch_rows(client, &config.infographics_url, &config.fetch),
    )?;
    Ok(SourceRows { segments, stats })
}

/// Parses a response body and pulls out `query_result.data.rows`.
pub fn parse_rows(source: &str, body: &str) -> Result<Vec<RawRow>, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(|e| FetchError::Json {
        url: source.to_string(),
        source: e,
    })?;
    extract_rows(source, value)
}

/// Pulls the row list out of an already parsed payload.
pub fn extract_rows(source: &str, mut value: Value) -> Result<Vec<RawRow>, FetchError> {
    let shape_error = |message: String| FetchError::Shape {
        url: source.to_string(),
        message,
    };

    let rows = match value.pointer_mut(ROWS_POINTER).map(Value::take) {
        Some(Value::Array(rows)) => rows,
        Some(other) => {
            return Err(shape_error(format!(
                "query_result.data.rows is {}, expected an array",
                json_kind(&other)
            )));
        }
        None => return Err(shape_error("missing query_result.data.rows".to_string())),
    };

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| match row {
            Value::Object(map) => Ok(map),
            other => Err(shape_error(format!(
                "row {i} is {}, expected an object",
                json_kind(&other)
            ))),
        })
        .collect()
}

async fn fetch_text<C: HttpClient>(
    client: &C,
    source: &str,
    policy: &FetchPolicy,
) -> Result<String, FetchError> {
    let url = reqwest::Url::parse(source).map_err(|e| FetchError::InvalidUrl {
        url: source.to_string(),
        message: e.to_string(),
    })?;

    retry::get_text_with_retry(client, &url, policy).await
}

fn is_http(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays canned `(status, body)` responses in order.
    struct ScriptedClient {
        responses: Mutex<VecDeque<(u16, String)>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<(u16, &str)>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|(s, b)| (s, b.to_string()))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted response left");
            let resp = http::Response::builder().status(status).body(body).unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    /// Never answers within any sane timeout.
    struct StalledClient;

    #[async_trait]
    impl HttpClient for StalledClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let resp = http::Response::builder().status(200).body(String::new()).unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    /// Fails the first request with a refused connection, then answers
    /// with `body`.
    struct RefusingOnceClient {
        real: BasicClient,
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for RefusingOnceClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let closed = reqwest::Url::parse("http://127.0.0.1:1/").unwrap();
                return self
                    .real
                    .execute(reqwest::Request::new(reqwest::Method::GET, closed))
                    .await;
            }
            let resp = http::Response::builder().status(200).body(self.body).unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    /// Answers after `delay`.
    struct SlowClient {
        delay: Duration,
    }

    #[async_trait]
    impl HttpClient for SlowClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            tokio::time::sleep(self.delay).await;
            let resp = http::Response::builder().status(200).body(BODY).unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    fn fast_policy(retries: u32) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(5),
            retries,
            backoff: Duration::from_millis(1),
        }
    }

    const BODY: &str = r#"{"query_result":{"data":{"rows":[{"segment_id":1},{"segment_id":2}]}}}"#;

    #[test]
    fn test_extract_rows() {
        let value = json!({"query_result": {"data": {"rows": [{"a": 1}, {"b": "x"}]}}});
        let rows = extract_rows("test", value).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["a"], json!(1));
    }

    #[test]
    fn test_extract_rows_missing_path() {
        let value = json!({"query_result": {"data": {}}});
        let err = extract_rows("test", value).unwrap_err();
        assert!(matches!(err, FetchError::Shape { .. }));
    }

    #[test]
    fn test_extract_rows_not_array() {
        let value = json!({"query_result": {"data": {"rows": "nope"}}});
        let err = extract_rows("test", value).unwrap_err();
        assert!(err.to_string().contains("a string"));
    }

    #[test]
    fn test_extract_rows_non_object_row() {
        let value = json!({"query_result": {"data": {"rows": [{"a": 1}, 7]}}});
        let err = extract_rows("test", value).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_parse_rows_invalid_json() {
        let err = parse_rows("test", "{not json").unwrap_err();
        assert!(matches!(err, FetchError::Json { .. }));
    }

    #[test]
    fn test_is_http() {
        assert!(is_http("https://example.org/api"));
        assert!(is_http("HTTP://example.org"));
        assert!(!is_http("data/segments.json"));
    }

    #[tokio::test]
    async fn test_fetch_rows_success() {
        let client = ScriptedClient::new(vec![(200, BODY)]);
        let rows = fetch_rows(&client, "http://example.org/q", &fast_policy(0))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_rows_retries_server_error() {
        let client = ScriptedClient::new(vec![(503, ""), (200, BODY)]);
        let rows = fetch_rows(&client, "http://example.org/q", &fast_policy(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_rows_gives_up_after_retries() {
        let client = ScriptedClient::new(vec![(500, ""), (502, "")]);
        let err = fetch_rows(&client, "http://example.org/q", &fast_policy(1))
            .await
            .unwrap_err();
        match err {
            FetchError::Status { status, .. } => assert_eq!(status.as_u16(), 502),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_rows_client_error_not_retried() {
        let client = ScriptedClient::new(vec![(404, ""), (200, BODY)]);
        let err = fetch_rows(&client, "http://example.org/q", &fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { .. }));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_rows_timeout_aborts() {
        let policy = FetchPolicy {
            timeout: Duration::from_millis(20),
            retries: 3,
            backoff: Duration::from_millis(1),
        };
        let err = fetch_rows(&StalledClient, "http://example.org/q", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_fetch_rows_retries_refused_connection() {
        let client = RefusingOnceClient {
            real: BasicClient::new(),
            body: BODY,
            calls: AtomicUsize::new(0),
        };
        let rows = fetch_rows(&client, "http://example.org/q", &fast_policy(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_rows_refused_connection_without_retries() {
        let client = RefusingOnceClient {
            real: BasicClient::new(),
            body: BODY,
            calls: AtomicUsize::new(0),
        };
        let err = fetch_rows(&client, "http://example.org/q", &fast_policy(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_rows_slow_answer_within_deadline() {
        let client = SlowClient {
            delay: Duration::from_millis(10),
        };
        let rows = fetch_rows(&client, "http://example.org/q", &fast_policy(0))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_rows_slow_answer_past_deadline() {
        let client = SlowClient {
            delay: Duration::from_millis(200),
        };
        let policy = FetchPolicy {
            timeout: Duration::from_millis(50),
            retries: 2,
            backoff: Duration::from_millis(1),
        };
        let err = fetch_rows(&client, "http://example.org/q", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_fetch_rows_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        std::fs::write(&path, BODY).unwrap();

        let client = ScriptedClient::new(vec![]);
        let rows = fetch_rows(&client, path.to_str().unwrap(), &fast_policy(0))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_rows_missing_file() {
        let client = ScriptedClient::new(vec![]);
        let err = fetch_rows(&client, "/nonexistent/rows.json", &fast_policy(0))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }

    #[tokio::test]
    async fn test_fetch_sources_aborts_on_failure() {
        let client = ScriptedClient::new(vec![(404, ""), (404, "")]);
        let config = Config::new("http://example.org/a", "http://example.org/b");
        let result = fetch_sources(&client, &config).await;
        assert!(result.is_err());
    }
}
