//! HTTP invoker — executes one job's request with retries, size caps,
//! and a per-request timeout. One call yields one terminal outcome.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use chimer_core::error::{Error, Result};
use chimer_core::types::{ExecutionStatus, HttpMethod, Job};

/// Attempts per invocation (initial try plus up to two retries).
pub const MAX_ATTEMPTS: u32 = 3;
/// Response and request payload cap.
pub const BODY_CAP_BYTES: usize = 10 * 1024;
/// Appended when a payload is cut at the cap.
pub const TRUNCATION_SUFFIX: &str = "… [truncated]";
/// How much of an error response body is carried into the error message.
const ERROR_BODY_SNIPPET_BYTES: usize = 200;

/// Terminal result of one attempt sequence.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub status: ExecutionStatus,
    pub response_code: Option<u16>,
    /// Milliseconds from first attempt to terminal outcome, backoffs included.
    pub execution_time: u64,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    /// Retries actually performed; `None` when the outcome needed none.
    pub retry_count: Option<u32>,
}

/// Seam between the engine and the HTTP layer; lets tests script outcomes.
#[async_trait]
pub trait Invoke: Send + Sync {
    async fn invoke(&self, job: &Job) -> InvokeOutcome;
}

/// Production invoker backed by a shared reqwest client.
pub struct HttpInvoker {
    client: reqwest::Client,
}

enum Attempt {
    /// A response arrived, whatever its status.
    Completed {
        code: u16,
        reason: &'static str,
        body: String,
    },
    /// The request never completed.
    Transport {
        kind: &'static str,
        message: String,
        retryable: bool,
    },
}

impl HttpInvoker {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chimer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    async fn attempt(&self, job: &Job, headers: HeaderMap) -> Attempt {
        let mut request = match job.method {
            HttpMethod::Get => self.client.get(&job.url),
            HttpMethod::Post => self.client.post(&job.url),
        };
        request = request
            .headers(headers)
            .timeout(Duration::from_millis(job.timeout_ms()));

        if job.method == HttpMethod::Post {
            if let Some(body) = &job.body {
                let capped = cap_request_body(body);
                match serde_json::from_str::<serde_json::Value>(&capped) {
                    Ok(value) => request = request.json(&value),
                    Err(_) => request = request.body(capped.into_owned()),
                }
            }
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let reason = status.canonical_reason().unwrap_or("Unknown");
                match response.text().await {
                    Ok(body) => Attempt::Completed {
                        code: status.as_u16(),
                        reason,
                        body,
                    },
                    Err(e) => transport_attempt(&e),
                }
            }
            Err(e) => transport_attempt(&e),
        }
    }
}

#[async_trait]
impl Invoke for HttpInvoker {
    async fn invoke(&self, job: &Job) -> InvokeOutcome {
        let started = Instant::now();
        let headers = build_headers(job);
        let mut retries = 0u32;
        let mut attempt = 1u32;

        loop {
            match self.attempt(job, headers.clone()).await {
                Attempt::Completed { code, reason, body } => {
                    if (200..300).contains(&code) {
                        debug!(job_id = %job.id, code, "request succeeded");
                        return InvokeOutcome {
                            status: ExecutionStatus::Success,
                            response_code: Some(code),
                            execution_time: elapsed_ms(started),
                            response_body: Some(truncate_with_suffix(&body, BODY_CAP_BYTES)),
                            error_message: None,
                            retry_count: None,
                        };
                    }
                    if is_retryable_status(code) && attempt < MAX_ATTEMPTS {
                        warn!(job_id = %job.id, code, attempt, "retryable HTTP status");
                    } else {
                        return InvokeOutcome {
                            status: ExecutionStatus::Failed,
                            response_code: Some(code),
                            execution_time: elapsed_ms(started),
                            response_body: None,
                            error_message: Some(http_error_message(code, reason, &body)),
                            retry_count: (retries > 0).then_some(retries),
                        };
                    }
                }
                Attempt::Transport {
                    kind,
                    message,
                    retryable,
                } => {
                    if retryable && attempt < MAX_ATTEMPTS {
                        warn!(job_id = %job.id, kind, attempt, "transport error, will retry");
                    } else {
                        return InvokeOutcome {
                            status: ExecutionStatus::Failed,
                            response_code: None,
                            execution_time: elapsed_ms(started),
                            response_body: None,
                            error_message: Some(network_error_message(kind, &message)),
                            retry_count: (retries > 0).then_some(retries),
                        };
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(backoff_ms(attempt))).await;
            retries += 1;
            attempt += 1;
        }
    }
}

fn transport_attempt(e: &reqwest::Error) -> Attempt {
    // Malformed URLs are permanent; everything transport-level is worth a retry.
    let (kind, retryable) = if e.is_builder() {
        ("url", false)
    } else if e.is_timeout() {
        ("timeout", true)
    } else if e.is_connect() {
        ("connect", true)
    } else {
        ("request", true)
    };
    Attempt::Transport {
        kind,
        message: e.to_string(),
        retryable,
    }
}

/// Backoff before the attempt following attempt `n` (1-indexed): 1s, 2s, 4s…
pub fn backoff_ms(attempt: u32) -> u64 {
    1_000u64 << (attempt.saturating_sub(1).min(16))
}

pub fn is_retryable_status(code: u16) -> bool {
    code >= 500 || code == 429
}

/// Parse the job's stored header JSON into a header map. Invalid JSON or
/// a non-object is non-fatal: the request goes out with no extra headers.
pub fn build_headers(job: &Job) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(raw) = job.headers.as_deref() else {
        return headers;
    };
    if raw.trim().is_empty() {
        return headers;
    }
    let map: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "invalid header JSON, sending without headers");
            return headers;
        }
    };
    for (key, value) in map {
        let text = match value.as_str() {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned(value.to_string()),
        };
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&text),
        ) {
            (Ok(name), Ok(val)) => {
                headers.insert(name, val);
            }
            _ => warn!(job_id = %job.id, header = %key, "skipping unusable header"),
        }
    }
    headers
}

fn cap_request_body(body: &str) -> Cow<'_, str> {
    if body.len() <= BODY_CAP_BYTES {
        Cow::Borrowed(body)
    } else {
        Cow::Owned(truncate_with_suffix(body, BODY_CAP_BYTES))
    }
}

/// Cut `text` at `cap` bytes (on a char boundary) and mark the cut.
pub fn truncate_with_suffix(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_SUFFIX)
}

pub fn http_error_message(code: u16, reason: &str, body: &str) -> String {
    let snippet = body.trim();
    if snippet.is_empty() {
        format!("HTTP {code}: {reason}")
    } else {
        format!(
            "HTTP {code}: {reason} - {}",
            truncate_with_suffix(snippet, ERROR_BODY_SNIPPET_BYTES)
        )
    }
}

pub fn network_error_message(kind: &str, message: &str) -> String {
    if message.is_empty() {
        format!("Network error: {kind}")
    } else {
        format!("Network error: {kind} - {message}")
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimer_core::types::ScheduleType;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::JoinHandle;

    fn job_with_headers(headers: Option<&str>) -> Job {
        let mut job = Job::new(
            "t".into(),
            "https://api.example.com/hook".into(),
            HttpMethod::Post,
            "5s".into(),
            ScheduleType::Repeat,
        );
        job.headers = headers.map(str::to_string);
        job
    }

    fn get_job(url: String) -> Job {
        Job::new("e2e".into(), url, HttpMethod::Get, "5s".into(), ScheduleType::Repeat)
    }

    fn raw_response(code: u16, reason: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {code} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Serve one scripted response per incoming connection, then stop.
    async fn scripted_server(responses: Vec<String>) -> (SocketAddr, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn retries_5xx_then_succeeds() {
        let (addr, server) = scripted_server(vec![
            raw_response(500, "Internal Server Error", "boom"),
            raw_response(500, "Internal Server Error", "boom"),
            raw_response(200, "OK", "{\"ok\":true}"),
        ])
        .await;
        let invoker = HttpInvoker::new().unwrap();
        let outcome = invoker.invoke(&get_job(format!("http://{addr}/hook"))).await;
        server.abort();

        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.response_code, Some(200));
        assert_eq!(outcome.response_body.as_deref(), Some("{\"ok\":true}"));
        assert!(outcome.error_message.is_none());
        assert!(outcome.retry_count.is_none());
        // Two backoffs happened: 1000 + 2000 ms.
        assert!(outcome.execution_time >= 3_000);
    }

    #[tokio::test]
    async fn non_retryable_404_fails_on_first_attempt() {
        let (addr, server) = scripted_server(vec![raw_response(
            404,
            "Not Found",
            "{\"error\":\"missing\"}",
        )])
        .await;
        let invoker = HttpInvoker::new().unwrap();
        let outcome = invoker.invoke(&get_job(format!("http://{addr}/hook"))).await;
        server.abort();

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.response_code, Some(404));
        let message = outcome.error_message.unwrap();
        assert!(message.starts_with("HTTP 404: "), "{message}");
        assert!(outcome.retry_count.is_none());
        assert!(outcome.execution_time < 1_000);
    }

    #[tokio::test]
    async fn connection_refused_exhausts_retries() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let invoker = HttpInvoker::new().unwrap();
        let outcome = invoker.invoke(&get_job(format!("http://{addr}/hook"))).await;

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.response_code, None);
        assert!(outcome
            .error_message
            .unwrap()
            .starts_with("Network error: "));
        assert_eq!(outcome.retry_count, Some(MAX_ATTEMPTS - 1));
        assert!(outcome.execution_time >= 3_000);
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        assert_eq!(backoff_ms(1), 1_000);
        assert_eq!(backoff_ms(2), 2_000);
        assert_eq!(backoff_ms(3), 4_000);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn truncation_appends_suffix_at_cap() {
        let long = "x".repeat(BODY_CAP_BYTES + 5);
        let cut = truncate_with_suffix(&long, BODY_CAP_BYTES);
        assert!(cut.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(cut.len(), BODY_CAP_BYTES + TRUNCATION_SUFFIX.len());

        let short = "hello";
        assert_eq!(truncate_with_suffix(short, BODY_CAP_BYTES), "hello");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ééééé"; // 2 bytes per char
        let cut = truncate_with_suffix(text, 5);
        assert!(cut.starts_with("éé"));
        assert!(cut.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn http_error_message_carries_body_snippet() {
        let msg = http_error_message(404, "Not Found", "{\"error\":\"missing\"}");
        assert!(msg.starts_with("HTTP 404: Not Found - "));
        assert!(msg.contains("missing"));

        let bare = http_error_message(500, "Internal Server Error", "  ");
        assert_eq!(bare, "HTTP 500: Internal Server Error");

        let long_body = "b".repeat(1_000);
        let capped = http_error_message(502, "Bad Gateway", &long_body);
        assert!(capped.len() < 300);
        assert!(capped.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn network_error_message_shape() {
        assert_eq!(
            network_error_message("timeout", "operation timed out"),
            "Network error: timeout - operation timed out"
        );
        assert_eq!(network_error_message("connect", ""), "Network error: connect");
    }

    #[test]
    fn headers_parse_or_fall_back_to_empty() {
        let job = job_with_headers(Some(r#"{"X-Api-Key":"abc","X-Retry":3}"#));
        let map = build_headers(&job);
        assert_eq!(map.get("x-api-key").unwrap(), "abc");
        assert_eq!(map.get("x-retry").unwrap(), "3");

        let job = job_with_headers(Some("not json"));
        assert!(build_headers(&job).is_empty());

        let job = job_with_headers(Some(""));
        assert!(build_headers(&job).is_empty());

        let job = job_with_headers(None);
        assert!(build_headers(&job).is_empty());
    }

    #[test]
    fn request_body_is_capped() {
        let body = "y".repeat(BODY_CAP_BYTES * 2);
        let capped = cap_request_body(&body);
        assert!(capped.len() <= BODY_CAP_BYTES + TRUNCATION_SUFFIX.len());
        let small = cap_request_body("{}");
        assert_eq!(small, "{}");
    }
}
