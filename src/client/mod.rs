//! HTTP client for the document store with classified retry and backoff.
//!
//! The [`Transport`] trait seams out the actual HTTP layer so that retry
//! classification, cursor lifecycle and the scan engine can be exercised with
//! scripted responses. [`HttpTransport`] is the production implementation.

use crate::options::ConnectionOptions;
use serde_json::json;
use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};
use thiserror::Error;
use tracing::{debug, warn};


pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status codes that indicate transient errors which should be retried.
const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("HTTP {method} {path} returned {status}: {body}")]
    Http {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },
    #[error("HTTP {method} {path} failed: {message}")]
    Transport {
        method: &'static str,
        path: String,
        message: String,
    },
    #[error("{source} (after {retries} retries)")]
    RetriesExhausted { retries: u32, source: Box<Error> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// One HTTP response from the store. Any status code is a response; failures
/// below the HTTP layer surface as [`TransportError`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl StoreResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A failure below the HTTP layer (connect, timeout, malformed response
/// framing). Origin and cause are indistinguishable to the caller, so these
/// are treated as retryable by default.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

pub trait Transport {
    /// Executes one HTTP request against the store. Implementations must
    /// return `Ok` for every received HTTP response regardless of status.
    fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> std::result::Result<StoreResponse, TransportError>;
}

/// Structured record of one HTTP request, successful or not.
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub method: &'static str,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub started_at: SystemTime,
    pub duration: Duration,
    /// `None` when the request failed below the HTTP layer.
    pub status: Option<u16>,
    pub reason: Option<String>,
}

/// Observability sink for per-request traces. Recording must not alter retry
/// or error behavior; the client calls it for failed requests as well.
pub trait TraceSink: Send + Sync {
    fn record(&self, trace: &RequestTrace);
}

/// Production [`Transport`] over a blocking HTTP client.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpTransport {
    pub fn new(options: &ConnectionOptions) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .connect_timeout(Duration::from_millis(options.timeout_ms))
            .danger_accept_invalid_certs(options.use_tls && !options.verify_tls)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Transport {
                method: "INIT",
                path: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: options.base_url(),
            username: options.username.clone(),
            password: options.password.clone(),
        })
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> std::result::Result<StoreResponse, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        request = request.header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request.send().map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string();
        let body = response.text().map_err(|e| TransportError(e.to_string()))?;
        Ok(StoreResponse {
            status,
            reason,
            body,
        })
    }
}

/// Executes store requests with exponential-backoff retry for transient
/// failures, and exposes the cursor (scroll) protocol endpoints.
pub struct RetryClient<T: Transport> {
    transport: T,
    base_url: String,
    max_retries: u32,
    retry_interval_ms: u64,
    backoff_factor: f64,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl<T: Transport> RetryClient<T> {
    pub fn new(transport: T, options: &ConnectionOptions) -> Self {
        Self {
            transport,
            base_url: options.base_url(),
            max_retries: options.max_retries,
            retry_interval_ms: options.retry_interval_ms,
            backoff_factor: options.retry_backoff_factor,
            trace_sink: None,
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    /// Performs a single request attempt. Any HTTP response is `Ok`; only
    /// sub-HTTP failures are `Err`. The trace sink fires in both cases.
    fn perform(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> std::result::Result<StoreResponse, TransportError> {
        let started_at = SystemTime::now();
        let start = Instant::now();
        let outcome = self.transport.execute(method, path, body);

        if let Some(sink) = &self.trace_sink {
            let mut request_headers = vec![("Accept".to_string(), "application/json".to_string())];
            if body.is_some() {
                request_headers.push(("Content-Type".to_string(), "application/json".to_string()));
            }
            let (status, reason) = match &outcome {
                Ok(response) => (Some(response.status), Some(response.reason.clone())),
                Err(_) => (None, None),
            };
            sink.record(&RequestTrace {
                method: method.as_str(),
                url: format!("{}{}", self.base_url, path),
                request_headers,
                started_at,
                duration: start.elapsed(),
                status,
                reason,
            });
        }

        outcome
    }

    /// Performs a request, retrying transient failures with exponential
    /// backoff. Returns the response only on 2xx; any other terminal outcome
    /// is an error, annotated with the retry count when retries were used.
    pub fn perform_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<StoreResponse> {
        let mut backoff_ms = self.retry_interval_ms as f64;
        let mut retries = 0u32;

        let annotate = |error: Error, retries: u32| {
            if retries > 0 {
                Error::RetriesExhausted {
                    retries,
                    source: Box::new(error),
                }
            } else {
                error
            }
        };

        loop {
            match self.perform(method, path, body) {
                Ok(response) if response.is_success() => {
                    if retries > 0 {
                        debug!(path, retries, "request succeeded after retries");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let retryable = RETRYABLE_STATUS_CODES.contains(&response.status);
                    if !retryable || retries >= self.max_retries {
                        let error = Error::Http {
                            method: method.as_str(),
                            path: path.to_string(),
                            status: response.status,
                            body: response.body,
                        };
                        return Err(annotate(error, retries));
                    }
                }
                // Network errors are generally retryable.
                Err(TransportError(message)) => {
                    if retries >= self.max_retries {
                        let error = Error::Transport {
                            method: method.as_str(),
                            path: path.to_string(),
                            message,
                        };
                        return Err(annotate(error, retries));
                    }
                }
            }

            debug!(path, retries, backoff_ms, "retrying transient failure");
            std::thread::sleep(Duration::from_millis(backoff_ms as u64));
            backoff_ms *= self.backoff_factor;
            retries += 1;
        }
    }

    /// Fetches the field mapping for a (possibly wildcard) collection name.
    pub fn fetch_mapping(&self, collection: &str) -> Result<StoreResponse> {
        self.perform_with_retry(Method::Get, &format!("/{collection}/_mapping"), None)
    }

    /// Opens a server-side cursor with an initial page request.
    pub fn open_cursor(
        &self,
        collection: &str,
        query: &str,
        ttl: &str,
        page_size: u32,
    ) -> Result<StoreResponse> {
        let path = format!("/{collection}/_search?scroll={ttl}&size={page_size}");
        self.perform_with_retry(Method::Post, &path, Some(query))
    }

    /// Fetches the next page for an open cursor using only its opaque token.
    pub fn continue_cursor(&self, cursor_id: &str, ttl: &str) -> Result<StoreResponse> {
        let body = json!({ "scroll": ttl, "scroll_id": cursor_id }).to_string();
        self.perform_with_retry(Method::Post, "/_search/scroll", Some(&body))
    }

    /// Closes a server-side cursor. Fire-and-forget: never retried, and a
    /// failure is swallowed since cursor cleanup is not critical.
    pub fn close_cursor(&self, cursor_id: &str) {
        let body = json!({ "scroll_id": cursor_id }).to_string();
        match self.perform(Method::Delete, "/_search/scroll", Some(&body)) {
            Ok(response) if response.is_success() => {}
            Ok(response) => warn!(status = response.status, "cursor close rejected"),
            Err(e) => warn!(error = %e, "cursor close failed"),
        }
    }
}
