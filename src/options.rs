use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("missing required connection parameter '{0}'")]
    MissingParameter(&'static str),
}

/// Connection and tuning settings for one document-store endpoint.
///
/// These are plain scalar settings with documented defaults; the host engine
/// owns where they come from (session settings, named parameters, ...). Note
/// that changing [`sample_size`](Self::sample_size) changes resolved schemas,
/// so any [`BindCache`](crate::cache::BindCache) built against the old value
/// must be cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub verify_tls: bool,
    /// Per-attempt request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries for transient failures.
    pub max_retries: u32,
    /// Initial wait between retries in milliseconds.
    pub retry_interval_ms: u64,
    /// Multiplier applied to the wait after each failed attempt.
    pub retry_backoff_factor: f64,
    /// Number of documents sampled for array/residual detection. 0 disables
    /// sampling entirely.
    pub sample_size: u32,
    /// Number of documents fetched per cursor page.
    pub page_size: u32,
    /// For small limits, all `limit + offset` rows are fetched in one page when
    /// that total is at most `page_size * page_size_threshold_factor`.
    pub page_size_threshold_factor: u32,
    /// Server-side cursor keep-alive, e.g. "5m".
    pub cursor_ttl: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 9200,
            username: None,
            password: None,
            use_tls: false,
            verify_tls: true,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_interval_ms: 100,
            retry_backoff_factor: 2.0,
            sample_size: 100,
            page_size: 1000,
            page_size_threshold_factor: 5,
            cursor_ttl: "5m".to_string(),
        }
    }
}

impl ConnectionOptions {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::MissingParameter("host"));
        }
        Ok(())
    }

    pub(crate) fn base_url(&self) -> String {
        let protocol = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", protocol, self.host, self.port)
    }
}
