//! Network transport
//!
//! Everything that crosses the network goes through the [`Getter`] trait:
//! index documents, chart archives and provenance files.

use reqwest::blocking::Client;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching a URL
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Request did not complete in time
    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    /// Server answered 404
    #[error("Not found: {url}")]
    NotFound { url: String },

    /// Non-success HTTP status
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL scheme other than http/https
    #[error("Unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme { scheme: String, url: String },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Content too large
    #[error("Content too large: {size} bytes (max: {max})")]
    ContentTooLarge { size: u64, max: u64 },
}

/// Maximum size of any single download (index documents included)
pub const MAX_CONTENT_SIZE: u64 = 64 * 1024 * 1024;

/// Default per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the bytes behind a URL
pub trait Getter: Send + Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Reject anything that is not http(s)
pub fn check_scheme(url: &str) -> Result<url::Url, FetchError> {
    let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::UnsupportedScheme {
            scheme: other.to_string(),
            url: url.to_string(),
        }),
    }
}

/// Blocking HTTP getter with a bounded timeout per request
pub struct HttpGetter {
    client: Client,
    max_size: u64,
}

impl HttpGetter {
    /// Create a getter whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(format!("chartlock/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            max_size: MAX_CONTENT_SIZE,
        })
    }

    /// Limit the size of a single response body
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

impl Getter for HttpGetter {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = check_scheme(url)?;
        log::debug!("GET {}", parsed);

        let response = self.client.get(parsed).send().map_err(|e| classify(e, url))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_size {
                return Err(FetchError::ContentTooLarge {
                    size: len,
                    max: self.max_size,
                });
            }
        }

        // Read with a size limit; the body read is also bounded by the client timeout
        let mut content = Vec::new();
        let mut reader = response.take(self.max_size + 1);
        reader.read_to_end(&mut content).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::IoError(e)
            }
        })?;

        if content.len() as u64 > self.max_size {
            return Err(FetchError::ContentTooLarge {
                size: content.len() as u64,
                max: self.max_size,
            });
        }

        Ok(content)
    }
}

fn classify(error: reqwest::Error, url: &str) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::HttpError(error)
    }
}
