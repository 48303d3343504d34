use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{header, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("request for {url} failed: {reason}")]
    Network {
        url: String,
        reason: String,
        transient: bool,
    },
}

impl TransportError {
    /// Transient failures are retried with a resume rather than surfaced.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Client(_) => false,
            TransportError::Network { transient, .. } => *transient,
        }
    }
}

/// An open byte stream for one asset file.
pub struct Download {
    pub reader: Box<dyn Read>,
    /// Offset the server actually honored. Zero means the transfer starts
    /// from scratch even if a range was requested.
    pub resumed_from: u64,
    pub total_len: Option<u64>,
}

/// Seam between the fetcher and the network, so retry/resume/idempotency
/// behavior is testable without a live asset host.
pub trait AssetTransport {
    /// Opens `url` for reading, asking the server to start at `offset`.
    fn open(&self, url: &str, offset: u64) -> Result<Download, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;
        Ok(Self { client })
    }
}

impl AssetTransport for HttpTransport {
    fn open(&self, url: &str, offset: u64) -> Result<Download, TransportError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().map_err(|err| TransportError::Network {
            url: url.to_string(),
            reason: err.to_string(),
            transient: err.is_timeout() || err.is_connect() || err.is_request(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Network {
                url: url.to_string(),
                reason: format!("server returned {status}"),
                transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            });
        }

        // A server that ignores the range header replies 200 with the whole
        // body; the caller must then restart the file.
        let resumed_from = if offset > 0 && status == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            0
        };
        let total_len = response.content_length().map(|len| len + resumed_from);

        Ok(Download {
            reader: Box::new(response),
            resumed_from,
            total_len,
        })
    }
}
