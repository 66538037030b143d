//! HTTP transport for outbound agent calls
//!
//! Discovery and forwarding talk to remote agents through the
//! [`HttpTransport`] trait so the retry policy and response handling can be
//! exercised against a scripted fake (see `testing::mocks::MockTransport`).

pub mod http;
pub mod retry;

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub use http::ReqwestTransport;
pub use retry::{Disposition, RetryPolicy};

/// Raw HTTP response as seen by the router
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures below the HTTP status level
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

impl TransportError {
    /// Connection and timeout failures may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

/// Outbound JSON-over-HTTP transport
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `body` as JSON to `url`, waiting at most `timeout` for the response
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}
