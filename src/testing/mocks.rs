//! Mock implementations for testing
//!
//! Provides a scripted [`HttpTransport`] so discovery, forwarding and the
//! routing pipeline can be exercised without a network.

use crate::transport::{HttpResponse, HttpTransport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type MockOutcome = Result<HttpResponse, TransportError>;

/// A request seen by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Value,
    pub timeout: Duration,
}

/// Mock transport for testing
///
/// Responses are scripted per URL: queued one-shot outcomes are consumed
/// first, then the URL's repeating outcome, if any. A URL with nothing
/// scripted behaves like a closed port.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    pub recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    queued: Arc<Mutex<HashMap<String, VecDeque<MockOutcome>>>>,
    repeating: Arc<Mutex<HashMap<String, MockOutcome>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot outcome for `url`
    pub async fn push(&self, url: &str, outcome: MockOutcome) {
        self.queued
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Queue a one-shot response with the given status and body
    pub async fn push_response(&self, url: &str, status: u16, body: impl Into<String>) {
        self.push(url, Ok(HttpResponse::new(status, body))).await;
    }

    /// Queue a one-shot JSON response
    pub async fn push_json(&self, url: &str, status: u16, body: &Value) {
        self.push_response(url, status, body.to_string()).await;
    }

    /// Answer every otherwise unscripted request to `url` with `outcome`
    pub async fn always(&self, url: &str, outcome: MockOutcome) {
        self.repeating
            .lock()
            .await
            .insert(url.to_string(), outcome);
    }

    pub async fn always_response(&self, url: &str, status: u16, body: impl Into<String>) {
        self.always(url, Ok(HttpResponse::new(status, body))).await;
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().await.clone()
    }

    pub async fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.recorded
            .lock()
            .await
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    pub async fn request_count(&self, url: &str) -> usize {
        self.requests_to(url).await.len()
    }

    pub async fn total_requests(&self) -> usize {
        self.recorded.lock().await.len()
    }

    pub async fn clear_history(&self) {
        self.recorded.lock().await.clear();
    }

    async fn next_outcome(&self, url: &str) -> MockOutcome {
        if let Some(outcome) = self
            .queued
            .lock()
            .await
            .get_mut(url)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }

        match self.repeating.lock().await.get(url) {
            Some(outcome) => outcome.clone(),
            None => Err(TransportError::Connect {
                url: url.to_string(),
                message: "connection refused (nothing scripted)".to_string(),
            }),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.recorded.lock().await.push(RecordedRequest {
            url: url.to_string(),
            body: body.clone(),
            timeout,
        });

        self.next_outcome(url).await
    }
}
