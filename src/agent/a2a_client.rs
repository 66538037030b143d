//! A2A client: JSON-RPC `message/send` with timeout and bounded retries
//!
//! The client:
//! - Builds a fresh [`A2AMessage`] per call, attaching the thread id when known
//! - POSTs it to `/a2a/{assistant_id}` on the agent's endpoint
//! - Retries connection failures, timeouts and 5xx with exponential backoff
//! - Returns 4xx, JSON-RPC errors and malformed replies immediately
//!
//! Retry decisions live in [`RetryPolicy`]; this module only drives the loop.

use super::endpoint::{a2a_path, Endpoint, EndpointError};
use crate::config::RoutingConfig;
use crate::forward_span;
use crate::observability::metrics::metrics;
use crate::protocol::messages::{parse_reply, A2AMessage, AgentReply, ReplyError};
use crate::transport::{Disposition, HttpTransport, RetryPolicy, TransportError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

/// Upstream bodies carried in errors are cut to this many bytes
const MAX_ERROR_BODY_BYTES: usize = 1024;

/// Failures forwarding a message to an agent
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForwardError {
    #[error("Invalid agent endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),

    #[error("Agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Agent returned JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Malformed agent response: {detail}")]
    Malformed { detail: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ForwardError>,
    },
}

impl ForwardError {
    /// HTTP status of the (last) upstream response, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// The agent answered 404: the assistant id is unknown there
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// No usable connection to the agent was made
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::RetriesExhausted { last, .. } => last.is_connection_failure(),
            _ => false,
        }
    }
}

impl From<ReplyError> for ForwardError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::Rpc(rpc) => Self::Rpc {
                code: rpc.code,
                message: rpc.message,
                data: rpc.data,
            },
            ReplyError::Malformed(detail) => Self::Malformed { detail },
        }
    }
}

/// Per-call timeout and retry policy, taken from the routing config
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Response timeout for one attempt
    pub timeout: Duration,
    pub policy: RetryPolicy,
}

impl TransportSettings {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> Self {
        Self { timeout, policy }
    }

    pub fn from_routing(routing: &RoutingConfig) -> Self {
        Self::new(routing.timeouts.read(), routing.retries.policy())
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from_routing(&RoutingConfig::default())
    }
}

/// Client for sending text to a resolved assistant
#[derive(Clone)]
pub struct A2AClient {
    transport: Arc<dyn HttpTransport>,
}

impl A2AClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Send `text` to `assistant_id` at `endpoint` and return the reply.
    ///
    /// `thread_id`, when present, is attached so the agent can continue its
    /// own conversation state. The returned [`AgentReply::thread_id`] is
    /// whatever the agent echoed back.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        assistant_id: &str,
        thread_id: Option<&str>,
        text: &str,
        settings: &TransportSettings,
    ) -> Result<AgentReply, ForwardError> {
        let url = endpoint.url(&a2a_path(assistant_id))?;
        let message = A2AMessage::send_text(text, thread_id);
        let body = serde_json::to_value(&message).map_err(|e| ForwardError::Malformed {
            detail: format!("failed to encode request: {e}"),
        })?;

        let span = forward_span!(
            url = %url,
            request_id = %message.id,
            thread_id = thread_id.unwrap_or_default()
        );

        self.send_with_retry(&url, &body, settings)
            .instrument(span)
            .await
    }

    async fn send_with_retry(
        &self,
        url: &str,
        body: &Value,
        settings: &TransportSettings,
    ) -> Result<AgentReply, ForwardError> {
        let policy = &settings.policy;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            metrics().record_forward_attempt();
            debug!(attempt, max_attempts = policy.max_attempts, "Sending A2A message");

            let outcome = self
                .transport
                .post_json(url, body, settings.timeout)
                .await;
            let disposition = RetryPolicy::classify(&outcome);

            let error = match outcome {
                Ok(response) if disposition == Disposition::Success => {
                    let reply = parse_reply(&response.body)?;
                    info!(
                        attempt,
                        reply_len = reply.text.len(),
                        thread_id = reply.thread_id.as_deref().unwrap_or_default(),
                        "Agent replied"
                    );
                    return Ok(reply);
                }
                Ok(response) => ForwardError::Status {
                    status: response.status,
                    body: truncate_body(&response.body),
                },
                Err(e) => ForwardError::Transport(e),
            };

            if policy.should_retry(attempt, disposition) {
                let delay = policy.backoff(attempt - 1);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient forward failure, retrying"
                );
                metrics().record_forward_retry();
                tokio::time::sleep(delay).await;
                continue;
            }

            if disposition == Disposition::Transient {
                warn!(attempts = attempt, error = %error, "Forward retries exhausted");
                return Err(ForwardError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            warn!(attempt, error = %error, "Forward failed, not retrying");
            return Err(error);
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_BYTES {
        return body.to_string();
    }

    let mut end = MAX_ERROR_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    const URL: &str = "http://127.0.0.1:2024/a2a/a1";

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 2024)
    }

    fn settings(max_attempts: u32) -> TransportSettings {
        TransportSettings::new(
            Duration::from_secs(1),
            RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5)),
        )
    }

    fn text_reply(text: &str) -> Value {
        json!({"jsonrpc": "2.0", "id": "1", "result": {"message": {"parts": [{"kind": "text", "text": text}]}}})
    }

    fn client(transport: &MockTransport) -> A2AClient {
        A2AClient::new(Arc::new(transport.clone()))
    }

    #[tokio::test]
    async fn test_send_success() {
        let transport = MockTransport::new();
        transport.push_json(URL, 200, &text_reply("Ticket T-1 is open.")).await;

        let reply = client(&transport)
            .send(&endpoint(), "a1", None, "status of T-1", &settings(2))
            .await
            .unwrap();

        assert_eq!(reply.text, "Ticket T-1 is open.");
        let requests = transport.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body["method"], "message/send");
        assert_eq!(
            requests[0].body["params"]["message"]["parts"][0]["text"],
            "status of T-1"
        );
        assert!(requests[0].body["params"].get("thread").is_none());
        assert_eq!(requests[0].timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_thread_id_attached_and_returned() {
        let transport = MockTransport::new();
        transport
            .push_json(
                URL,
                200,
                &json!({"result": {"contextId": "t-2", "message": {"parts": [{"kind": "text", "text": "ok"}]}}}),
            )
            .await;

        let reply = client(&transport)
            .send(&endpoint(), "a1", Some("t-1"), "again", &settings(2))
            .await
            .unwrap();

        assert_eq!(reply.thread_id.as_deref(), Some("t-2"));
        let requests = transport.requests().await;
        assert_eq!(requests[0].body["params"]["thread"]["threadId"], "t-1");
    }

    #[tokio::test]
    async fn test_503_uses_every_attempt() {
        let transport = MockTransport::new();
        transport.always_response(URL, 503, "unavailable").await;

        let err = client(&transport)
            .send(&endpoint(), "a1", None, "hi", &settings(3))
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(URL).await, 3);
        match err {
            ForwardError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.status(), Some(503));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_404_is_not_retried() {
        let transport = MockTransport::new();
        transport.always_response(URL, 404, "no such assistant").await;

        let err = client(&transport)
            .send(&endpoint(), "a1", None, "hi", &settings(3))
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(URL).await, 1);
        assert!(err.is_not_found());
        assert_eq!(
            err,
            ForwardError::Status {
                status: 404,
                body: "no such assistant".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let transport = MockTransport::new();
        transport.push_response(URL, 502, "bad gateway").await;
        transport
            .push(
                URL,
                Err(TransportError::Timeout {
                    url: URL.to_string(),
                    timeout: Duration::from_secs(1),
                }),
            )
            .await;
        transport.push_json(URL, 200, &text_reply("finally")).await;

        let reply = client(&transport)
            .send(&endpoint(), "a1", None, "hi", &settings(3))
            .await
            .unwrap();

        assert_eq!(reply.text, "finally");
        assert_eq!(transport.request_count(URL).await, 3);
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_retries() {
        // Nothing scripted: the mock refuses the connection
        let transport = MockTransport::new();

        let err = client(&transport)
            .send(&endpoint(), "a1", None, "hi", &settings(2))
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(URL).await, 2);
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_rpc_error_is_terminal() {
        let transport = MockTransport::new();
        transport
            .always(
                URL,
                Ok(crate::transport::HttpResponse::new(
                    200,
                    json!({"jsonrpc": "2.0", "id": "1", "error": {"code": -32602, "message": "Invalid params", "data": {"field": "parts"}}}).to_string(),
                )),
            )
            .await;

        let err = client(&transport)
            .send(&endpoint(), "a1", None, "hi", &settings(3))
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(URL).await, 1);
        assert_eq!(
            err,
            ForwardError::Rpc {
                code: -32602,
                message: "Invalid params".to_string(),
                data: Some(json!({"field": "parts"})),
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_reply_is_terminal() {
        let transport = MockTransport::new();
        transport.always_response(URL, 200, r#"{"result": {}}"#).await;

        let err = client(&transport)
            .send(&endpoint(), "a1", None, "hi", &settings(3))
            .await
            .unwrap_err();

        assert_eq!(transport.request_count(URL).await, 1);
        assert!(matches!(err, ForwardError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_makes_no_call() {
        let transport = MockTransport::new();

        let err = client(&transport)
            .send(&Endpoint::new("", 2024), "a1", None, "hi", &settings(2))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::InvalidEndpoint(_)));
        assert_eq!(transport.total_requests().await, 0);
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY_BYTES);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= MAX_ERROR_BODY_BYTES + 3);
    }

    #[test]
    fn test_settings_from_routing() {
        let routing = RoutingConfig::default();
        let settings = TransportSettings::from_routing(&routing);
        assert_eq!(settings.timeout, Duration::from_secs(20));
        assert_eq!(settings.policy.max_attempts, 2);
    }
}
