//! A2A wire types: JSON-RPC 2.0 `message/send` envelopes and replies
//!
//! Requests are strongly typed. Replies are parsed from `serde_json::Value`
//! because agents in the wild return several shapes; [`parse_reply`] walks the
//! known ones and takes the first text it finds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";
pub const METHOD_MESSAGE_SEND: &str = "message/send";

/// JSON-RPC 2.0 `message/send` request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct A2AMessage {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: MessageSendParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageSendParams {
    pub message: Message,
    /// Conversation thread to continue, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(rename = "messageId")]
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadRef {
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

impl A2AMessage {
    /// Build a user text message with fresh request and message ids
    pub fn send_text(text: impl Into<String>, thread_id: Option<&str>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            method: METHOD_MESSAGE_SEND.to_string(),
            params: MessageSendParams {
                message: Message {
                    role: Role::User,
                    parts: vec![Part::Text { text: text.into() }],
                    message_id: Uuid::new_v4().to_string(),
                },
                thread: thread_id.map(|t| ThreadRef {
                    thread_id: t.to_string(),
                }),
            },
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.params.message.parts.iter().find_map(|part| match part {
            Part::Text { text } => Some(text.as_str()),
        })
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.params.thread.as_ref().map(|t| t.thread_id.as_str())
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Text and thread extracted from a successful reply
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    pub thread_id: Option<String>,
}

/// Why a reply body could not be turned into an [`AgentReply`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReplyError {
    #[error("agent returned JSON-RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Parse a JSON-RPC reply body into text and thread id
pub fn parse_reply(body: &str) -> Result<AgentReply, ReplyError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ReplyError::Malformed(format!("body is not JSON: {e}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| ReplyError::Malformed("body is not a JSON object".to_string()))?;

    if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
        return match serde_json::from_value::<RpcError>(error.clone()) {
            Ok(rpc_error) => Err(ReplyError::Rpc(rpc_error)),
            Err(e) => Err(ReplyError::Malformed(format!(
                "malformed JSON-RPC error object {error}: {e}"
            ))),
        };
    }

    let result = object
        .get("result")
        .ok_or_else(|| ReplyError::Malformed("missing `result`".to_string()))?;

    let text = extract_text(result).ok_or_else(|| {
        ReplyError::Malformed("no text part found in `result`".to_string())
    })?;

    Ok(AgentReply {
        text,
        thread_id: extract_thread_id(result),
    })
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn text_from_parts(parts: Option<&Value>) -> Option<String> {
    parts?
        .as_array()?
        .iter()
        .find_map(|part| non_blank(part.get("text")).or_else(|| non_blank(part.get("content"))))
}

fn extract_text(result: &Value) -> Option<String> {
    if let Some(text) = text_from_parts(result.pointer("/message/parts")) {
        return Some(text);
    }

    if let Some(artifact) = result.pointer("/artifacts/0") {
        if let Some(text) =
            text_from_parts(artifact.get("parts")).or_else(|| non_blank(artifact.get("text")))
        {
            return Some(text);
        }
    }

    if let Some(messages) = result.get("messages").and_then(Value::as_array) {
        let last = messages
            .iter()
            .rev()
            .find(|m| matches!(m.get("role").and_then(Value::as_str), Some("assistant" | "ai")))
            .or_else(|| messages.last());
        if let Some(message) = last {
            if let Some(text) =
                non_blank(message.get("content")).or_else(|| text_from_parts(message.get("parts")))
            {
                return Some(text);
            }
        }
    }

    ["output_text", "content", "text"]
        .iter()
        .find_map(|key| non_blank(result.get(*key)))
        .or_else(|| non_blank(result.pointer("/choices/0/message/content")))
}

fn extract_thread_id(result: &Value) -> Option<String> {
    ["/contextId", "/threadId", "/thread/threadId", "/context/threadId", "/message/contextId"]
        .iter()
        .find_map(|pointer| non_blank(result.pointer(pointer)))
}

/// Entry returned by an agent's `/assistants/search` endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AssistantDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AssistantDescriptor {
    pub fn identifier(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.assistant_id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

/// `/assistants/search` body: a bare list or `{ "assistants": [...] }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SearchResponse {
    List(Vec<AssistantDescriptor>),
    Wrapped { assistants: Vec<AssistantDescriptor> },
}

impl SearchResponse {
    pub fn into_assistants(self) -> Vec<AssistantDescriptor> {
        match self {
            Self::List(assistants) | Self::Wrapped { assistants } => assistants,
        }
    }
}

/// JSON payload a registry agent returns in its reply text
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryAnswer {
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl RegistryAnswer {
    pub fn identifier(self) -> Option<String> {
        self.assistant_id
            .or(self.id)
            .filter(|id| !id.trim().is_empty())
    }
}
