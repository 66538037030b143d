//! Per-request pipeline state and the final response shape

use crate::error::{ErrorKind, RouterError};
use serde::{Deserialize, Serialize};

/// Position of a request in the routing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Start,
    Classified,
    Resolved,
    Sent,
    Formatted,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Formatted | Self::Failed)
    }
}

/// State carried through the pipeline for one request.
///
/// Stages only add to it. Once `error` is set the stage is `Failed` and no
/// later stage runs.
#[derive(Debug)]
pub struct RequestContext {
    pub input_text: String,
    pub agent_key: Option<String>,
    pub assistant_id: Option<String>,
    pub thread_id: Option<String>,
    pub response_text: Option<String>,
    pub error: Option<RouterError>,
    pub stage: PipelineStage,
}

impl RequestContext {
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            agent_key: None,
            assistant_id: None,
            thread_id: None,
            response_text: None,
            error: None,
            stage: PipelineStage::Start,
        }
    }

    pub fn advance(mut self, stage: PipelineStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn fail(mut self, error: impl Into<RouterError>) -> Self {
        self.error = Some(error.into());
        self.stage = PipelineStage::Failed;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Convert the finished context into the caller-facing response
    pub fn into_response(self) -> RouterResponse {
        match (self.error, self.response_text) {
            (Some(error), _) => RouterResponse::Error {
                kind: error.kind(),
                message: error.user_message(),
                agent_key: self.agent_key,
            },
            (None, Some(response_text)) if self.stage == PipelineStage::Formatted => {
                RouterResponse::Ok {
                    response_text,
                    agent_key: self.agent_key.unwrap_or_default(),
                    thread_id: self.thread_id,
                }
            }
            (None, _) => RouterResponse::Error {
                kind: ErrorKind::Forward,
                message: format!("request ended in stage {:?} without a response", self.stage),
                agent_key: self.agent_key,
            },
        }
    }
}

/// Final output of a routed request: an answer or an error, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RouterResponse {
    Ok {
        response_text: String,
        agent_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_key: Option<String>,
    },
}

impl RouterResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn response_text(&self) -> Option<&str> {
        match self {
            Self::Ok { response_text, .. } => Some(response_text),
            Self::Error { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { kind, .. } => Some(*kind),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { message, .. } => Some(message),
        }
    }

    pub fn agent_key(&self) -> Option<&str> {
        match self {
            Self::Ok { agent_key, .. } => Some(agent_key),
            Self::Error { agent_key, .. } => agent_key.as_deref(),
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        match self {
            Self::Ok { thread_id, .. } => thread_id.as_deref(),
            Self::Error { .. } => None,
        }
    }
}
