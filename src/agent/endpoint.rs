//! Service URL construction for agent endpoints
//!
//! Agent hosts in configuration may be a bare hostname, `host:port`, or a full
//! URL with scheme and base path. Everything funnels through
//! [`build_service_url`] so discovery and forwarding agree on addressing.

use crate::config::{AgentConfig, RegistryConfig};
use thiserror::Error;
use url::Url;

const DEFAULT_SCHEME: &str = "http";

/// Path of the self-describing assistant listing on every agent
pub const SEARCH_PATH: &str = "assistants/search";

/// Path of an assistant's A2A message endpoint
pub fn a2a_path(assistant_id: &str) -> String {
    format!("a2a/{assistant_id}")
}

/// Errors produced while building a service URL
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EndpointError {
    #[error("Host must not be empty")]
    EmptyHost,
    #[error("Invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
}

/// Build a fully-qualified service URL for `path` on the given host and port.
///
/// A port embedded in `host` wins over `port`. The port is always rendered
/// explicitly, including scheme defaults such as 443.
pub fn build_service_url(host: &str, port: u16, path: &str) -> Result<String, EndpointError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(EndpointError::EmptyHost);
    }

    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("{DEFAULT_SCHEME}://{host}")
    };

    let parsed = Url::parse(&with_scheme).map_err(|e| EndpointError::InvalidHost {
        host: host.to_string(),
        reason: e.to_string(),
    })?;

    let hostname = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EndpointError::InvalidHost {
            host: host.to_string(),
            reason: "missing hostname".to_string(),
        })?;

    // Url::port() hides scheme-default ports, so an explicit ":443" falls back to `port`
    let effective_port = parsed.port().unwrap_or(port);
    let base_path = parsed.path().trim_end_matches('/');
    let endpoint = path.trim_start_matches('/');

    Ok(format!(
        "{}://{}:{}{}/{}",
        parsed.scheme(),
        hostname,
        effective_port,
        base_path,
        endpoint
    ))
}

/// Network location of an agent or of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self, path: &str) -> Result<String, EndpointError> {
        build_service_url(&self.host, self.port, path)
    }
}

impl From<&AgentConfig> for Endpoint {
    fn from(agent: &AgentConfig) -> Self {
        Self::new(agent.host.clone(), agent.port)
    }
}

impl From<&RegistryConfig> for Endpoint {
    fn from(registry: &RegistryConfig) -> Self {
        Self::new(registry.host.clone(), registry.port)
    }
}
