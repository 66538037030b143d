//! Assistant identifier discovery
//!
//! Resolves an agent key to the identifier of the assistant that serves it.
//! Resolution order:
//! 1. `assistant_id` pre-set in config (no network call)
//! 2. [`IdentifierCache`] entry for the current config version
//! 3. The registry agent (`registry_enabled`) or the agent's own
//!    `/assistants/search` listing
//!
//! Only a fully successful lookup is cached. Failures leave the cache alone so
//! the next request tries discovery again. Discovery itself never retries;
//! registry lookups inherit the A2A client's retry policy.

use super::a2a_client::{A2AClient, ForwardError, TransportSettings};
use super::cache::{CacheEntry, IdentifierCache};
use super::endpoint::{Endpoint, SEARCH_PATH};
use crate::config::{AgentConfig, ConfigSnapshot, RegistryConfig};
use crate::discovery_span;
use crate::observability::metrics::metrics;
use crate::protocol::messages::{RegistryAnswer, SearchResponse};
use crate::transport::{HttpTransport, TransportError};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

/// Discovery failures. Not-found and connection failures are distinct.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DiscoveryError {
    #[error("assistant not found: no assistant named '{name}' for agent '{agent_key}'")]
    NotFound { agent_key: String, name: String },

    #[error("could not connect to {url} while resolving agent '{agent_key}': {message}")]
    Connect {
        agent_key: String,
        url: String,
        message: String,
    },

    #[error("invalid discovery response for agent '{agent_key}': {message}")]
    InvalidResponse { agent_key: String, message: String },

    #[error("agent '{agent_key}' is not configured")]
    UnknownAgent { agent_key: String },
}

impl DiscoveryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// Where a resolved identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Preset,
    Cache,
    Registry,
    Search,
}

/// A resolved assistant plus the thread to continue, if one is known
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub assistant_id: String,
    pub thread_id: Option<String>,
    pub source: ResolutionSource,
}

/// Resolves assistant identifiers with caching
#[derive(Clone)]
pub struct DiscoveryClient {
    transport: Arc<dyn HttpTransport>,
    a2a: A2AClient,
    cache: Arc<IdentifierCache>,
}

impl DiscoveryClient {
    pub fn new(transport: Arc<dyn HttpTransport>, cache: Arc<IdentifierCache>) -> Self {
        Self {
            a2a: A2AClient::new(Arc::clone(&transport)),
            transport,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<IdentifierCache> {
        &self.cache
    }

    /// Resolve `agent` against `snapshot`.
    ///
    /// The cache is consulted and filled with `snapshot.version`, so entries
    /// computed against an older configuration are never served.
    pub async fn resolve(
        &self,
        agent: &AgentConfig,
        snapshot: &ConfigSnapshot,
    ) -> Result<Resolution, DiscoveryError> {
        let span = discovery_span!(agent_key = %agent.key, config_version = snapshot.version);
        self.resolve_uninstrumented(agent, snapshot)
            .instrument(span)
            .await
    }

    async fn resolve_uninstrumented(
        &self,
        agent: &AgentConfig,
        snapshot: &ConfigSnapshot,
    ) -> Result<Resolution, DiscoveryError> {
        if let Some(preset) = &agent.assistant_id {
            debug!("Using pre-set assistant identifier");
            let thread_id = self
                .cache
                .get(&agent.key, snapshot.version)
                .filter(|entry| &entry.assistant_id == preset)
                .and_then(|entry| entry.thread_id);
            return Ok(Resolution {
                assistant_id: preset.clone(),
                thread_id,
                source: ResolutionSource::Preset,
            });
        }

        if let Some(entry) = self.cache.get(&agent.key, snapshot.version) {
            debug!(assistant_id = %entry.assistant_id, "Identifier served from cache");
            return Ok(Resolution {
                assistant_id: entry.assistant_id,
                thread_id: entry.thread_id,
                source: ResolutionSource::Cache,
            });
        }

        let settings = TransportSettings::from_routing(&snapshot.routing);
        metrics().record_discovery_query();

        let (result, source) = if agent.registry_enabled {
            let registry = snapshot.registry.as_ref().ok_or_else(|| {
                invalid(agent, "registry_enabled but no registry configured".to_string())
            })?;
            (
                self.query_registry(agent, registry, &settings).await,
                ResolutionSource::Registry,
            )
        } else {
            (
                self.search_target(agent, &settings).await,
                ResolutionSource::Search,
            )
        };

        match result {
            Ok(assistant_id) => {
                info!(assistant_id = %assistant_id, source = ?source, "Discovered assistant identifier");
                self.cache.put(
                    &agent.key,
                    CacheEntry::new(&agent.key, &assistant_id, snapshot.version),
                );
                Ok(Resolution {
                    assistant_id,
                    thread_id: None,
                    source,
                })
            }
            Err(e) => {
                metrics().record_discovery_failure();
                warn!(error = %e, "Discovery failed");
                Err(e)
            }
        }
    }

    /// Resolve by key, failing when the key is not in `snapshot`
    pub async fn resolve_key(
        &self,
        agent_key: &str,
        snapshot: &ConfigSnapshot,
    ) -> Result<Resolution, DiscoveryError> {
        let agent = snapshot
            .agent(agent_key)
            .ok_or_else(|| DiscoveryError::UnknownAgent {
                agent_key: agent_key.to_string(),
            })?;
        self.resolve(agent, snapshot).await
    }

    /// `POST /assistants/search` on the agent and match by exact name.
    ///
    /// Single attempt. With several assistants of the same name the first in
    /// the returned order wins.
    async fn search_target(
        &self,
        agent: &AgentConfig,
        settings: &TransportSettings,
    ) -> Result<String, DiscoveryError> {
        let url = Endpoint::from(agent)
            .url(SEARCH_PATH)
            .map_err(|e| invalid(agent, e.to_string()))?;

        let response = self
            .transport
            .post_json(&url, &json!({}), settings.timeout)
            .await
            .map_err(|e| connect_error(agent, &url, &e))?;

        if !response.is_success() {
            return Err(invalid(
                agent,
                format!("{url} returned HTTP {}", response.status),
            ));
        }

        let assistants = serde_json::from_str::<SearchResponse>(&response.body)
            .map_err(|e| invalid(agent, format!("unexpected search body: {e}")))?
            .into_assistants();

        let mut matches = assistants
            .iter()
            .filter(|a| a.name.as_deref() == Some(agent.name.as_str()))
            .filter_map(|a| a.identifier());

        let first = matches.next().ok_or_else(|| DiscoveryError::NotFound {
            agent_key: agent.key.clone(),
            name: agent.name.clone(),
        })?;

        let others = matches.count();
        if others > 0 {
            warn!(
                name = %agent.name,
                duplicates = others + 1,
                chosen = %first,
                "Several assistants share this name, using the first listed"
            );
        }

        Ok(first.to_string())
    }

    /// Ask the registry agent for the assistant serving `agent.name`
    async fn query_registry(
        &self,
        agent: &AgentConfig,
        registry: &RegistryConfig,
        settings: &TransportSettings,
    ) -> Result<String, DiscoveryError> {
        let endpoint = Endpoint::from(registry);
        let prompt = format!("Find assistant for project: {}", agent.name);

        let reply = self
            .a2a
            .send(&endpoint, &registry.assistant_id, None, &prompt, settings)
            .await
            .map_err(|e| registry_error(agent, &endpoint, e))?;

        let not_found = || DiscoveryError::NotFound {
            agent_key: agent.key.clone(),
            name: agent.name.clone(),
        };

        match serde_json::from_str::<RegistryAnswer>(reply.text.trim()) {
            Ok(answer) => answer.identifier().ok_or_else(not_found),
            Err(e) => {
                debug!(error = %e, reply = %reply.text, "Registry reply is not an identifier");
                Err(not_found())
            }
        }
    }
}

fn invalid(agent: &AgentConfig, message: String) -> DiscoveryError {
    DiscoveryError::InvalidResponse {
        agent_key: agent.key.clone(),
        message,
    }
}

fn connect_error(agent: &AgentConfig, url: &str, e: &TransportError) -> DiscoveryError {
    DiscoveryError::Connect {
        agent_key: agent.key.clone(),
        url: url.to_string(),
        message: e.to_string(),
    }
}

fn registry_error(agent: &AgentConfig, endpoint: &Endpoint, e: ForwardError) -> DiscoveryError {
    if e.is_connection_failure() {
        DiscoveryError::Connect {
            agent_key: agent.key.clone(),
            url: format!("{}:{}", endpoint.host, endpoint.port),
            message: e.to_string(),
        }
    } else {
        DiscoveryError::InvalidResponse {
            agent_key: agent.key.clone(),
            message: format!("registry lookup failed: {e}"),
        }
    }
}
