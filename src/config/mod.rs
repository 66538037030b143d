//! Routing configuration for the agent router
//!
//! The router reads a declarative file (YAML, JSON or TOML, chosen by
//! extension) describing the target agents, an optional registry agent and
//! the routing policy. Files are parsed with serde, then validated as a whole
//! so a loaded [`RouterConfig`] is always internally consistent.

pub mod store;
pub mod watcher;

use crate::agent::endpoint::build_service_url;
use crate::transport::retry::RetryPolicy;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use store::{ConfigSnapshot, ConfigStore};
pub use watcher::ConfigWatcher;

/// Environment variable consulted for the config path when none is given
pub const CONFIG_PATH_ENV: &str = "AGENTS_CONFIG_PATH";

/// Config path used when neither a flag nor the environment names one
pub const DEFAULT_CONFIG_PATH: &str = "agents_config.yaml";

/// Top-level routing configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    /// Target agents keyed by their stable agent key
    #[serde(deserialize_with = "deserialize_agents")]
    pub agents: BTreeMap<String, AgentConfig>,
    /// Optional central registry agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,
    /// Routing policy, timeouts and retries
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// A single target agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Agent key; filled from the map key when agents are given as a map
    #[serde(default, skip_serializing)]
    pub key: String,
    /// Hostname, `host:port`, or URL with scheme and base path
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Display name the discovery query matches against (exact, case-sensitive)
    pub name: String,
    /// Extra keywords for the keyword classifier; the key itself always matches
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Resolve the assistant identifier through the registry agent
    #[serde(default)]
    pub registry_enabled: bool,
    /// Pre-known assistant identifier; when set discovery is skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
}

/// Registry agent that resolves agent names to identifiers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_registry_port")]
    pub port: u16,
    /// Assistant identifier of the registry agent itself
    pub assistant_id: String,
}

/// Classification mode
///
/// Only `keywords` is implemented; `llm` and `semantic` are reserved and fall
/// back to keyword matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Keywords,
    Llm,
    Semantic,
}

/// Routing policy section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    #[serde(default)]
    pub mode: RoutingMode,
    /// Fallback agent key when classification finds no match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
    /// Environment variable holding the classifier API key (llm mode only)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub retries: RetriesConfig,
    /// Identifier cache TTL in seconds; 0 disables caching
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum concurrent outbound requests
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Maximum concurrent outbound requests to any one agent; defaults to
    /// half of `max_in_flight`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight_per_agent: Option<usize>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mode: RoutingMode::default(),
            default_agent: None,
            api_key_env: default_api_key_env(),
            timeouts: TimeoutsConfig::default(),
            retries: RetriesConfig::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_in_flight: default_max_in_flight(),
            max_in_flight_per_agent: None,
        }
    }
}

impl RoutingConfig {
    /// Per-agent share of the outbound bound, never more than `max_in_flight`
    pub fn per_agent_in_flight(&self) -> usize {
        self.max_in_flight_per_agent
            .unwrap_or(self.max_in_flight / 2)
            .clamp(1, self.max_in_flight.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// HTTP timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    /// Per-attempt response timeout
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    /// Deadline for a whole routed request, retries included
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            read_ms: default_read_ms(),
            request_ms: default_request_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

/// Retry policy for outbound A2A calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetriesConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl RetriesConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_registry_port() -> u16 {
    2026
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_max_in_flight() -> usize {
    64
}

fn default_connect_ms() -> u64 {
    2000
}

fn default_read_ms() -> u64 {
    20_000
}

fn default_request_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    8000
}

/// Accept agents either as a map keyed by agent key or as a list of entries
/// carrying `key`. Duplicate keys are rejected in both forms.
fn deserialize_agents<'de, D>(deserializer: D) -> Result<BTreeMap<String, AgentConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct AgentsVisitor;

    impl<'de> Visitor<'de> for AgentsVisitor {
        type Value = BTreeMap<String, AgentConfig>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of agent key to agent, or a list of agents with `key`")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut agents = BTreeMap::new();
            while let Some((key, mut agent)) = map.next_entry::<String, AgentConfig>()? {
                if agents.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate agent key '{key}'")));
                }
                if !agent.key.is_empty() && agent.key != key {
                    return Err(de::Error::custom(format!(
                        "agent entry key '{}' does not match map key '{key}'",
                        agent.key
                    )));
                }
                agent.key = key.clone();
                agents.insert(key, agent);
            }
            Ok(agents)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut agents = BTreeMap::new();
            while let Some(agent) = seq.next_element::<AgentConfig>()? {
                if agent.key.is_empty() {
                    return Err(de::Error::missing_field("key"));
                }
                if agents.contains_key(&agent.key) {
                    return Err(de::Error::custom(format!(
                        "duplicate agent key '{}'",
                        agent.key
                    )));
                }
                agents.insert(agent.key.clone(), agent);
            }
            Ok(agents)
        }
    }

    deserializer.deserialize_any(AgentsVisitor)
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found at: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid agent key: {0}")]
    InvalidAgentKey(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Serialization format of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(if other.is_empty() {
                path.display().to_string()
            } else {
                other.to_string()
            })),
        }
    }
}

impl RouterConfig {
    /// Load and validate configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: RouterConfig = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one agent must be configured".to_string(),
            ));
        }

        for (key, agent) in &self.agents {
            validate_agent_key(key)?;
            agent.validate()?;

            if agent.registry_enabled && self.registry.is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "agent '{key}' has registry_enabled but no [registry] section is configured"
                )));
            }
        }

        if let Some(registry) = &self.registry {
            registry.validate()?;
        }

        if let Some(default_agent) = &self.routing.default_agent {
            if !self.agents.contains_key(default_agent) {
                return Err(ConfigError::InvalidConfig(format!(
                    "default_agent '{default_agent}' is not a configured agent"
                )));
            }
        }

        if self.routing.retries.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retries.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.routing.max_in_flight == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        if let Some(per_agent) = self.routing.max_in_flight_per_agent {
            if per_agent == 0 || per_agent > self.routing.max_in_flight {
                return Err(ConfigError::InvalidConfig(format!(
                    "max_in_flight_per_agent must be between 1 and max_in_flight ({})",
                    self.routing.max_in_flight
                )));
            }
        }

        Ok(())
    }

    /// Resolve the classifier API key; only required in `llm` mode
    pub fn classifier_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.routing.api_key_env)
            .map_err(|_| ConfigError::EnvVarNotFound(self.routing.api_key_env.clone()))
    }
}

impl AgentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "agent '{}' must have a non-empty name",
                self.key
            )));
        }

        validate_endpoint(&format!("agent '{}'", self.key), &self.host, self.port)?;

        if let Some(assistant_id) = &self.assistant_id {
            if assistant_id.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "agent '{}' has an empty assistant_id",
                    self.key
                )));
            }
        }

        Ok(())
    }

    /// Keywords the classifier matches, the agent key first
    pub fn match_terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str()).chain(self.keywords.iter().map(String::as_str))
    }
}

impl RegistryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint("registry", &self.host, self.port)?;

        if self.assistant_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "registry.assistant_id must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_endpoint(owner: &str, host: &str, port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "{owner} must have a non-zero port"
        )));
    }

    build_service_url(host, port, "/")
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidConfig(format!("{owner}: {e}")))
}

/// Validate agent key format: [a-zA-Z0-9._-]+
fn validate_agent_key(key: &str) -> Result<(), ConfigError> {
    let valid_chars = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if key.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidAgentKey(format!(
            "Agent key '{key}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
