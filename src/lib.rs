//! Agent Router
//!
//! Routes free-text requests to remote agents that speak the A2A JSON-RPC
//! protocol.
//!
//! # Overview
//!
//! - Declarative agent configuration with validated hot reload
//! - Keyword classification with a configurable default agent
//! - Assistant discovery via `/assistants/search` or a registry agent
//! - Identifier and conversation-thread caching
//! - Bounded retries with exponential backoff for transient failures
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use agent_router::config::ConfigStore;
//! use agent_router::routing::RoutingPipeline;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ConfigStore::open("agents_config.yaml")?);
//! let pipeline = RoutingPipeline::from_store(store)?;
//!
//! let response = pipeline
//!     .run_with_timeout("what's the status of jira ticket T-1?")
//!     .await;
//! println!("{}", serde_json::to_string(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod testing;
pub mod transport;

pub use agent::{A2AClient, DiscoveryClient, IdentifierCache};
pub use config::{ConfigSnapshot, ConfigStore, ConfigWatcher, RouterConfig};
pub use error::{ErrorKind, RouterError, RouterResult};
pub use routing::{RouterResponse, RoutingPipeline};
