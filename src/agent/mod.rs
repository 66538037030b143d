//! Agent resolution and forwarding
//!
//! Endpoint addressing, the identifier cache, assistant discovery and the
//! A2A client that forwards requests to resolved agents.

pub mod a2a_client;
pub mod cache;
pub mod discovery;
pub mod endpoint;

pub use a2a_client::{A2AClient, ForwardError, TransportSettings};
pub use cache::{CacheEntry, IdentifierCache, DEFAULT_CACHE_TTL};
pub use discovery::{DiscoveryClient, DiscoveryError, Resolution, ResolutionSource};
pub use endpoint::{build_service_url, Endpoint, EndpointError};
