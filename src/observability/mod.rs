//! Observability for the agent router
//!
//! Structured logging with span helpers and a process-wide metrics collector.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{discovery_span, forward_span, reload_span, request_span};
