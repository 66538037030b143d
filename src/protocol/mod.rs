//! A2A protocol message types
//!
//! JSON-RPC 2.0 `message/send` envelopes, reply extraction and the discovery
//! payloads exchanged with remote agents.

pub mod messages;

pub use messages::*;
