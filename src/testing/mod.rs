//! Testing utilities and mock implementations
//!
//! Scripted fakes for exercising the router without remote agents.

pub mod mocks;

pub use mocks::*;
