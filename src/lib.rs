//! Email identity gate for LLM gateways.
//!
//! Validates the `x-user-email` header on chat-completion paths and either
//! rejects the request or hands the identity downstream.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use security::{Decision, RequestGate};
