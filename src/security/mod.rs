//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → access_control.rs (load current gate, run it, record decision)
//!     → gate.rs (protected path? header present? policy allows?)
//!     → identity.rs (predicate, Identity newtype, EmailPolicy seam)
//!     → Pass to upstream with Identity in request extensions
//! ```
//!
//! # Design Decisions
//! - Fail closed on protected paths: missing or refused identity never reaches upstream
//! - Unprotected paths are never inspected or rejected
//! - No trust in the identity beyond its shape; real authorization lives behind `EmailPolicy`

pub mod access_control;
pub mod gate;
pub mod identity;

pub use access_control::{email_gate_middleware, SharedGate};
pub use gate::{AuthError, Decision, RequestGate};
pub use identity::{is_email_allowed, EmailPolicy, Identity, PlausibleEmail};
