//! Request gate: decides whether a request may proceed based on the
//! identity header.
//!
//! # Responsibilities
//! - Recognise protected paths (exact match, query excluded)
//! - Extract the identity header (case-insensitive)
//! - Apply the email policy and produce a `Decision`
//!
//! # Design Decisions
//! - Pure function of (path, headers); no I/O, no shared mutable state
//! - Non-protected paths are never rejected
//! - An empty header value counts as missing (401), not as malformed (403)

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    http::{header::InvalidHeaderValue, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{ConfigError, GateConfig};
use crate::security::identity::{EmailPolicy, Identity, PlausibleEmail};

/// Why a request on a protected path was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Header absent or empty.
    #[error("Missing {header} header")]
    MissingHeader { header: HeaderName },

    /// Header present but the email was refused.
    #[error("Email {0} is not authorized")]
    Unauthorized(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingHeader { .. } => StatusCode::UNAUTHORIZED,
            AuthError::Unauthorized(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Outcome of running the gate over one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Path is not protected. Carries the raw header value, unchecked.
    PassThrough(Option<String>),
    /// Path is protected and the email was accepted.
    Authorized(Identity),
    /// Path is protected and the request must be refused.
    Rejected(AuthError),
}

impl Decision {
    /// The identity string to hand downstream, if any.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Decision::PassThrough(raw) => raw.as_deref(),
            Decision::Authorized(id) => Some(id.as_str()),
            Decision::Rejected(_) => None,
        }
    }

    /// Stable label for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::PassThrough(_) => "pass_through",
            Decision::Authorized(_) => "authorized",
            Decision::Rejected(AuthError::MissingHeader { .. }) => "missing_header",
            Decision::Rejected(AuthError::Unauthorized(_)) => "unauthorized",
        }
    }

    /// Collapse into the hook's contract: the identity (possibly absent) or
    /// the rejection.
    pub fn into_result(self) -> Result<Option<String>, AuthError> {
        match self {
            Decision::PassThrough(raw) => Ok(raw),
            Decision::Authorized(id) => Ok(Some(id.into_inner())),
            Decision::Rejected(err) => Err(err),
        }
    }

    /// JSON summary of the decision and whether the request may proceed.
    pub fn report(&self) -> (Value, bool) {
        match self {
            Decision::Rejected(err) => (
                json!({
                    "outcome": self.outcome(),
                    "status": err.status().as_u16(),
                    "detail": err.to_string(),
                }),
                false,
            ),
            _ => (
                json!({
                    "outcome": self.outcome(),
                    "identity": self.identity(),
                }),
                true,
            ),
        }
    }
}

/// Validates the identity header on a fixed set of protected paths.
#[derive(Debug, Clone)]
pub struct RequestGate {
    header: HeaderName,
    protected_paths: HashSet<String>,
    policy: Arc<dyn EmailPolicy>,
}

impl RequestGate {
    /// Build a gate from configuration, using the plausible-email policy.
    pub fn new(settings: &GateConfig) -> Result<Self, ConfigError> {
        let header = HeaderName::from_bytes(settings.header.as_bytes())
            .map_err(|_| ConfigError::HeaderName(settings.header.clone()))?;

        Ok(Self {
            header,
            protected_paths: settings.protected_paths.iter().cloned().collect(),
            policy: Arc::new(PlausibleEmail),
        })
    }

    /// Replace the email policy.
    pub fn with_policy(mut self, policy: Arc<dyn EmailPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_paths.contains(path)
    }

    /// Run the gate over a request path and its headers.
    pub fn evaluate(&self, path: &str, headers: &HeaderMap) -> Decision {
        let email = headers
            .get(&self.header)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        if !self.is_protected(path) {
            return Decision::PassThrough(email);
        }

        let email = match email {
            Some(e) if !e.is_empty() => e,
            _ => {
                return Decision::Rejected(AuthError::MissingHeader {
                    header: self.header.clone(),
                })
            }
        };

        match Identity::parse(email.as_str()) {
            Some(id) if self.policy.is_allowed(id.as_str()) => Decision::Authorized(id),
            _ => Decision::Rejected(AuthError::Unauthorized(email)),
        }
    }

    /// Evaluate a request that carries `email` (or no header at all).
    ///
    /// The value is taken as raw bytes, so non-ASCII input is checked the
    /// same way a client-sent header would be.
    pub fn evaluate_email(
        &self,
        path: &str,
        email: Option<&str>,
    ) -> Result<Decision, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        if let Some(email) = email {
            headers.insert(self.header.clone(), HeaderValue::from_bytes(email.as_bytes())?);
        }
        Ok(self.evaluate(path, &headers))
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(crate::config::schema::DEFAULT_IDENTITY_HEADER),
            protected_paths: crate::config::schema::DEFAULT_PROTECTED_PATHS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            policy: Arc::new(PlausibleEmail),
        }
    }
}
