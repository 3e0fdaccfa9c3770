//! Access Control Middleware.
//! Enforces the identity header on protected paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::observability::metrics;
use crate::security::gate::{Decision, RequestGate};

/// Gate shared between the middleware and whoever reloads configuration.
#[derive(Clone)]
pub struct SharedGate {
    gate: Arc<ArcSwap<RequestGate>>,
    log_headers: Arc<AtomicBool>,
}

impl SharedGate {
    pub fn new(gate: RequestGate, log_headers: bool) -> Self {
        Self {
            gate: Arc::new(ArcSwap::from_pointee(gate)),
            log_headers: Arc::new(AtomicBool::new(log_headers)),
        }
    }

    /// Current gate snapshot.
    pub fn load(&self) -> Arc<RequestGate> {
        self.gate.load_full()
    }

    /// Atomically replace the gate. In-flight requests keep their snapshot.
    pub fn store(&self, gate: RequestGate, log_headers: bool) {
        self.gate.store(Arc::new(gate));
        self.log_headers.store(log_headers, Ordering::Relaxed);
    }

    fn log_headers(&self) -> bool {
        self.log_headers.load(Ordering::Relaxed)
    }
}

pub async fn email_gate_middleware(
    State(state): State<SharedGate>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let gate = state.load();
    let path = req.uri().path().to_string();
    let decision = gate.evaluate(&path, req.headers());

    if state.log_headers() {
        tracing::debug!(path = %path, headers = ?req.headers(), "Request headers");
    }
    metrics::record_decision(decision.outcome());

    match decision {
        Decision::PassThrough(_) => {
            tracing::debug!(path = %path, "Unprotected path, skipping identity check");
            next.run(req).await
        }
        Decision::Authorized(identity) => {
            tracing::info!(path = %path, user = %identity, "Request authorized");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Decision::Rejected(err) => {
            tracing::warn!(path = %path, reason = %err, status = %err.status(), "Request rejected");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        middleware,
        routing::{get, post},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::GateConfig;
    use crate::security::identity::Identity;

    async fn whoami(req: Request<Body>) -> String {
        req.extensions()
            .get::<Identity>()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn app(shared: SharedGate) -> Router {
        Router::new()
            .route("/v1/chat/completions", post(whoami))
            .route("/chat/completions", post(whoami))
            .route("/health", get(whoami))
            .layer(middleware::from_fn_with_state(shared, email_gate_middleware))
    }

    fn request(method: &str, uri: &str, email: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(email) = email {
            builder = builder.header("X-User-Email", email);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_header_rejected_before_handler() {
        let shared = SharedGate::new(RequestGate::default(), false);
        let response = app(shared)
            .oneshot(request("POST", "/v1/chat/completions", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body, json!({ "detail": "Missing x-user-email header" }));
    }

    #[tokio::test]
    async fn test_malformed_email_forbidden() {
        let shared = SharedGate::new(RequestGate::default(), false);
        let response = app(shared)
            .oneshot(request("POST", "/chat/completions", Some("not-an-email")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body, json!({ "detail": "Email not-an-email is not authorized" }));
    }

    #[tokio::test]
    async fn test_identity_reaches_handler() {
        let shared = SharedGate::new(RequestGate::default(), true);
        let response = app(shared)
            .oneshot(request("POST", "/v1/chat/completions", Some("user@example.com")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "user@example.com");
    }

    #[tokio::test]
    async fn test_unprotected_path_untouched() {
        let shared = SharedGate::new(RequestGate::default(), false);
        let response = app(shared)
            .oneshot(request("GET", "/health", Some("not-an-email")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_store_swaps_gate() {
        let shared = SharedGate::new(RequestGate::default(), false);
        let router = app(shared.clone());

        let settings = GateConfig {
            protected_paths: vec!["/health".into()],
            ..GateConfig::default()
        };
        shared.store(RequestGate::new(&settings).unwrap(), false);

        let response = router
            .clone()
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(request("POST", "/v1/chat/completions", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
