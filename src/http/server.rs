//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the forwarding handler
//! - Wire up middleware (request ID, tracing, timeout, identity gate, body limit)
//! - Forward accepted requests to the upstream gateway
//! - Apply configuration updates without restarting

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        HeaderMap, Request, StatusCode, Uri, Version,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use hyper::header::{
    CONNECTION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::validation::ValidationError;
use crate::config::{ConfigError, GatewayConfig};
use crate::http::request::{
    make_request_span, propagate_request_id_layer, set_request_id_layer, RequestIdExt,
};
use crate::observability::metrics;
use crate::security::{email_gate_middleware, Identity, RequestGate, SharedGate};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gate: SharedGate,
    pub upstream: Arc<ArcSwap<Authority>>,
    pub client: Client<HttpConnector, Body>,
}

impl AppState {
    fn new(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let gate = RequestGate::new(&config.gate)?;
        let upstream = parse_authority(&config.upstream.address)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            gate: SharedGate::new(gate, config.gate.log_headers),
            upstream: Arc::new(ArcSwap::from_pointee(upstream)),
            client,
        })
    }

    /// Swap in the parts of a new config that can change at runtime.
    fn apply(&self, config: &GatewayConfig) -> Result<(), ConfigError> {
        let gate = RequestGate::new(&config.gate)?;
        let upstream = parse_authority(&config.upstream.address)?;

        self.gate.store(gate, config.gate.log_headers);
        self.upstream.store(Arc::new(upstream));
        Ok(())
    }
}

fn parse_authority(address: &str) -> Result<Authority, ConfigError> {
    address.parse::<Authority>().map_err(|_| {
        ConfigError::Validation(vec![ValidationError::InvalidAddress {
            field: "upstream.address",
            value: address.to_string(),
        }])
    })
}

/// HTTP server placing the identity gate in front of an upstream gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
}

impl GatewayServer {
    /// Create a new server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let state = AppState::new(&config)?;
        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            config,
            state,
        })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The gate sits outside the body limit so an unauthenticated request is
    /// answered 401/403 whatever its size.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(forward_handler))
            .route("/", any(forward_handler))
            .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
            .layer(middleware::from_fn_with_state(
                state.gate.clone(),
                email_gate_middleware,
            ))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(set_request_id_layer())
            .with_state(state)
    }

    /// Run the server until `shutdown` fires, applying config updates as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.address,
            protected_paths = ?self.config.gate.protected_paths,
            "HTTP server starting"
        );

        let state = self.state.clone();
        let reloader = tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                match state.apply(&new_config) {
                    Ok(()) => tracing::info!(
                        upstream = %new_config.upstream.address,
                        protected_paths = ?new_config.gate.protected_paths,
                        "Configuration reloaded"
                    ),
                    Err(e) => tracing::error!(
                        error = %e,
                        "Rejected configuration update, keeping current"
                    ),
                }
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        reloader.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Headers that describe a single hop and must not be forwarded.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Forward an accepted request to the upstream gateway.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request.request_id().to_string();
    let user = request
        .extensions()
        .get::<Identity>()
        .map(|id| id.to_string());

    let (mut parts, body) = request.into_parts();
    let upstream = state.upstream.load_full();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some((*upstream).clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Could not build upstream URI");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "Invalid request URI" })),
            )
                .into_response();
        }
    };
    // Upstream connections are HTTP/1.1 regardless of the client's version.
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);

    tracing::debug!(
        request_id = %request_id,
        user = user.as_deref().unwrap_or("-"),
        method = %parts.method,
        uri = %parts.uri,
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_upstream(response.status().as_u16(), start_time);
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                upstream = %upstream,
                error = %e,
                "Upstream error"
            );
            metrics::record_upstream_error();
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "detail": "Upstream request failed" })),
            )
                .into_response()
        }
    }
}
