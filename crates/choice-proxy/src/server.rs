//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::audit::{AuditRecorder, SharedAuditStore};
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::fingerprint::{self, Fingerprint};
use crate::payload::{self, Classification};
use crate::proxy::{correlation, DualRouter};
use crate::stats::ProxyStats;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: DualRouter,
    pub recorder: AuditRecorder,
    pub stats: ProxyStats,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Wire the upstream router and audit recorder around an audit store.
    pub fn from_config(config: &ProxyConfig, store: SharedAuditStore) -> Result<Self> {
        let stats = ProxyStats::new();
        let router = DualRouter::from_config(config)?;
        let recorder = AuditRecorder::new(
            store,
            config.audit.mode,
            config.audit.max_in_flight,
            stats.clone(),
        );
        Ok(Self {
            router,
            recorder,
            stats,
            max_body_bytes: config.upstream.max_body_bytes,
        })
    }
}

/// Build the axum router. Every path without its own route is classified
/// and proxied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/debug", any(handle_debug))
        .route("/debug/stats", get(handle_get_stats))
        .route("/health", get(handle_health))
        .fallback(handle_rpc)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Build and run the HTTP server.
pub async fn run(listen_addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "choice-proxy listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("choice-proxy shut down gracefully");
    Ok(())
}

/// Classify-and-route handler.
///
/// 1. Read the body once and parse it (400 on failure, nothing forwarded)
/// 2. Classify by JSON-RPC method
/// 3. Audited: fingerprint `params` and record, then forward to the bidder
/// 4. Otherwise forward to the vanilla upstream
async fn handle_rpc(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let correlation_id = correlation::generate_id();
    let (parts, body) = request.into_parts();
    let span =
        choice_tracing::proxy_request_span!(&correlation_id, &parts.method, parts.uri.path());

    state.stats.inc_requests();

    async {
        let payload = match payload::read_payload(body, state.max_body_bytes).await {
            Ok(payload) => payload,
            Err(e) => {
                state.stats.inc_rejected();
                tracing::warn!(error = %e, "Rejecting request");
                return e.into_response();
            }
        };

        tracing::debug!(payload = ?payload.fields(), "Request");

        let classification = payload::classify(&payload);
        state.stats.inc_classified(classification);
        if let Some(method) = payload.method() {
            tracing::Span::current().record("rpc_method", method);
        }

        let fingerprint = audit_fingerprint(classification, payload.params(), &state.stats);

        let (raw, fields) = payload.into_parts();
        if let Some(fingerprint) = fingerprint {
            tracing::Span::current().record("fingerprint", fingerprint.value());
            state.recorder.submit(fingerprint, fields).await;
        }

        state
            .router
            .route(&parts, raw, classification, &correlation_id)
            .await
    }
    .instrument(span)
    .await
}

/// Fingerprint for an audited request. `None` for pass-through requests and
/// for params that cannot be fingerprinted; the latter are still routed to
/// the bidder, just without an audit record.
fn audit_fingerprint(
    classification: Classification,
    params: Option<&Value>,
    stats: &ProxyStats,
) -> Option<Fingerprint> {
    if classification != Classification::Audited {
        return None;
    }
    match fingerprint::fingerprint(params) {
        Ok(fingerprint) => Some(fingerprint),
        Err(e) => {
            stats.inc_fingerprint_failures();
            tracing::error!(
                error = %e,
                "Failed to fingerprint params, forwarding without audit record"
            );
            None
        }
    }
}

/// Fixed plaintext debug responder.
async fn handle_debug() -> impl IntoResponse {
    (StatusCode::OK, "debugging")
}

/// GET /debug/stats: current request and audit counters.
async fn handle_get_stats(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(state.stats.snapshot()).into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
