//! Stateless JSON-RPC-over-HTTP bridge.
//!
//! Each `POST /mcp` carries exactly one JSON-RPC request. The bridge assigns
//! an id when the client did not, forwards the request through the
//! [`PeerChannel`], and answers with the peer's response line verbatim.
//! RPC-level failures are reported as JSON-RPC error envelopes with HTTP 200.
//! A body that is not JSON gets HTTP 400, and one that cannot be read (too
//! large, broken stream) keeps axum's status; both still carry an envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::mode::ServerMode;
use crate::peer::channel::PeerChannel;
use crate::peer::correlation::PendingResponse;
use crate::peer::framer::MAX_LINE_BYTES;
use crate::protocol::{error_for, parse_error, IncomingRequest, RequestId};
use crate::{AppError, Result};

/// State shared by all HTTP handlers.
#[derive(Debug)]
pub struct BridgeState {
    channel: PeerChannel,
    next_id: AtomicU64,
    mode: ServerMode,
    body_limit: usize,
}

impl BridgeState {
    /// Create handler state around an open channel.
    #[must_use]
    pub fn new(channel: PeerChannel, mode: ServerMode) -> Self {
        Self {
            channel,
            next_id: AtomicU64::new(1),
            mode,
            body_limit: MAX_LINE_BYTES,
        }
    }

    /// Cap accepted request bodies at `limit` bytes instead of [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Next value of the process-lifetime id counter; never reused.
    fn next_id(&self) -> RequestId {
        RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach an id if needed and hand the request to the channel.
    ///
    /// An assigned id that collides with a client-supplied id still in
    /// flight is skipped in favour of the next counter value.
    fn submit(&self, incoming: IncomingRequest) -> (RequestId, Result<PendingResponse>) {
        if let Some(id) = incoming.id().cloned() {
            let envelope = incoming.with_id(id.clone());
            return (id, self.channel.send(&envelope));
        }

        let mut envelope = incoming.with_id(self.next_id());
        loop {
            match self.channel.send(&envelope) {
                Err(AppError::DuplicateId(_)) => {
                    let id = self.next_id();
                    debug!(skipped = %envelope.id(), next = %id, "bridge: assigned id in use");
                    envelope.set_id(id);
                }
                other => return (envelope.id().clone(), other),
            }
        }
    }
}

/// Build the bridge router.
///
/// | Route          | Method    | Behaviour                              |
/// |----------------|-----------|----------------------------------------|
/// | `/mcp`         | `POST`    | one JSON-RPC round trip                |
/// | `/mcp`         | `OPTIONS` | CORS pre-flight, 204                   |
/// | `/health`      | `GET`     | `{"status":"ok","mode":…}`             |
/// | anything else  | any       | 404                                    |
///
/// Request bodies are capped at the same size as a peer line.
#[must_use]
pub fn router(state: Arc<BridgeState>) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route(
            "/mcp",
            post(handle_mcp).options(preflight).fallback(not_found),
        )
        .route("/health", get(health).fallback(not_found))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Bind the listener for `config.host:config.port`.
///
/// # Errors
///
/// Returns `AppError::Http` if the address cannot be bound.
pub async fn bind(config: &BridgeConfig) -> Result<TcpListener> {
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|err| {
            AppError::Http(format!(
                "failed to bind {}:{}: {err}",
                config.host, config.port
            ))
        })
}

/// Serve the bridge on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails while running.
pub async fn serve(
    listener: TcpListener,
    state: Arc<BridgeState>,
    ct: CancellationToken,
) -> Result<()> {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "starting HTTP bridge"),
        Err(err) => warn!(%err, "starting HTTP bridge on unknown address"),
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("HTTP bridge shut down");
    Ok(())
}

async fn handle_mcp(
    State(state): State<Arc<BridgeState>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(
                status = %rejection.status(),
                error = %rejection.body_text(),
                "bridge: unreadable request body"
            );
            let err = AppError::InvalidRequest(rejection.body_text());
            return (rejection.status(), Json(error_for(None, &err))).into_response();
        }
    };

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "bridge: request body is not JSON");
            return (StatusCode::BAD_REQUEST, Json(parse_error())).into_response();
        }
    };

    let incoming = match IncomingRequest::from_value(value) {
        Ok(incoming) => incoming,
        Err(err) => {
            debug!(error = %err, "bridge: rejecting request");
            return rpc_error(None, &err);
        }
    };

    let (id, submitted) = state.submit(incoming);
    let outcome = match submitted {
        Ok(pending) => pending.wait().await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(response) => {
            ([(CONTENT_TYPE, HeaderValue::from_static("application/json"))], response.raw)
                .into_response()
        }
        Err(err) => {
            warn!(%id, error = %err, "bridge: request failed");
            rpc_error(Some(&id), &err)
        }
    }
}

fn rpc_error(id: Option<&RequestId>, err: &AppError) -> Response {
    (StatusCode::OK, Json(error_for(id, err))).into_response()
}

async fn health(State(state): State<Arc<BridgeState>>) -> Json<Value> {
    Json(json!({ "status": "ok", "mode": state.mode }))
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn cors(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}
