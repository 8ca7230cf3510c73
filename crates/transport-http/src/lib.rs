//! Request/response HTTP `Channel` backend (§4.2).
//!
//! Inbound `ping`/`outbox.stream.batch` envelopes arrive as POSTed JSON
//! bodies on a small `axum` server this channel owns. There is no separate
//! outbound leg here: the webhook handler attaches a reply `oneshot` to the
//! `InboundMessage` it hands the `Client`, and the HTTP response body IS the
//! resulting `pong`/`outbox.stream.ack` envelope, returned with `200` (§6).
//! The symmetric inline case on the outbound side is `query.request`: since
//! queries are always issued by this side, the peer's HTTP response body
//! *is* the `query.response`/`error` envelope, so [`Channel::send`] returns
//! it directly instead of going through the correlator (§4.5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};
use transport_core::{
    Capabilities, Channel, ChannelError, ConnectionState, InboundMessage, InboundSender, Lifecycle,
    QueryCorrelationMode,
};
use transport_wire::{Action, Envelope};

const AUTH_HEADER: &str = "X-Transport-Token";

/// How long the webhook/ping handlers wait for the `Client`'s reaction
/// before giving up and answering `500` (should only ever trip if the
/// event-loop task has died).
const REPLY_WAIT: Duration = Duration::from_secs(10);

/// Configuration for the request/response HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the peer's endpoint, e.g. `https://api.example.com/transport`.
    pub base_url: String,
    /// Local address this channel's inbound webhook server binds to.
    pub bind_addr: SocketAddr,
    /// Path the peer POSTs `outbox.stream.batch` envelopes to.
    pub webhook_path: String,
    /// Path the peer POSTs `ping` envelopes to. Must differ from
    /// `webhook_path` (§6).
    pub ping_path: String,
    /// Sent as `X-Transport-Token` on every outbound request and required
    /// on every inbound one (§6).
    pub auth_token: Option<String>,
    /// Body size cap enforced on the inbound server; oversized bodies get
    /// `413 Payload Too Large` (§6/§4.5).
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            base_url: String::new(),
            bind_addr: ([127, 0, 0, 1], 0).into(),
            webhook_path: "/webhook".into(),
            ping_path: "/ping".into(),
            auth_token: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

struct AppState {
    inbound: AsyncMutex<Option<InboundSender>>,
    auth_token: Option<String>,
}

/// The request/response HTTP `Channel` implementation.
pub struct HttpChannel {
    config: HttpConfig,
    lifecycle: Arc<Lifecycle>,
    http: reqwest::Client,
    state: Arc<AppState>,
}

impl HttpChannel {
    pub fn new(config: HttpConfig, lifecycle: Arc<Lifecycle>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with default TLS backend");
        let state = Arc::new(AppState {
            inbound: AsyncMutex::new(None),
            auth_token: config.auth_token.clone(),
        });
        HttpChannel {
            config,
            lifecycle,
            http,
            state,
        }
    }

    fn auth_header_value(&self) -> Option<String> {
        self.config.auth_token.clone()
    }

    async fn post_envelope(&self, path: &str, env: &Envelope) -> Result<reqwest::Response, ChannelError> {
        let url = format!("{}{path}", self.config.base_url);
        let mut req = self.http.post(url).json(env);
        if let Some(token) = self.auth_header_value() {
            req = req.header(AUTH_HEADER, token);
        }
        req.send().await.map_err(|e| ChannelError::Io(e.to_string()))
    }
}

#[async_trait]
impl Channel for HttpChannel {
    /// Binds the inbound webhook server. Request/response HTTP has no
    /// handshake of its own, so readiness follows directly from a
    /// successful bind (§4.6 Open Question: HTTP skips `OpenUnverified`).
    async fn open(&self) -> Result<(), ChannelError> {
        if self.config.webhook_path == self.config.ping_path {
            return Err(ChannelError::Io(format!(
                "webhook_path and ping_path must differ, both are '{}'",
                self.config.webhook_path
            )));
        }
        self.lifecycle.set_state(ConnectionState::Opening);

        let body_limit = self.config.max_body_bytes.saturating_sub(256);
        let app = Router::new()
            .route(&self.config.webhook_path, post(handle_webhook))
            .route(&self.config.ping_path, post(handle_ping))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| ChannelError::Io(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                warn!(error = %err, "http inbound server exited");
            }
        });

        self.lifecycle.set_state(ConnectionState::OpenReady);
        Ok(())
    }

    async fn close(&self) {
        self.lifecycle.set_state(ConnectionState::Closed);
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.state() == ConnectionState::OpenReady
    }

    async fn await_ready(&self, deadline: Duration) -> bool {
        self.lifecycle.await_ready(deadline).await
    }

    /// The only outbound traffic this backend ever initiates: a
    /// `query.request`, whose synchronous HTTP response body is the
    /// `query.response`/`error` envelope returned inline. `pong` and
    /// `outbox.stream.ack` never reach here — they go back as the response
    /// to the inbound webhook/ping POST that provoked them (§6).
    async fn send(&self, env: Envelope) -> Result<Option<Envelope>, ChannelError> {
        match env.action() {
            Some((Action::QueryRequest, _)) => {
                let resp = self.post_envelope("/query", &env).await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(ChannelError::Io(format!("query POST returned {status}")));
                }
                let body: Envelope = resp
                    .json()
                    .await
                    .map_err(|e| ChannelError::Decode(e.to_string()))?;
                Ok(Some(body))
            }
            other => Err(ChannelError::Io(format!(
                "http backend has no outbound leg for {other:?}"
            ))),
        }
    }

    fn set_inbound(&self, sender: InboundSender) {
        if let Ok(mut guard) = self.state.inbound.try_lock() {
            *guard = Some(sender);
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_query: true,
            supports_stream_ack: true,
            query_correlation: QueryCorrelationMode::RequestId,
        }
    }
}

async fn handle_webhook(state: State<Arc<AppState>>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    handle_envelope_post(state, headers, body, Action::OutboxStreamBatch).await
}

async fn handle_ping(state: State<Arc<AppState>>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    handle_envelope_post(state, headers, body, Action::Ping).await
}

/// Shared body for the webhook and ping routes: auth, decode, action check,
/// then hand the envelope to the `Client` with a reply slot and return
/// whatever it answers with as the `200` body (§6).
async fn handle_envelope_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
    expected_action: Action,
) -> Response {
    if let Some(expected) = &state.auth_token {
        let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return (StatusCode::UNAUTHORIZED, "invalid or missing auth token").into_response();
        }
    }

    let env: Envelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(err) => {
            debug!(error = %err, "rejecting malformed inbound envelope");
            return (StatusCode::BAD_REQUEST, "malformed envelope").into_response();
        }
    };

    match env.action() {
        Some((action, _)) if action == expected_action => {}
        _ => return (StatusCode::UNPROCESSABLE_ENTITY, "unrecognized action").into_response(),
    }

    let tx = {
        let guard = state.inbound.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.clone(),
            None => return (StatusCode::SERVICE_UNAVAILABLE, "channel not ready").into_response(),
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    if tx.send(InboundMessage::with_reply(env, reply_tx)).is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "channel not ready").into_response();
    }

    match tokio::time::timeout(REPLY_WAIT, reply_rx).await {
        Ok(Ok(reply_env)) => (StatusCode::OK, Json(reply_env)).into_response(),
        Ok(Err(_)) | Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "no reply produced").into_response(),
    }
}
