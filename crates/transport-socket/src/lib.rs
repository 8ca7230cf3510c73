//! Persistent bidirectional socket `Channel` backend (§4.2), backed by
//! `tokio-tungstenite`.
//!
//! Owns its own reconnect state machine: `open` dials out, performs the
//! implicit handshake (first pong flips the shared lifecycle to
//! `OpenReady`), and a background task keeps redialing with exponential
//! jittered backoff whenever the socket drops, for as long as the owning
//! `Client` hasn't called `close` (§4.6 managed mode).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use transport_core::{
    Capabilities, Channel, ChannelError, ConnectionState, InboundMessage, InboundSender, Lifecycle,
    QueryCorrelationMode, ReconnectConfig,
};
use transport_wire::Envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the persistent socket backend.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Sent as a `Bearer` `Authorization` header on the opening handshake,
    /// mirroring how the reference uplink authenticates (§6).
    pub auth_token: Option<String>,
}

struct Inner {
    config: SocketConfig,
    lifecycle: Arc<Lifecycle>,
    reconnect: ReconnectConfig,
    ws: AsyncMutex<Option<WsStream>>,
    inbound: AsyncMutex<Option<InboundSender>>,
    closing: AtomicBool,
    started: AtomicBool,
}

impl Inner {
    async fn dial_once(&self) -> Result<WsStream, ChannelError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Io(format!("invalid url '{}': {}", self.config.url, e)))?;
        if let Some(token) = &self.config.auth_token {
            request.headers_mut().insert(
                "Authorization",
                format!("Bearer {token}")
                    .parse()
                    .map_err(|e| ChannelError::Io(format!("invalid auth header: {e}")))?,
            );
        }
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| ChannelError::Io(e.to_string()))?;
        Ok(ws)
    }

    /// Drain inbound frames until the socket errors or closes, decoding each
    /// as an [`Envelope`]. Frames that fail to decode are logged and
    /// dropped: at-least-once delivery means the peer's own retry path
    /// covers it (§4.1 is silent on malformed frames).
    async fn run_read_pump(&self) {
        loop {
            let next = {
                let mut guard = self.ws.lock().await;
                match guard.as_mut() {
                    Some(ws) => ws.next().await,
                    None => return,
                }
            };
            match next {
                None => return,
                Some(Err(err)) => {
                    warn!(error = %err, "socket read error");
                    return;
                }
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(env) => {
                        if let Some(tx) = self.inbound.lock().await.as_ref() {
                            let _ = tx.send(InboundMessage::fire_and_forget(env));
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping malformed envelope"),
                },
                Some(Ok(Message::Ping(data))) => {
                    let mut guard = self.ws.lock().await;
                    if let Some(ws) = guard.as_mut() {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Background reconnect loop: redials with jittered backoff, installing the
/// freshly connected stream and restarting the read pump each time, until
/// `closing` is set.
async fn reconnect_loop(inner: Arc<Inner>) {
    loop {
        if inner.closing.load(Ordering::SeqCst) {
            return;
        }
        inner.lifecycle.set_state(ConnectionState::Opening);
        match inner.dial_once().await {
            Ok(stream) => {
                info!(url = %inner.config.url, "socket channel connected");
                *inner.ws.lock().await = Some(stream);
                inner.lifecycle.set_state(ConnectionState::OpenUnverified);
                inner.run_read_pump().await;
                if inner.closing.load(Ordering::SeqCst) {
                    return;
                }
                warn!("socket channel disconnected, scheduling reconnect");
            }
            Err(err) => {
                warn!(error = %err, "socket channel dial failed, scheduling reconnect");
            }
        }
        let attempt = inner.lifecycle.bump_reconnect_attempts();
        let delay = inner.reconnect.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// The persistent-bidi-socket `Channel` implementation.
#[derive(Clone)]
pub struct SocketChannel(Arc<Inner>);

impl SocketChannel {
    /// Construct the channel sharing `lifecycle` with the `Client` that will
    /// own it (see [`transport_core::Client::new_with_lifecycle`]).
    pub fn new(config: SocketConfig, lifecycle: Arc<Lifecycle>) -> Self {
        SocketChannel(Arc::new(Inner {
            config,
            lifecycle,
            reconnect: ReconnectConfig::default(),
            ws: AsyncMutex::new(None),
            inbound: AsyncMutex::new(None),
            closing: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl Channel for SocketChannel {
    /// Starts the background reconnect loop on first call and returns
    /// immediately; readiness is reported asynchronously through the shared
    /// `Lifecycle` as the handshake completes (§4.6).
    async fn open(&self) -> Result<(), ChannelError> {
        if self.0.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tokio::spawn(reconnect_loop(Arc::clone(&self.0)));
        Ok(())
    }

    async fn close(&self) {
        self.0.closing.store(true, Ordering::SeqCst);
        if let Some(mut ws) = self.0.ws.lock().await.take() {
            let _ = ws.close(None).await;
        }
        self.0.lifecycle.set_state(ConnectionState::Closed);
    }

    fn is_ready(&self) -> bool {
        self.0.lifecycle.state() == ConnectionState::OpenReady
    }

    async fn await_ready(&self, deadline: Duration) -> bool {
        self.0.lifecycle.await_ready(deadline).await
    }

    async fn send(&self, env: Envelope) -> Result<Option<Envelope>, ChannelError> {
        let json = serde_json::to_string(&env).map_err(|e| ChannelError::Encode(e.to_string()))?;
        let mut guard = self.0.ws.lock().await;
        match guard.as_mut() {
            Some(ws) => {
                ws.send(Message::Text(json.into()))
                    .await
                    .map_err(|e| ChannelError::Io(e.to_string()))?;
                Ok(None)
            }
            None => Err(ChannelError::NotConnected),
        }
    }

    fn set_inbound(&self, sender: InboundSender) {
        // Installed once, synchronously, before `open` starts the read pump.
        if let Ok(mut guard) = self.0.inbound.try_lock() {
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
