//! transport-sdk: a uniform client-side SDK over four wire transports —
//! persistent WebSocket, request/response HTTP, and the two IPC pipe
//! orientations — sharing one protocol engine (heartbeat, batch dispatch,
//! query correlation, connection lifecycle).
//!
//! Most callers only need [`connect`] plus [`EventHandler`]/[`FnHandler`]
//! for subscriptions; everything else re-exported here is for callers who
//! construct a specific backend directly.

pub use transport_core::{
    dispatch_batch, Capabilities, Channel, ChannelError, Client, ClientConfig, CloseReason,
    ConcurrencyPolicy, ConnectionState, CorrelationKey, Correlator, DuplicateSubscriptionError,
    EventHandler, FnHandler, HandlerError, HandlerRegistry, InboundMessage, InboundSender, Lifecycle,
    Multiplicity,
    OwnershipMode, QueryCorrelationMode, QueryError, ReconnectConfig, TransportInitError,
};
pub use transport_http::{HttpChannel, HttpConfig};
pub use transport_ipc::{ChildChannel, ChildProcessSpec, ParentChannel};
pub use transport_socket::{SocketChannel, SocketConfig};
pub use transport_wire::{
    Action, ActionStyle, AckPayload, BatchPayload, Envelope, PingPongPayload, QueryRequest,
    QueryResponse, RegisterStreamConsumerPayload, ServerErrorPayload, WireEvent,
};

use std::sync::Arc;

/// Which wire transport to dial, and its backend-specific configuration
/// (§4.2's four `Channel` implementations).
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Socket(SocketConfig),
    Http(HttpConfig),
    ParentOwnedIpc(ChildProcessSpec),
    ChildIpc,
}

/// A connected client over whichever transport [`connect`] picked,
/// re-exposing the common facade operations without requiring the caller
/// to name the concrete `Client<C>` instantiation (§2).
pub enum AnyClient {
    Socket(Arc<Client<SocketChannel>>),
    Http(Arc<Client<HttpChannel>>),
    ParentOwnedIpc(Arc<Client<ParentChannel>>),
    ChildIpc(Arc<Client<ChildChannel>>),
}

impl AnyClient {
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DuplicateSubscriptionError> {
        match self {
            AnyClient::Socket(c) => c.subscribe(event_type, handler).await,
            AnyClient::Http(c) => c.subscribe(event_type, handler).await,
            AnyClient::ParentOwnedIpc(c) => c.subscribe(event_type, handler).await,
            AnyClient::ChildIpc(c) => c.subscribe(event_type, handler).await,
        }
    }

    pub async fn unsubscribe(&self, event_type: &str) {
        match self {
            AnyClient::Socket(c) => c.unsubscribe(event_type).await,
            AnyClient::Http(c) => c.unsubscribe(event_type).await,
            AnyClient::ParentOwnedIpc(c) => c.unsubscribe(event_type).await,
            AnyClient::ChildIpc(c) => c.unsubscribe(event_type).await,
        }
    }

    pub async fn query(
        &self,
        name: impl Into<String>,
        dto: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, QueryError> {
        match self {
            AnyClient::Socket(c) => c.query(name, dto).await,
            AnyClient::Http(c) => c.query(name, dto).await,
            AnyClient::ParentOwnedIpc(c) => c.query(name, dto).await,
            AnyClient::ChildIpc(c) => c.query(name, dto).await,
        }
    }

    pub async fn close(&self) {
        match self {
            AnyClient::Socket(c) => c.close().await,
            AnyClient::Http(c) => c.close().await,
            AnyClient::ParentOwnedIpc(c) => c.close().await,
            AnyClient::ChildIpc(c) => c.close().await,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            AnyClient::Socket(c) => c.state(),
            AnyClient::Http(c) => c.state(),
            AnyClient::ParentOwnedIpc(c) => c.state(),
            AnyClient::ChildIpc(c) => c.state(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            AnyClient::Socket(c) => c.capabilities(),
            AnyClient::Http(c) => c.capabilities(),
            AnyClient::ParentOwnedIpc(c) => c.capabilities(),
            AnyClient::ChildIpc(c) => c.capabilities(),
        }
    }
}

/// Construct the `Channel` named by `transport`, wire it to a fresh
/// `Client`, and open it (§4.2/§4.6).
pub async fn connect(
    transport: TransportConfig,
    config: ClientConfig,
) -> Result<AnyClient, ChannelError> {
    match transport {
        TransportConfig::Socket(socket_cfg) => {
            // Persistent-bidi socket is single-flight by construction (§4.5's
            // table): at most one query in flight, a second call fails fast.
            let config = ClientConfig {
                query_concurrency: ConcurrencyPolicy::SingleFlight,
                ..config
            };
            let lifecycle = Lifecycle::new(config.ownership_mode);
            let channel = Arc::new(SocketChannel::new(socket_cfg, Arc::clone(&lifecycle)));
            let client = Client::new_with_lifecycle(channel, config, lifecycle);
            client.connect().await?;
            Ok(AnyClient::Socket(client))
        }
        TransportConfig::Http(http_cfg) => {
            // Request/response HTTP allows multiple handlers per event type,
            // invoked sequentially (§4.4) — never single-subscriber.
            let config = ClientConfig {
                subscription_multiplicity: Multiplicity::Many,
                ..config
            };
            let lifecycle = Lifecycle::new(config.ownership_mode);
            let channel = Arc::new(HttpChannel::new(http_cfg, Arc::clone(&lifecycle)));
            let client = Client::new_with_lifecycle(channel, config, lifecycle);
            client.connect().await?;
            Ok(AnyClient::Http(client))
        }
        TransportConfig::ParentOwnedIpc(spec) => {
            let lifecycle = Lifecycle::new(config.ownership_mode);
            let channel = ParentChannel::new(spec, Arc::clone(&lifecycle))
                .map_err(|e| ChannelError::Io(e.to_string()))?;
            let client = Client::new_with_lifecycle(Arc::new(channel), config, lifecycle);
            client.connect().await?;
            Ok(AnyClient::ParentOwnedIpc(client))
        }
        TransportConfig::ChildIpc => {
            let lifecycle = Lifecycle::new(config.ownership_mode);
            let channel = Arc::new(ChildChannel::new(Arc::clone(&lifecycle)));
            let client = Client::new_with_lifecycle(channel, config, lifecycle);
            client.connect().await?;
            Ok(AnyClient::ChildIpc(client))
        }
    }
}
