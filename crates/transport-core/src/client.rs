//! The `Client` facade (§2): subscribe, query, and close, wired on top of a
//! `Channel` implementation. ACKs are automatic — there is deliberately no
//! public `ack()` method; the dispatcher emits one per received batch (§4.4).

use std::sync::{Arc, Mutex as SyncMutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use transport_wire::{Action, ActionStyle, Envelope, QueryRequest, QueryResponse, ServerErrorPayload};
use uuid::Uuid;

use crate::channel::{Channel, InboundMessage};
use crate::config::ClientConfig;
use crate::correlator::{CorrelationKey, Correlator, QueryCorrelationMode};
use crate::dispatcher::{dispatch_batch, EventHandler, HandlerRegistry};
use crate::error::{DuplicateSubscriptionError, QueryError};
use crate::heartbeat::HeartbeatState;
use crate::lifecycle::{ConnectionState, Lifecycle};

/// A connected client bound to one `Channel` implementation.
///
/// Runs a single cooperative event-loop task draining inbound envelopes
/// (§5); all protocol state (heartbeat, correlator, registry) is owned here
/// and only ever touched from that task or from the methods below, which
/// push mutations through the same synchronized structures rather than a
/// second task.
pub struct Client<C: Channel + 'static> {
    channel: Arc<C>,
    lifecycle: Arc<Lifecycle>,
    correlator: Arc<Correlator>,
    registry: Arc<HandlerRegistry>,
    heartbeat: Arc<SyncMutex<HeartbeatState>>,
    config: ClientConfig,
    loop_started: AsyncMutex<bool>,
}

impl<C: Channel + 'static> Client<C> {
    pub fn new(channel: Arc<C>, config: ClientConfig) -> Arc<Self> {
        let lifecycle = Lifecycle::new(config.ownership_mode);
        Self::new_with_lifecycle(channel, config, lifecycle)
    }

    /// Like [`Client::new`], but shares `lifecycle` with the caller rather
    /// than creating a private one. Backends that own their own reconnect
    /// state machine (the persistent socket backend, §4.6) construct the
    /// `Lifecycle` first and hand the same `Arc` to both their `Channel` and
    /// this `Client` so reconnect transitions are visible on both sides.
    pub fn new_with_lifecycle(
        channel: Arc<C>,
        config: ClientConfig,
        lifecycle: Arc<Lifecycle>,
    ) -> Arc<Self> {
        let correlator = Arc::new(Correlator::new(config.query_concurrency));
        let registry = Arc::new(HandlerRegistry::new(config.subscription_multiplicity));
        let heartbeat = Arc::new(SyncMutex::new(HeartbeatState::new(
            config.liveness_timeout.as_millis() as i64,
        )));
        Arc::new(Client {
            channel,
            lifecycle,
            correlator,
            registry,
            heartbeat,
            config,
            loop_started: AsyncMutex::new(false),
        })
    }

    /// Open the underlying transport and start the event-loop task. Safe to
    /// call once; subsequent calls are no-ops.
    pub async fn connect(self: &Arc<Self>) -> Result<(), crate::error::ChannelError> {
        {
            let mut started = self.loop_started.lock().await;
            if *started {
                return Ok(());
            }
            *started = true;
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<InboundMessage>();
        self.channel.set_inbound(tx);

        // `open` drives its own `Opening` -> `OpenUnverified`/`OpenReady`
        // transitions on the shared lifecycle; backends that own reconnect
        // (the persistent socket channel, §4.6) keep retrying internally
        // rather than returning an error here.
        self.channel.open().await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                this.process_envelope(msg).await;
            }
            debug!("inbound channel closed, event loop exiting");
        });

        if self.config.self_initiated_ping {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_self_ping_loop().await });
        }

        Ok(())
    }

    /// Periodically sends its own `ping`, opt-in only (§4.3). Backs off
    /// exponentially between attempts, capped at `liveness_timeout` and
    /// reset by a fresh `pong`; stops once the lifecycle leaves `OpenReady`
    /// territory for good.
    async fn run_self_ping_loop(self: Arc<Self>) {
        loop {
            let delay = self
                .heartbeat
                .lock()
                .expect("heartbeat mutex poisoned")
                .next_self_ping_delay(self.config.self_ping_interval, self.config.liveness_timeout);
            tokio::time::sleep(delay).await;

            if self.lifecycle.state() == ConnectionState::Closed {
                return;
            }

            let ping = HeartbeatState::build_ping(ActionStyle::Dotted, now_ms());
            if let Err(err) = self.channel.send(ping).await {
                warn!(error = %err, "failed to send self-initiated ping");
            }
        }
    }

    /// Register `handler` for `event_type` (§4.4). Rejects a second
    /// registration on backends whose [`crate::dispatcher::Multiplicity`] is
    /// `Single`.
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DuplicateSubscriptionError> {
        self.registry.subscribe(event_type, handler).await
    }

    pub async fn unsubscribe(&self, event_type: &str) {
        self.registry.unsubscribe_all(event_type).await;
    }

    /// Issue a `query.request` and await its matched `query.response`/`error`
    /// (§4.5). Gated on the handshake completing within
    /// [`ClientConfig::handshake_timeout`]; enforces the size guard before
    /// handing off to the channel.
    pub async fn query(&self, name: impl Into<String>, dto: Option<serde_json::Value>) -> Result<serde_json::Value, QueryError> {
        if !self.channel.is_ready()
            && !self.lifecycle.await_ready(self.config.handshake_timeout).await
        {
            return Err(QueryError::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let req = QueryRequest {
            name: name.into(),
            dto,
        };
        // Both IDs go on the wire regardless of transport (§6); which one we
        // register with the correlator is transport-fixed (§4.5's table): the
        // IPC backends reply keyed on `correlationId`, everyone else on
        // `requestId`.
        let correlation_mode = self.channel.capabilities().query_correlation;
        let correlation_id = Uuid::new_v4().to_string();
        let env = Envelope::new(
            Action::QueryRequest,
            ActionStyle::Dotted,
            serde_json::to_value(&req).map_err(|e| QueryError::Failed(e.to_string()))?,
        )
        .with_request_id(request_id.clone())
        .with_correlation_id(correlation_id.clone());

        let encoded = env
            .encoded_len()
            .map_err(|e| QueryError::Failed(e.to_string()))?;
        const SIZE_GUARD_BYTES: usize = 256;
        if encoded + SIZE_GUARD_BYTES > self.config.max_message_bytes {
            return Err(QueryError::MessageTooLarge {
                encoded,
                max: self.config.max_message_bytes,
            });
        }

        let key = match correlation_mode {
            QueryCorrelationMode::RequestId => CorrelationKey::RequestId(request_id),
            QueryCorrelationMode::CorrelationId => CorrelationKey::CorrelationId(correlation_id),
        };
        let rx = self.correlator.begin(key.clone())?;

        let send_result = self.channel.send(env).await;
        let inline = match send_result {
            Ok(inline) => inline,
            Err(err) => {
                self.correlator.cancel(&key);
                return Err(QueryError::Connection(err.to_string()));
            }
        };

        let response = if let Some(inline_env) = inline {
            self.correlator.cancel(&key);
            inline_env
        } else {
            match tokio::time::timeout(self.config.query_timeout, rx).await {
                Ok(Ok(Ok(env))) => env,
                Ok(Ok(Err(err))) => return Err(err),
                Ok(Err(_)) => return Err(QueryError::Disconnected),
                Err(_) => {
                    self.correlator.cancel(&key);
                    return Err(QueryError::Timeout);
                }
            }
        };

        Self::resolve_query_response(response)
    }

    fn resolve_query_response(env: Envelope) -> Result<serde_json::Value, QueryError> {
        match env.action() {
            Some((Action::QueryResponse, _)) => {
                let resp: QueryResponse = serde_json::from_value(env.payload)
                    .map_err(|e| QueryError::Failed(e.to_string()))?;
                if resp.ok {
                    Ok(resp.data.unwrap_or(serde_json::Value::Null))
                } else {
                    Err(QueryError::Failed(resp.err.unwrap_or_default()))
                }
            }
            Some((Action::Error, _)) => {
                let err: ServerErrorPayload = serde_json::from_value(env.payload)
                    .map_err(|e| QueryError::Failed(e.to_string()))?;
                Err(QueryError::Server {
                    code: err.code,
                    message: err.message.unwrap_or_default(),
                })
            }
            _ => Err(QueryError::InvalidResponse),
        }
    }

    /// Gracefully close: reject in-flight queries, close the channel, mark
    /// the lifecycle terminal (§4.6).
    pub async fn close(&self) {
        self.lifecycle.set_state(ConnectionState::Closing);
        self.correlator.disconnect_all();
        self.channel.close().await;
        self.lifecycle.set_state(ConnectionState::Closed);
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn capabilities(&self) -> crate::channel::Capabilities {
        self.channel.capabilities()
    }

    async fn process_envelope(&self, msg: InboundMessage) {
        let InboundMessage { envelope: env, reply } = msg;
        let Some((action, style)) = env.action() else {
            debug!(action = %env.action, "ignoring envelope with unrecognized action");
            return;
        };

        match action {
            Action::Ping => {
                let now_ms = now_ms();
                let pong = HeartbeatState::build_pong(&env, now_ms, self.config.password.as_deref());
                self.emit_reaction(pong, reply, "pong").await;
            }
            Action::Pong => {
                self.heartbeat
                    .lock()
                    .expect("heartbeat mutex poisoned")
                    .record_pong(now_ms());
                if self.lifecycle.state() == ConnectionState::OpenUnverified {
                    self.lifecycle.set_state(ConnectionState::OpenReady);
                }
            }
            Action::OutboxStreamBatch => {
                let batch = match serde_json::from_value(env.payload.clone()) {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!(error = %err, "malformed batch payload, dropping");
                        return;
                    }
                };
                let ack = dispatch_batch(&self.registry, &batch, self.config.dispatch_deadline).await;
                if !ack.ok {
                    debug!("batch had failing or timed-out handlers, suppressing ack");
                    return;
                }
                let ack_env = Envelope::new(
                    Action::OutboxStreamAck,
                    style,
                    serde_json::to_value(&ack).unwrap_or(serde_json::Value::Null),
                );
                self.emit_reaction(ack_env, reply, "batch ack").await;
            }
            Action::QueryResponse | Action::Error => {
                let key = match self.channel.capabilities().query_correlation {
                    QueryCorrelationMode::RequestId => env.request_id.clone().map(CorrelationKey::RequestId),
                    QueryCorrelationMode::CorrelationId => {
                        env.correlation_id.clone().map(CorrelationKey::CorrelationId)
                    }
                };
                match key {
                    Some(key) => {
                        if !self.correlator.resolve(&key, Ok(env)) {
                            debug!("no pending query matched response, dropping");
                        }
                    }
                    None => warn!("response envelope missing requestId/correlationId, dropping"),
                }
            }
            Action::OutboxStreamAck | Action::RegisterStreamConsumer | Action::QueryRequest => {
                debug!(action = %env.action, "ignoring peer-originated action not expected on this side");
            }
        }
    }

    /// Deliver a reply envelope (`pong`, batch ack) back to the peer: inline
    /// through `reply` when the originating transport asked for one (the
    /// HTTP webhook response body, §6), otherwise as its own outbound frame.
    async fn emit_reaction(
        &self,
        env: Envelope,
        reply: Option<tokio::sync::oneshot::Sender<Envelope>>,
        what: &str,
    ) {
        match reply {
            Some(tx) => {
                let _ = tx.send(env);
            }
            None => {
                if let Err(err) = self.channel.send(env).await {
                    warn!(error = %err, "failed to send {what}");
                }
            }
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
