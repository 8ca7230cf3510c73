//! The `Channel` abstraction common to all four transport backends (§4.2).
//!
//! A `Channel` is responsible only for framing and transport mechanics; all
//! protocol semantics (heartbeat, dispatch, correlation, lifecycle) live
//! above it in this crate.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use transport_wire::Envelope;

use crate::correlator::QueryCorrelationMode;
use crate::error::ChannelError;

/// What a transport supports, reported by [`Channel::capabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_query: bool,
    pub supports_stream_ack: bool,
    /// Which envelope field this transport matches query responses on,
    /// fixed per backend (§4.5's table).
    pub query_correlation: QueryCorrelationMode,
}

/// One decoded inbound envelope, plus an optional reply slot.
///
/// Most backends push envelopes fire-and-forget (`reply: None`) and the
/// `Client`'s reaction (a `pong`, an ack) goes back out through
/// [`Channel::send`] as its own frame. The request/response HTTP backend has
/// no separate outbound leg for a webhook POST: the `pong`/ack it owes the
/// peer IS the HTTP response body, so it attaches a `reply` sender here and
/// awaits it instead (§6 "response body is an envelope with `action ==
/// outbox.stream.ack`").
pub struct InboundMessage {
    pub envelope: Envelope,
    pub reply: Option<oneshot::Sender<Envelope>>,
}

impl InboundMessage {
    pub fn fire_and_forget(envelope: Envelope) -> Self {
        InboundMessage { envelope, reply: None }
    }

    pub fn with_reply(envelope: Envelope, reply: oneshot::Sender<Envelope>) -> Self {
        InboundMessage {
            envelope,
            reply: Some(reply),
        }
    }
}

/// Sender half a `Channel` implementation pushes decoded inbound messages
/// into. Installed once via [`Channel::set_inbound`]; the `Client` owns the
/// matching receiver and drains it on its single event-loop task (§5).
pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

/// Common interface implemented by the four transport backends: persistent
/// bidirectional socket, request/response HTTP, parent-owning-child pipe,
/// child-in-subordinate pipe.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Establish underlying I/O if stateful; a no-op for stateless transports.
    async fn open(&self) -> Result<(), ChannelError>;

    /// Tear down: releases all listeners, cancels pending timers, rejects
    /// pending queries with a disconnect error (via the owning `Client`).
    async fn close(&self);

    /// Synchronous: true iff the transport considers itself usable for
    /// requests right now.
    fn is_ready(&self) -> bool;

    /// Returns true once [`Channel::is_ready`] becomes true before `deadline`.
    async fn await_ready(&self, deadline: Duration) -> bool;

    /// Encode and hand off one envelope.
    ///
    /// Most transports are fire-and-forget here and return `Ok(None)`; a
    /// transport whose protocol returns the response synchronously (HTTP
    /// query POST) returns `Ok(Some(response_envelope))`, which the facade
    /// must prefer over waiting on the correlator (§4.5).
    async fn send(&self, env: Envelope) -> Result<Option<Envelope>, ChannelError>;

    /// Install the single handler invoked on each decoded inbound envelope.
    fn set_inbound(&self, sender: InboundSender);

    /// Reports whether this transport supports queries and stream ACKs.
    fn capabilities(&self) -> Capabilities;
}
