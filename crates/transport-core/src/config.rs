//! Client-facing configuration shared across all backends.

use std::time::Duration;

use crate::correlator::ConcurrencyPolicy;
use crate::dispatcher::Multiplicity;
use crate::lifecycle::{OwnershipMode, ReconnectConfig};

/// Transport-agnostic knobs a `Client` is constructed with (§2/§4.6).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a query waits for its response before [`crate::error::QueryError::Timeout`] (§4.5).
    pub query_timeout: Duration,
    /// Deadline for a single batch's handler fan-out before the ACK is sent
    /// with only the handlers that finished (§4.4).
    pub dispatch_deadline: Duration,
    /// How long to wait for the handshake (`OpenReady`) before a query
    /// issued at startup fails instead of blocking forever (§4.6).
    pub handshake_timeout: Duration,
    /// Encoded-envelope size cap enforced by the query path (§4.5).
    pub max_message_bytes: usize,
    /// Whether this `Client` dials out and owns reconnect, or is attached to
    /// an externally managed connection (§4.6).
    pub ownership_mode: OwnershipMode,
    pub reconnect: ReconnectConfig,
    /// Single handler per event type (persistent-bidi backends) or many
    /// (request/response-style backends) (§4.4).
    pub subscription_multiplicity: Multiplicity,
    /// Single-flight or parallel queries in flight (§4.5).
    pub query_concurrency: ConcurrencyPolicy,
    /// Liveness window after the last pong before the connection is
    /// considered stale (§4.3).
    pub liveness_timeout: Duration,
    /// Whether this client proactively sends its own `ping`s, rather than
    /// only replying to the peer's (opt-in, §4.3).
    pub self_initiated_ping: bool,
    pub self_ping_interval: Duration,
    /// The `token` this client authenticates with (§6). Echoed back as
    /// `payload.password` on every `pong` reply; backends that carry a
    /// separate auth header (socket `Authorization`, HTTP `X-Transport-Token`)
    /// read it from their own backend-specific config instead.
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            query_timeout: Duration::from_secs(5),
            dispatch_deadline: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(10),
            max_message_bytes: 1024 * 1024,
            ownership_mode: OwnershipMode::Managed,
            reconnect: ReconnectConfig::default(),
            subscription_multiplicity: Multiplicity::Single,
            query_concurrency: ConcurrencyPolicy::Parallel,
            liveness_timeout: Duration::from_secs(60),
            self_initiated_ping: false,
            self_ping_interval: Duration::from_secs(15),
            password: None,
        }
    }
}
