//! Transport-agnostic error taxonomy (§7).

/// Misconfiguration at `Channel` construction — missing URL, missing child
/// channel, no I/O primitive available.
#[derive(Debug, thiserror::Error)]
pub enum TransportInitError {
    #[error("missing required url/baseUrl for this transport")]
    MissingUrl,
    #[error("missing child channel/process handle for this transport")]
    MissingChild,
    #[error("no usable I/O primitive: {0}")]
    NoIoPrimitive(String),
}

/// Errors a `Channel` implementation surfaces for send/open/close failures.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("not connected")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// A single handler's failure inside the batch dispatcher. Never surfaced to
/// the caller directly (§7); it only suppresses the ACK and is logged.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Registering a second handler for an `eventType` on a persistent-bidi
/// backend, which allows at most one handler per type (§4.4).
#[derive(Debug, thiserror::Error)]
#[error("a handler is already registered for event type {0:?}")]
pub struct DuplicateSubscriptionError(pub String);

/// Errors surfaced to the caller of [`crate::client::Client::query`] (§7).
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("send attempted before the transport is ready")]
    NotConnected,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("query timed out")]
    Timeout,
    #[error("a query is already in flight on this single-flight transport")]
    InFlight,
    #[error("query failed: {0}")]
    Failed(String),
    #[error("server error {code:?}: {message}")]
    Server {
        code: Option<String>,
        message: String,
    },
    #[error("encoded envelope ({encoded} bytes incl. 256-byte guard) exceeds cap of {max} bytes")]
    MessageTooLarge { encoded: usize, max: usize },
    #[error("response was neither a valid QueryResponse nor an error envelope")]
    InvalidResponse,
    #[error("disconnected")]
    Disconnected,
}
