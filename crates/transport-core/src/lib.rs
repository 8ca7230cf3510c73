//! Transport-agnostic protocol engine for transport-sdk.
//!
//! This crate knows nothing about sockets, HTTP, or pipes; it implements
//! the `Channel` contract plus everything layered on top of it — heartbeat
//! tracking, the batch dispatcher, the query correlator, the connection
//! lifecycle state machine, and the `Client` facade. Concrete backends live
//! in `transport-socket`, `transport-http`, and `transport-ipc`.

pub mod channel;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;

pub use channel::{Capabilities, Channel, InboundMessage, InboundSender};
pub use client::Client;
pub use config::ClientConfig;
pub use correlator::{ConcurrencyPolicy, CorrelationKey, Correlator, QueryCorrelationMode};
pub use dispatcher::{dispatch_batch, EventHandler, FnHandler, HandlerRegistry, Multiplicity};
pub use error::{ChannelError, DuplicateSubscriptionError, HandlerError, QueryError, TransportInitError};
pub use heartbeat::HeartbeatState;
pub use lifecycle::{CloseReason, ConnectionState, Lifecycle, OwnershipMode, ReconnectConfig};
