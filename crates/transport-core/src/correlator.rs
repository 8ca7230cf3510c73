//! Query correlator (§4.5): matches `query.response`/`error` envelopes back
//! to the pending caller that issued the `query.request`, keyed by
//! `requestId`/`correlationId`, and enforces per-transport concurrency
//! policy (single-flight vs parallel).

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use transport_wire::Envelope;

use crate::error::QueryError;

/// The correlation key a pending query is registered under. The persistent
/// socket backend correlates on `requestId`; the two IPC backends correlate
/// on `correlationId` while still echoing `requestId` on the wire (§4.5/§6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    RequestId(String),
    CorrelationId(String),
}

/// Which field of the envelope a transport uses as its query correlation
/// key, fixed per transport (§4.5's table; `Correlation key ambiguity`
/// redesign flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCorrelationMode {
    RequestId,
    CorrelationId,
}

/// Whether a transport allows only one query in flight at a time, or many
/// concurrently (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    SingleFlight,
    Parallel,
}

struct Inner {
    pending: HashMap<CorrelationKey, oneshot::Sender<Result<Envelope, QueryError>>>,
}

/// Tracks in-flight queries for one `Channel`.
pub struct Correlator {
    policy: ConcurrencyPolicy,
    inner: Mutex<Inner>,
}

impl Correlator {
    pub fn new(policy: ConcurrencyPolicy) -> Self {
        Correlator {
            policy,
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
            }),
        }
    }

    /// Register a new pending query under `key`. Returns the receiver the
    /// caller awaits on, or [`QueryError::InFlight`] if this transport is
    /// single-flight and another query is already pending.
    pub fn begin(
        &self,
        key: CorrelationKey,
    ) -> Result<oneshot::Receiver<Result<Envelope, QueryError>>, QueryError> {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        if self.policy == ConcurrencyPolicy::SingleFlight && !inner.pending.is_empty() {
            return Err(QueryError::InFlight);
        }
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(key, tx);
        Ok(rx)
    }

    /// Cancel a pending registration without resolving it, e.g. when
    /// `Channel::send` itself fails synchronously.
    pub fn cancel(&self, key: &CorrelationKey) {
        self.inner.lock().expect("correlator mutex poisoned").pending.remove(key);
    }

    /// Resolve a pending query matched by `key` with `result`. Returns
    /// `false` if nothing was pending under that key (late or duplicate
    /// response; logged by the caller, not an error here).
    pub fn resolve(&self, key: &CorrelationKey, result: Result<Envelope, QueryError>) -> bool {
        let sender = {
            let mut inner = self.inner.lock().expect("correlator mutex poisoned");
            inner.pending.remove(key)
        };
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Reject every pending query with [`QueryError::Disconnected`], called
    /// when the owning `Channel` closes or loses its connection (§4.6).
    pub fn disconnect_all(&self) {
        let mut inner = self.inner.lock().expect("correlator mutex poisoned");
        for (_, tx) in inner.pending.drain() {
            let _ = tx.send(Err(QueryError::Disconnected));
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().expect("correlator mutex poisoned").pending.len()
    }
}
