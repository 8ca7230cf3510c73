//! Connection lifecycle state machine (§4.6): `Closed -> Opening ->
//! OpenUnverified -> OpenReady -> Closing`, managed vs attached mode, and
//! the exponential-backoff-with-jitter reconnect helper for managed mode.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;

/// A connection's position in the lifecycle (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    /// Transport I/O is up but the protocol handshake (first pong, or
    /// transport-specific readiness signal) has not completed yet.
    OpenUnverified,
    OpenReady,
    Closing,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Closed => 0,
            ConnectionState::Opening => 1,
            ConnectionState::OpenUnverified => 2,
            ConnectionState::OpenReady => 3,
            ConnectionState::Closing => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Closed,
            1 => ConnectionState::Opening,
            2 => ConnectionState::OpenUnverified,
            3 => ConnectionState::OpenReady,
            _ => ConnectionState::Closing,
        }
    }
}

/// Why a connection closed, surfaced to callers who want to distinguish a
/// deliberate shutdown from a dropped connection pending reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    CalledByClient,
    TransportError,
    HandshakeTimeout,
}

/// Whether the `Client` owns reconnect (socket backends dial out and retry
/// on their own) or the transport is attached to an externally-managed
/// connection (inbound IPC pipes the parent already opened) (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipMode {
    Managed,
    Attached,
}

/// Shared state machine plus handshake gating, cloned across the `Client`
/// and its backend.
pub struct Lifecycle {
    state: AtomicU8,
    mode: OwnershipMode,
    ready_notify: Notify,
    reconnect_attempts: AtomicU32,
}

impl Lifecycle {
    pub fn new(mode: OwnershipMode) -> Arc<Self> {
        Arc::new(Lifecycle {
            state: AtomicU8::new(ConnectionState::Closed.to_u8()),
            mode,
            ready_notify: Notify::new(),
            reconnect_attempts: AtomicU32::new(0),
        })
    }

    pub fn mode(&self) -> OwnershipMode {
        self.mode
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
        if state == ConnectionState::OpenReady {
            self.reconnect_attempts.store(0, Ordering::SeqCst);
            self.ready_notify.notify_waiters();
        }
    }

    /// Block until [`ConnectionState::OpenReady`] or `deadline` elapses.
    /// Used to gate queries issued before the handshake completes (§4.5/§4.6).
    pub async fn await_ready(&self, deadline: Duration) -> bool {
        if self.state() == ConnectionState::OpenReady {
            return true;
        }
        tokio::time::timeout(deadline, self.ready_notify.notified())
            .await
            .is_ok()
            && self.state() == ConnectionState::OpenReady
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn bump_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Exponential backoff with full jitter for managed-mode reconnect (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (1-based), picked
    /// uniformly in `[0, min(max, initial * multiplier^(attempt-1)))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let upper = self.initial.mul_f64(exp).min(self.max);
        let jittered_ms = rand::thread_rng().gen_range(0.0..=upper.as_millis() as f64);
        Duration::from_millis(jittered_ms as u64)
    }
}
