//! Ping/Pong liveness tracking (§4.3).
//!
//! `HeartbeatState` only tracks the timestamps; it does not own a timer or a
//! `Channel`. The `Client` event loop drives it: on inbound `ping` it asks
//! this module to build the `pong` reply, on inbound `pong` it records
//! `last_pong`, and a periodic tick checks [`HeartbeatState::is_alive`].

use std::time::Duration;

use transport_wire::{Action, ActionStyle, Envelope, PingPongPayload};

/// Tracks the most recent pong and whether the business-readiness threshold
/// has ever been crossed.
#[derive(Debug)]
pub struct HeartbeatState {
    last_pong_at: Option<i64>,
    liveness_timeout_ms: i64,
    self_ping_attempts: u32,
}

impl HeartbeatState {
    pub fn new(liveness_timeout_ms: i64) -> Self {
        HeartbeatState {
            last_pong_at: None,
            liveness_timeout_ms,
            self_ping_attempts: 0,
        }
    }

    /// Record a received `pong` at `now_ms`, resetting the self-ping
    /// backoff to its initial interval.
    pub fn record_pong(&mut self, now_ms: i64) {
        self.last_pong_at = Some(now_ms);
        self.self_ping_attempts = 0;
    }

    /// Delay before the next self-initiated `ping`, doubling each call and
    /// capped at `cap`, reset by [`HeartbeatState::record_pong`] (§4.3).
    pub fn next_self_ping_delay(&mut self, initial: Duration, cap: Duration) -> Duration {
        let exp = 2f64.powi(self.self_ping_attempts as i32);
        let delay = initial.mul_f64(exp).min(cap);
        self.self_ping_attempts = self.self_ping_attempts.saturating_add(1);
        delay
    }

    pub fn last_pong_at(&self) -> Option<i64> {
        self.last_pong_at
    }

    /// True once a pong has been observed and the liveness window has not
    /// elapsed since (§4.3's "business-readiness" signal).
    pub fn is_alive(&self, now_ms: i64) -> bool {
        match self.last_pong_at {
            Some(t) => now_ms.saturating_sub(t) <= self.liveness_timeout_ms,
            None => false,
        }
    }

    /// Build the `pong` envelope replying to an inbound `ping`, echoing its
    /// `nonce`/`sid` and `correlationId` verbatim, stamping `ts` with
    /// `now_ms`, and carrying the client's own configured token as
    /// `payload.password` (§4.3, §6 `token`).
    pub fn build_pong(ping: &Envelope, now_ms: i64, configured_password: Option<&str>) -> Envelope {
        let style = ping
            .action()
            .map(|(_, style)| style)
            .unwrap_or(ActionStyle::Dotted);
        let req: PingPongPayload =
            serde_json::from_value(ping.payload.clone()).unwrap_or_default();
        let pong = PingPongPayload {
            ts: Some(now_ms),
            nonce: req.nonce,
            sid: req.sid,
            password: configured_password.map(str::to_owned),
        };
        let mut env = Envelope::new(
            Action::Pong,
            style,
            serde_json::to_value(&pong).unwrap_or(serde_json::Value::Null),
        );
        if let Some(corr) = &ping.correlation_id {
            env = env.with_correlation_id(corr.clone());
        }
        env
    }

    /// Build an outbound `ping`, used only when self-initiated pinging is
    /// enabled (opt-in, §4.3 Open Question).
    pub fn build_ping(style: ActionStyle, now_ms: i64) -> Envelope {
        let payload = PingPongPayload {
            ts: Some(now_ms),
            nonce: None,
            sid: None,
            password: None,
        };
        Envelope::new(
            Action::Ping,
            style,
            serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_alive_before_first_pong() {
        let hb = HeartbeatState::new(5_000);
        assert!(!hb.is_alive(1_000));
    }

    #[test]
    fn alive_within_window_dead_after() {
        let mut hb = HeartbeatState::new(5_000);
        hb.record_pong(1_000);
        assert!(hb.is_alive(1_000));
        assert!(hb.is_alive(6_000));
        assert!(!hb.is_alive(6_001));
    }

    #[test]
    fn build_pong_mirrors_style_and_echoes_nonce() {
        let ping = Envelope::new(
            Action::Ping,
            ActionStyle::Camel,
            serde_json::json!({"nonce": "abc", "sid": "s1"}),
        );
        let pong = HeartbeatState::build_pong(&ping, 42, None);
        assert_eq!(pong.action, "pong");
        let payload: PingPongPayload = serde_json::from_value(pong.payload).unwrap();
        assert_eq!(payload.nonce.unwrap(), "abc");
        assert_eq!(payload.sid.unwrap(), "s1");
        assert_eq!(payload.ts, Some(42));
    }

    #[test]
    fn self_ping_delay_doubles_and_caps_then_resets_on_pong() {
        let mut hb = HeartbeatState::new(1_000);
        let initial = Duration::from_millis(100);
        let cap = Duration::from_millis(350);
        assert_eq!(hb.next_self_ping_delay(initial, cap), Duration::from_millis(100));
        assert_eq!(hb.next_self_ping_delay(initial, cap), Duration::from_millis(200));
        assert_eq!(hb.next_self_ping_delay(initial, cap), Duration::from_millis(350));
        hb.record_pong(0);
        assert_eq!(hb.next_self_ping_delay(initial, cap), Duration::from_millis(100));
    }

    #[test]
    fn build_pong_carries_configured_password() {
        let ping = Envelope::new(Action::Ping, ActionStyle::Dotted, serde_json::Value::Null)
            .with_correlation_id("corr-1");
        let pong = HeartbeatState::build_pong(&ping, 0, Some("pw"));
        assert_eq!(pong.correlation_id.as_deref(), Some("corr-1"));
        let payload: PingPongPayload = serde_json::from_value(pong.payload).unwrap();
        assert_eq!(payload.password.as_deref(), Some("pw"));
    }
}
