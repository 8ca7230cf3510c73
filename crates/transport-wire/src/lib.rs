//! Wire-level types for the transport-sdk protocol.
//!
//! Everything here is pure data plus (de)serialization: the canonical
//! envelope shape, the fixed action-tag vocabulary (with its dotted/camel
//! synonyms), and the JSON payload shapes carried inside a `payload` field.
//! No I/O, no protocol state — that lives in `transport-core`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Action tags
// ---------------------------------------------------------------------------

/// The fixed set of action tags the core recognizes.
///
/// Matching is case-sensitive on the canonical dotted form and on the known
/// camel-case synonym (see [`Action::parse`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Ping,
    Pong,
    OutboxStreamBatch,
    OutboxStreamAck,
    QueryRequest,
    QueryResponse,
    RegisterStreamConsumer,
    Error,
}

/// Which on-wire spelling an envelope used for its action tag.
///
/// ACK emission mirrors the style of the batch that produced it (§4.1),
/// so every inbound envelope records this alongside the parsed [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionStyle {
    /// `outbox.stream.batch`
    Dotted,
    /// `outboxStreamBatch`
    Camel,
}

impl Action {
    /// The canonical dotted spelling, used when an action has no camel synonym.
    pub fn dotted(self) -> &'static str {
        match self {
            Action::Ping => "ping",
            Action::Pong => "pong",
            Action::OutboxStreamBatch => "outbox.stream.batch",
            Action::OutboxStreamAck => "outbox.stream.ack",
            Action::QueryRequest => "query.request",
            Action::QueryResponse => "query.response",
            Action::RegisterStreamConsumer => "registerStreamConsumer",
            Action::Error => "error",
        }
    }

    /// The camel-case synonym, when one exists; falls back to the canonical
    /// spelling for actions with no separate synonym (§4.1).
    pub fn camel(self) -> &'static str {
        match self {
            Action::OutboxStreamBatch => "outboxStreamBatch",
            Action::OutboxStreamAck => "outboxStreamAck",
            other => other.dotted(),
        }
    }

    /// Render this action using the given style.
    pub fn as_str(self, style: ActionStyle) -> &'static str {
        match style {
            ActionStyle::Dotted => self.dotted(),
            ActionStyle::Camel => self.camel(),
        }
    }

    /// Parse a raw `action` string into its semantic [`Action`] and the style
    /// it was written in. Unknown strings return `None`; the core silently
    /// ignores envelopes whose action does not resolve (§4.1).
    pub fn parse(raw: &str) -> Option<(Action, ActionStyle)> {
        Some(match raw {
            "ping" => (Action::Ping, ActionStyle::Dotted),
            "pong" => (Action::Pong, ActionStyle::Dotted),
            "outbox.stream.batch" => (Action::OutboxStreamBatch, ActionStyle::Dotted),
            "outboxStreamBatch" => (Action::OutboxStreamBatch, ActionStyle::Camel),
            "outbox.stream.ack" => (Action::OutboxStreamAck, ActionStyle::Dotted),
            "outboxStreamAck" => (Action::OutboxStreamAck, ActionStyle::Camel),
            "query.request" => (Action::QueryRequest, ActionStyle::Dotted),
            "query.response" => (Action::QueryResponse, ActionStyle::Dotted),
            "registerStreamConsumer" => (Action::RegisterStreamConsumer, ActionStyle::Dotted),
            "error" => (Action::Error, ActionStyle::Dotted),
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The canonical on-wire message object (§6).
///
/// `action` is kept as the raw string so the core can distinguish dotted vs
/// camel spellings on ingress without losing information; use
/// [`Envelope::action`] to resolve it to a semantic [`Action`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub action: String,
    #[serde(default = "default_payload")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

fn default_payload() -> Value {
    Value::Null
}

impl Envelope {
    /// Build an envelope for `action`, rendered in the given style.
    pub fn new(action: Action, style: ActionStyle, payload: Value) -> Self {
        Envelope {
            action: action.as_str(style).to_owned(),
            payload,
            request_id: None,
            correlation_id: None,
            timestamp: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, ts: i64) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Resolve `action` to its semantic tag and on-wire style; `None` for
    /// actions outside the fixed vocabulary (§4.1, ignored on ingress).
    pub fn action(&self) -> Option<(Action, ActionStyle)> {
        Action::parse(&self.action)
    }

    /// `utf8_len(JSON(env))`, used by the size guard in `transport-core`.
    pub fn encoded_len(&self) -> Result<usize, serde_json::Error> {
        Ok(serde_json::to_string(self)?.len())
    }
}

// ---------------------------------------------------------------------------
// Stream batch / ack payloads
// ---------------------------------------------------------------------------

/// A single event carried inside a [`BatchPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub event_type: String,
    #[serde(default = "default_payload")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Payload of an `outbox.stream.batch` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    #[serde(default)]
    pub events: Vec<WireEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_offset: Option<i64>,
}

/// Payload of an `outbox.stream.ack` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_indices: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_from_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_to_offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Query request/response
// ---------------------------------------------------------------------------

/// Payload of a `query.request` envelope. The legacy `constructorName` field
/// name is accepted as a synonym for `name` on ingress (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(alias = "constructorName")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dto: Option<Value>,
}

/// Payload of a `query.response` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

// ---------------------------------------------------------------------------
// Ping/Pong
// ---------------------------------------------------------------------------

/// Payload shared by `ping`/`pong` envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PingPongPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

// ---------------------------------------------------------------------------
// RegisterStreamConsumer
// ---------------------------------------------------------------------------

/// Payload of a `registerStreamConsumer` envelope (persistent-socket
/// backends only, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStreamConsumerPayload {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Server error payload
// ---------------------------------------------------------------------------

/// Payload of an `error` envelope (server-originated failure, §4.1/§7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_dotted_and_camel() {
        let (a, style) = Action::parse("outbox.stream.batch").unwrap();
        assert_eq!(a, Action::OutboxStreamBatch);
        assert_eq!(style, ActionStyle::Dotted);
        assert_eq!(a.as_str(style), "outbox.stream.batch");

        let (a, style) = Action::parse("outboxStreamBatch").unwrap();
        assert_eq!(a, Action::OutboxStreamBatch);
        assert_eq!(style, ActionStyle::Camel);
        assert_eq!(a.as_str(style), "outboxStreamBatch");
    }

    #[test]
    fn unknown_action_does_not_parse() {
        assert!(Action::parse("bogus.action").is_none());
    }

    #[test]
    fn envelope_serializes_camel_case_fields() {
        let env = Envelope::new(
            Action::OutboxStreamAck,
            ActionStyle::Dotted,
            serde_json::json!({"ok": true}),
        )
        .with_correlation_id("corr-1");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["action"], "outbox.stream.ack");
        assert_eq!(json["correlationId"], "corr-1");
        assert!(json.get("requestId").is_none());
    }

    #[test]
    fn query_request_accepts_constructor_name_synonym() {
        let raw = serde_json::json!({"constructorName": "GetBalance", "dto": {"id": 1}});
        let req: QueryRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.name, "GetBalance");
    }

    #[test]
    fn batch_payload_round_trips_through_envelope() {
        let batch = BatchPayload {
            events: vec![WireEvent {
                event_type: "A".into(),
                payload: serde_json::json!({"n": 1}),
                aggregate_id: None,
                block_height: None,
                request_id: None,
                timestamp: None,
            }],
            stream_id: Some("s1".into()),
            from_offset: None,
            to_offset: None,
        };
        let env = Envelope::new(
            Action::OutboxStreamBatch,
            ActionStyle::Dotted,
            serde_json::to_value(&batch).unwrap(),
        );
        let decoded: BatchPayload = serde_json::from_value(env.payload.clone()).unwrap();
        assert_eq!(decoded.events.len(), 1);
        assert_eq!(decoded.events[0].event_type, "A");
    }
}
