//! Shared test fixtures for transport-sdk's backend and facade tests.
//!
//! Provides a mock WebSocket peer and a thin client for driving it, so
//! integration tests can exercise the socket backend and the `Client`
//! facade end to end without a real server.

pub mod mock_ws_client;
pub mod mock_ws_server;

pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::MockWsServer;

#[cfg(test)]
mod tests {
    use super::*;
    use transport_wire::{Action, ActionStyle, BatchPayload, Envelope, QueryRequest, WireEvent};

    #[tokio::test]
    async fn mock_server_starts_and_reports_port() {
        let server = MockWsServer::start().await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn mock_server_replies_pong_to_ping() {
        let server = MockWsServer::start().await.unwrap();
        let mut client = MockWsClient::connect(&server.url()).await.unwrap();

        let ping = Envelope::new(Action::Ping, ActionStyle::Dotted, serde_json::json!({"nonce": "n1"}));
        client.send_envelope(&ping).await.unwrap();

        let pong = client.recv_envelope().await.unwrap();
        assert_eq!(pong.action, "pong");
    }

    #[tokio::test]
    async fn mock_server_acks_batch_with_all_indices() {
        let server = MockWsServer::start().await.unwrap();
        let mut client = MockWsClient::connect(&server.url()).await.unwrap();

        let batch = BatchPayload {
            events: vec![
                WireEvent {
                    event_type: "A".into(),
                    payload: serde_json::json!({}),
                    aggregate_id: None,
                    block_height: None,
                    request_id: None,
                    timestamp: None,
                },
                WireEvent {
                    event_type: "B".into(),
                    payload: serde_json::json!({}),
                    aggregate_id: None,
                    block_height: None,
                    request_id: None,
                    timestamp: None,
                },
            ],
            stream_id: Some("s1".into()),
            from_offset: Some(0),
            to_offset: Some(1),
        };
        let env = Envelope::new(
            Action::OutboxStreamBatch,
            ActionStyle::Dotted,
            serde_json::to_value(&batch).unwrap(),
        );
        client.send_envelope(&env).await.unwrap();

        let ack = client.recv_envelope().await.unwrap();
        assert_eq!(ack.action, "outbox.stream.ack");
        let payload: transport_wire::AckPayload = serde_json::from_value(ack.payload).unwrap();
        assert!(payload.ok);
        assert_eq!(payload.ok_indices.unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn mock_server_echoes_query_dto_in_response() {
        let server = MockWsServer::start().await.unwrap();
        let mut client = MockWsClient::connect(&server.url()).await.unwrap();

        let req = QueryRequest {
            name: "GetBalance".into(),
            dto: Some(serde_json::json!({"id": 7})),
        };
        let env = Envelope::new(
            Action::QueryRequest,
            ActionStyle::Dotted,
            serde_json::to_value(&req).unwrap(),
        )
        .with_request_id("req-1");
        client.send_envelope(&env).await.unwrap();

        let resp = client.recv_envelope().await.unwrap();
        assert_eq!(resp.action, "query.response");
        assert_eq!(resp.request_id.as_deref(), Some("req-1"));
        let payload: transport_wire::QueryResponse = serde_json::from_value(resp.payload).unwrap();
        assert!(payload.ok);
        assert_eq!(payload.data.unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn mock_server_pushes_unsolicited_envelope() {
        let server = MockWsServer::start().await.unwrap();
        let mut client = MockWsClient::connect(&server.url()).await.unwrap();
        // let the connection register before pushing
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let pushed = Envelope::new(Action::Ping, ActionStyle::Dotted, serde_json::json!({"nonce": "server-push"}));
        server.push(pushed);

        let got = client.recv_envelope().await.unwrap();
        assert_eq!(got.action, "ping");
    }

    #[tokio::test]
    async fn mock_server_records_received_envelopes() {
        let server = MockWsServer::start().await.unwrap();
        let mut client = MockWsClient::connect(&server.url()).await.unwrap();

        let ping = Envelope::new(Action::Ping, ActionStyle::Dotted, serde_json::Value::Null);
        client.send_envelope(&ping).await.unwrap();
        let _ = client.recv_envelope().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(server.received().len(), 1);
    }
}
