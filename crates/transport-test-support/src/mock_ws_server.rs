//! A mock WebSocket peer for transport-sdk integration tests.
//!
//! Binds to `ws://127.0.0.1:<port>`, replies to `ping` with `pong`, acks
//! every `outbox.stream.batch` it receives with `ok: true` across all
//! indices, and answers `query.request` with a canned `query.response`
//! echoing the request's `dto`. Tests that need other behavior can push
//! arbitrary envelopes to every connected client via [`MockWsServer::push`]
//! and read everything the server received via [`MockWsServer::received`].

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;
use transport_wire::{Action, ActionStyle, AckPayload, BatchPayload, Envelope, QueryRequest, QueryResponse};

/// A mock WebSocket server for integration testing.
pub struct MockWsServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Envelope>>>,
    push_tx: broadcast::Sender<Envelope>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    /// Start the mock server on a random available port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let (push_tx, _) = broadcast::channel(64);

        let received_clone = Arc::clone(&received);
        let push_tx_clone = push_tx.clone();
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, received_clone, push_tx_clone).await;
        });

        Ok(Self {
            addr,
            received,
            push_tx,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every envelope the server has received so far, in arrival order.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().expect("mock server mutex poisoned").clone()
    }

    /// Push `env` to every currently connected client (simulates a
    /// server-initiated `outbox.stream.batch` or `ping`).
    pub fn push(&self, env: Envelope) {
        let _ = self.push_tx.send(env);
    }

    async fn accept_loop(
        listener: TcpListener,
        received: Arc<Mutex<Vec<Envelope>>>,
        push_tx: broadcast::Sender<Envelope>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let received = Arc::clone(&received);
                    let push_rx = push_tx.subscribe();
                    tokio::spawn(async move {
                        let _ = Self::handle_connection(stream, received, push_rx).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        received: Arc<Mutex<Vec<Envelope>>>,
        mut push_rx: broadcast::Receiver<Envelope>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;

                pushed = push_rx.recv() => {
                    match pushed {
                        Ok(env) => {
                            let json = serde_json::to_string(&env)?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => {}
                    }
                }

                msg = read.next() => {
                    let Some(msg) = msg else { break };
                    let msg = msg?;
                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Close(_) => break,
                        Message::Ping(data) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        _ => continue,
                    };

                    let env: Envelope = serde_json::from_str(&text)?;
                    received.lock().expect("mock server mutex poisoned").push(env.clone());

                    if let Some(reply) = Self::build_reply(&env) {
                        let json = serde_json::to_string(&reply)?;
                        write.send(Message::Text(json.into())).await?;
                    }
                }
            }
        }

        Ok(())
    }

    fn build_reply(env: &Envelope) -> Option<Envelope> {
        let (action, style) = env.action()?;
        match action {
            Action::Ping => Some(Envelope::new(
                Action::Pong,
                style,
                env.payload.clone(),
            )),
            Action::OutboxStreamBatch => {
                let batch: BatchPayload = serde_json::from_value(env.payload.clone()).ok()?;
                let ack = AckPayload {
                    ok: true,
                    ok_indices: Some((0..batch.events.len()).collect()),
                    stream_id: batch.stream_id,
                    ack_from_offset: batch.from_offset,
                    ack_to_offset: batch.to_offset,
                };
                Some(Envelope::new(
                    Action::OutboxStreamAck,
                    style,
                    serde_json::to_value(&ack).ok()?,
                ))
            }
            Action::QueryRequest => {
                let req: QueryRequest = serde_json::from_value(env.payload.clone()).ok()?;
                let resp = QueryResponse {
                    ok: true,
                    data: req.dto,
                    err: None,
                };
                let mut reply = Envelope::new(
                    Action::QueryResponse,
                    ActionStyle::Dotted,
                    serde_json::to_value(&resp).ok()?,
                );
                reply.request_id = env.request_id.clone();
                reply.correlation_id = env.correlation_id.clone();
                Some(reply)
            }
            _ => None,
        }
    }
}
