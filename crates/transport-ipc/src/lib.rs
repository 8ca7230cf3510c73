//! IPC pipe `Channel` backends (§4.2): a parent process owning a spawned
//! child, and the complementary child-side view of the same pipe. Both
//! frame the wire protocol as line-delimited JSON, one [`Envelope`] per
//! line, over the process's stdin/stdout.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use transport_core::{
    Capabilities, Channel, ChannelError, ConnectionState, InboundMessage, InboundSender, Lifecycle,
    QueryCorrelationMode, TransportInitError,
};
use transport_wire::Envelope;

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, env: &Envelope) -> Result<(), ChannelError> {
    let mut line = serde_json::to_string(env).map_err(|e| ChannelError::Encode(e.to_string()))?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ChannelError::Io(e.to_string()))
}

async fn run_read_loop<R: tokio::io::AsyncRead + Unpin>(reader: R, inbound: Arc<AsyncMutex<Option<InboundSender>>>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(env) => {
                        if let Some(tx) = inbound.lock().await.as_ref() {
                            let _ = tx.send(InboundMessage::fire_and_forget(env));
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping malformed ipc line"),
                }
            }
            Ok(None) => {
                debug!("ipc pipe reached eof");
                return;
            }
            Err(err) => {
                warn!(error = %err, "ipc read error");
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parent-owning-child backend
// ---------------------------------------------------------------------------

/// Spec for the child process a [`ParentChannel`] spawns and owns.
#[derive(Debug, Clone)]
pub struct ChildProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<String>,
}

/// The parent-owning-child IPC `Channel` implementation (§4.2): this
/// process spawns the subordinate and speaks the protocol over its piped
/// stdin/stdout.
pub struct ParentChannel {
    spec: ChildProcessSpec,
    lifecycle: Arc<Lifecycle>,
    child: AsyncMutex<Option<Child>>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    inbound: Arc<AsyncMutex<Option<InboundSender>>>,
}

impl ParentChannel {
    pub fn new(spec: ChildProcessSpec, lifecycle: Arc<Lifecycle>) -> Result<Self, TransportInitError> {
        if spec.command.trim().is_empty() {
            return Err(TransportInitError::NoIoPrimitive("empty child command".into()));
        }
        Ok(ParentChannel {
            spec,
            lifecycle,
            child: AsyncMutex::new(None),
            stdin: AsyncMutex::new(None),
            inbound: Arc::new(AsyncMutex::new(None)),
        })
    }
}

#[async_trait]
impl Channel for ParentChannel {
    async fn open(&self) -> Result<(), ChannelError> {
        self.lifecycle.set_state(ConnectionState::Opening);

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| ChannelError::Io(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| ChannelError::Io("child stdin not piped".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ChannelError::Io("child stdout not piped".into()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.lifecycle.set_state(ConnectionState::OpenUnverified);

        tokio::spawn(run_read_loop(stdout, Arc::clone(&self.inbound)));

        Ok(())
    }

    async fn close(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        self.stdin.lock().await.take();
        self.lifecycle.set_state(ConnectionState::Closed);
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.state() == ConnectionState::OpenReady
    }

    async fn await_ready(&self, deadline: Duration) -> bool {
        self.lifecycle.await_ready(deadline).await
    }

    async fn send(&self, env: Envelope) -> Result<Option<Envelope>, ChannelError> {
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => {
                write_line(stdin, &env).await?;
                Ok(None)
            }
            None => Err(ChannelError::NotConnected),
        }
    }

    fn set_inbound(&self, sender: InboundSender) {
        if let Ok(mut guard) = self.inbound.try_lock() {
            *guard = Some(sender);
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_query: true,
            supports_stream_ack: true,
            query_correlation: QueryCorrelationMode::CorrelationId,
        }
    }
}

// ---------------------------------------------------------------------------
// Child-in-subordinate backend
// ---------------------------------------------------------------------------

/// The child-in-subordinate IPC `Channel` implementation (§4.2): this
/// process is itself the subordinate and speaks the protocol over its own
/// stdin/stdout, which the parent already owns.
pub struct ChildChannel {
    lifecycle: Arc<Lifecycle>,
    stdout: AsyncMutex<tokio::io::Stdout>,
    inbound: Arc<AsyncMutex<Option<InboundSender>>>,
    started: AtomicBool,
}

impl ChildChannel {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        ChildChannel {
            lifecycle,
            stdout: AsyncMutex::new(tokio::io::stdout()),
            inbound: Arc::new(AsyncMutex::new(None)),
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Channel for ChildChannel {
    async fn open(&self) -> Result<(), ChannelError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.lifecycle.set_state(ConnectionState::Opening);
        self.lifecycle.set_state(ConnectionState::OpenUnverified);
        tokio::spawn(run_read_loop(tokio::io::stdin(), Arc::clone(&self.inbound)));
        Ok(())
    }

    async fn close(&self) {
        self.lifecycle.set_state(ConnectionState::Closed);
    }

    fn is_ready(&self) -> bool {
        self.lifecycle.state() == ConnectionState::OpenReady
    }

    async fn await_ready(&self, deadline: Duration) -> bool {
        self.lifecycle.await_ready(deadline).await
    }

    async fn send(&self, env: Envelope) -> Result<Option<Envelope>, ChannelError> {
        let mut guard = self.stdout.lock().await;
        write_line(&mut *guard, &env).await?;
        Ok(None)
    }

    fn set_inbound(&self, sender: InboundSender) {
        if let Ok(mut guard) = self.inbound.try_lock() {
            *guard = Some(sender);
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_query: true,
            supports_stream_ack: true,
            query_correlation: QueryCorrelationMode::CorrelationId,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport_core::OwnershipMode;
    use transport_wire::{Action, ActionStyle};

    #[test]
    fn parent_channel_rejects_empty_command() {
        let lifecycle = Lifecycle::new(OwnershipMode::Managed);
        let err = ParentChannel::new(
            ChildProcessSpec {
                command: String::new(),
                args: vec![],
                env: Default::default(),
                cwd: None,
            },
            lifecycle,
        )
        .unwrap_err();
        assert!(matches!(err, TransportInitError::NoIoPrimitive(_)));
    }

    #[tokio::test]
    async fn parent_channel_round_trips_through_cat() {
        let lifecycle = Lifecycle::new(OwnershipMode::Managed);
        let channel = ParentChannel::new(
            ChildProcessSpec {
                command: "cat".into(),
                args: vec![],
                env: Default::default(),
                cwd: None,
            },
            Arc::clone(&lifecycle),
        )
        .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        channel.set_inbound(tx);
        channel.open().await.unwrap();

        let ping = Envelope::new(Action::Ping, ActionStyle::Dotted, serde_json::json!({"nonce": "n1"}));
        channel.send(ping.clone()).await.unwrap();

        let echoed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed.envelope.action, "ping");

        channel.close().await;
    }

    #[tokio::test]
    async fn child_channel_reports_ready_state_progression() {
        let lifecycle = Lifecycle::new(OwnershipMode::Attached);
        let channel = ChildChannel::new(Arc::clone(&lifecycle));
        assert!(!channel.is_ready());
        channel.open().await.unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::OpenUnverified);
    }
}
