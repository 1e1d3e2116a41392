//! Per-connection session state and write-side machinery.
//!
//! A session owns one client connection. All socket writes (text frames,
//! close frames and keepalive pings) happen under the session's write
//! lock, so the connection never sees interleaved frames. Outbound text
//! frames go through a bounded queue drained by a single writer task; a
//! slow client fills the queue and is terminated rather than back-pressuring
//! the broadcast path.

use crate::error::{GatewayError, Result};
use crate::node::Node;
use crate::protocol::{self, close_code};
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use async_trait::async_trait;
use metrics::counter;
use rpc_client::Env;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique session identifier.
pub type SessionId = Uuid;

/// Outbound queue capacity. A session that falls this many frames behind
/// is considered dead.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Deadline for a single socket write.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Keepalive ping period. Ping writes get half of this as their deadline.
const PING_INTERVAL: Duration = Duration::from_secs(3);

/// A frame queued for delivery to the client. `Close` is terminal for the
/// writer.
#[derive(Debug, Clone)]
pub enum Frame {
    Text(Utf8Bytes),
    Close { code: u16, reason: String },
}

/// Write half of a client connection.
///
/// Sessions program against this trait so tests can substitute a recording
/// implementation for the real socket sink.
#[async_trait]
pub trait Connection: Send {
    /// Write one frame to the peer.
    async fn write(&mut self, msg: Message) -> Result<()>;

    /// Close the underlying transport.
    async fn close(&mut self) -> Result<()>;
}

struct SessionState {
    connected: bool,
    closed: bool,
    identifiers: String,
    /// Channel identifiers this session has subscribed, reported on RPC
    /// disconnect.
    subscriptions: HashSet<String>,
    /// Producer side of the outbound queue. Taken on close so the writer
    /// drains and exits; producers consult `closed` first.
    tx: Option<mpsc::Sender<Frame>>,
    ping_task: Option<AbortHandle>,
}

/// Server-side state for one client connection.
pub struct Session {
    pub uid: SessionId,
    node: Weak<Node>,
    conn: tokio::sync::Mutex<Box<dyn Connection>>,
    env: Mutex<Env>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a session over an established connection. The returned
    /// receiver is the outbound queue; hand it to [`Session::send_messages`].
    pub fn new(
        node: &Arc<Node>,
        conn: Box<dyn Connection>,
        env: Env,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

        let session = Arc::new(Self {
            uid: Uuid::new_v4(),
            node: Arc::downgrade(node),
            conn: tokio::sync::Mutex::new(conn),
            env: Mutex::new(env),
            state: Mutex::new(SessionState {
                connected: false,
                closed: false,
                identifiers: String::new(),
                subscriptions: HashSet::new(),
                tx: Some(tx),
                ping_task: None,
            }),
        });

        (session, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Mark the session authenticated. Called once, after a successful RPC
    /// connect.
    pub fn mark_connected(&self) {
        self.state.lock().unwrap().connected = true;
    }

    pub fn identifiers(&self) -> String {
        self.state.lock().unwrap().identifiers.clone()
    }

    pub fn set_identifiers(&self, identifiers: String) {
        self.state.lock().unwrap().identifiers = identifiers;
    }

    pub fn add_subscription(&self, identifier: &str) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(identifier.to_string());
    }

    pub fn remove_subscription(&self, identifier: &str) {
        self.state.lock().unwrap().subscriptions.remove(identifier);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .cloned()
            .collect()
    }

    /// Snapshot of the RPC env for an outgoing call.
    pub fn env_snapshot(&self) -> Env {
        self.env.lock().unwrap().clone()
    }

    /// Apply the env returned by an RPC response: the new cstate map
    /// replaces the old one. Atomic with respect to other RPC calls for
    /// this session.
    pub fn apply_env(&self, env: Option<Env>) {
        if let Some(env) = env {
            if let Some(cstate) = env.cstate {
                self.env.lock().unwrap().cstate = Some(cstate);
            }
        }
    }

    /// Enqueue a text frame for delivery. Never blocks; fire-and-forget.
    ///
    /// On a full queue the session is terminated with abnormal closure: a
    /// slow client must not back-pressure the broadcast path.
    pub fn send(self: &Arc<Self>, payload: Utf8Bytes) {
        let overflow = {
            let state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            match &state.tx {
                Some(tx) => tx.try_send(Frame::Text(payload)).is_err(),
                None => return,
            }
        };

        if overflow {
            counter!("gateway_queue_overflows_total").increment(1);
            warn!("Session {} outbound queue overflow", self.uid);
            self.disconnect("Write queue overflow", close_code::ABNORMAL);
        }
    }

    /// Close the connection with the given reason. Idempotent. Marks the
    /// session closed, enqueues the close frame, stops the ping timer and
    /// unregisters from the hub. Does not notify RPC.
    pub fn close(self: &Arc<Self>, reason: &str, code: u16) {
        let (tx, ping_task) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            (state.tx.take(), state.ping_task.take())
        };

        debug!("Session {} closing: {} ({})", self.uid, reason, code);

        if let Some(tx) = tx {
            // Best effort: a full queue drops the close frame, and the
            // writer exits on queue closure instead.
            let _ = tx.try_send(Frame::Close {
                code,
                reason: reason.to_string(),
            });
        }

        if let Some(ping_task) = ping_task {
            ping_task.abort();
        }

        if let Some(node) = self.node.upgrade() {
            node.unregister_session(self);
        }
    }

    /// Order an RPC disconnect notification (if the session ever
    /// authenticated), then close. Idempotent with respect to `connected`.
    pub fn disconnect(self: &Arc<Self>, reason: &str, code: u16) {
        let was_connected = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.connected)
        };

        if was_connected {
            if let Some(node) = self.node.upgrade() {
                node.disconnect(self.clone());
            }
        }

        self.close(reason, code);
    }

    /// Start the keepalive ping task. No-op if the session already closed.
    pub fn start_ping(self: &Arc<Self>) {
        let handle = tokio::spawn(self.clone().ping_loop());
        let abort = handle.abort_handle();

        let mut state = self.state.lock().unwrap();
        if state.closed {
            abort.abort();
        } else {
            state.ping_task = Some(abort);
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(PING_INTERVAL).await;

            if self.is_closed() {
                return;
            }

            let payload = protocol::ping_message(chrono::Utc::now().timestamp());
            let write = self
                .write_frame(Message::Text(payload.into()), PING_INTERVAL / 2)
                .await;

            if write.is_err() {
                self.disconnect("Ping failed", close_code::ABNORMAL);
                return;
            }
        }
    }

    /// Writer loop: drains the outbound queue, one socket write at a time
    /// under the write lock. Exits on write error, after delivering a close
    /// frame, or when the queue is closed.
    pub async fn send_messages(self: Arc<Self>, mut rx: mpsc::Receiver<Frame>) {
        while let Some(frame) = rx.recv().await {
            match frame {
                Frame::Text(payload) => {
                    if let Err(e) = self.write_frame(Message::Text(payload), WRITE_WAIT).await {
                        debug!("Session {} write failed: {}", self.uid, e);
                        break;
                    }
                }
                Frame::Close { code, reason } => {
                    let close = Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    }));
                    let _ = self.write_frame(close, WRITE_WAIT).await;
                    break;
                }
            }
        }

        {
            let mut conn = self.conn.lock().await;
            let _ = conn.close().await;
        }

        self.disconnect("Write failed", close_code::ABNORMAL);
    }

    async fn write_frame(&self, msg: Message, deadline: Duration) -> Result<()> {
        let mut conn = self.conn.lock().await;
        match tokio::time::timeout(deadline, conn.write(msg)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::WriteTimeout),
        }
    }
}
