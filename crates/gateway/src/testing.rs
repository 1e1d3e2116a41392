//! Shared test doubles: a recording connection, a scripted RPC client and
//! session/node builders.

use crate::disconnect_queue::DisconnectQueueConfig;
use crate::error::{GatewayError, Result};
use crate::node::Node;
use crate::session::{Connection, Frame, Session};
use async_trait::async_trait;
use axum::extract::ws::Message;
use rpc_client::{
    CommandRequest, CommandResponse, ConnectResponse, DisconnectRequest, DisconnectResponse, Env,
    RpcClient, RpcError, Status,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Connection double that records written frames instead of hitting a
/// socket.
#[derive(Default, Clone)]
pub(crate) struct MockConnection {
    pub sent: Arc<Mutex<Vec<Message>>>,
    pub fail_writes: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn write(&mut self, msg: Message) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::WebSocket("mock write failure".to_string()));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted RPC client. Responses default to SUCCESS with empty payloads.
#[derive(Default)]
pub(crate) struct MockRpc {
    connect_response: Mutex<Option<ConnectResponse>>,
    command_response: Mutex<Option<CommandResponse>>,
    transport_down: AtomicBool,
    disconnect_calls: AtomicUsize,
    last_disconnect: Mutex<Option<DisconnectRequest>>,
}

impl MockRpc {
    pub fn script_connect(&self, response: ConnectResponse) {
        *self.connect_response.lock().unwrap() = Some(response);
    }

    pub fn script_command(&self, response: CommandResponse) {
        *self.command_response.lock().unwrap() = Some(response);
    }

    pub fn fail_transport(&self) {
        self.transport_down.store(true, Ordering::SeqCst);
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn last_disconnect(&self) -> Option<DisconnectRequest> {
        self.last_disconnect.lock().unwrap().clone()
    }

    fn transport_error(&self) -> rpc_client::Result<()> {
        if self.transport_down.load(Ordering::SeqCst) {
            // Manufacture a decode error; callers treat every RpcError the
            // same way.
            let err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
            return Err(RpcError::Decode(err));
        }
        Ok(())
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    async fn connect(&self, _env: &Env) -> rpc_client::Result<ConnectResponse> {
        self.transport_error()?;
        Ok(self
            .connect_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(ConnectResponse {
                status: Status::Success,
                ..Default::default()
            }))
    }

    async fn command(&self, _request: &CommandRequest) -> rpc_client::Result<CommandResponse> {
        self.transport_error()?;
        Ok(self
            .command_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(CommandResponse {
                status: Status::Success,
                ..Default::default()
            }))
    }

    async fn disconnect(&self, request: &DisconnectRequest) -> rpc_client::Result<DisconnectResponse> {
        self.transport_error()?;
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_disconnect.lock().unwrap() = Some(request.clone());
        Ok(DisconnectResponse {
            status: Status::Success,
            ..Default::default()
        })
    }
}

/// Node over a default (always-succeeding) mock RPC.
pub(crate) fn build_node() -> Arc<Node> {
    build_node_with(Arc::new(MockRpc::default()))
}

/// Node over a scripted mock RPC.
pub(crate) fn build_node_with(rpc: Arc<MockRpc>) -> Arc<Node> {
    Node::new(rpc, DisconnectQueueConfig { rate: 1000 })
}

/// Session wired to a mock connection. Returns the outbound queue receiver
/// and a handle to the recorded frames.
pub(crate) fn mock_session(
    node: &Arc<Node>,
) -> (Arc<Session>, mpsc::Receiver<Frame>, MockConnection) {
    let conn = MockConnection::default();
    let env = Env::new("ws://test.local/cable".to_string(), Default::default());
    let (session, rx) = Session::new(node, Box::new(conn.clone()), env);
    (session, rx, conn)
}
