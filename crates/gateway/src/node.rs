//! Node: wires sessions, the RPC facade, the hub and the disconnect queue.
//!
//! The Node is the only process-wide object. It owns the Hub and the
//! session registry; sessions hold a weak back-reference used purely for
//! dispatch, so destruction is always driven from here.

use crate::disconnect_queue::{DisconnectQueue, DisconnectQueueConfig, Disconnector};
use crate::error::Result;
use crate::hub::Hub;
use crate::protocol::{close_code, ClientCommand};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge};
use rpc_client::{CommandRequest, CommandResponse, DisconnectRequest, RpcClient, Status};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Orchestrator for the gateway: session registry, hub, RPC mediation and
/// shutdown.
pub struct Node {
    hub: Hub,
    rpc: Arc<dyn RpcClient>,
    disconnect_queue: Arc<DisconnectQueue>,
    sessions: DashMap<SessionId, Arc<Session>>,
    shutting_down: AtomicBool,
}

impl Node {
    pub fn new(rpc: Arc<dyn RpcClient>, queue_config: DisconnectQueueConfig) -> Arc<Self> {
        Arc::new(Self {
            hub: Hub::new(),
            rpc,
            disconnect_queue: Arc::new(DisconnectQueue::new(queue_config)),
            sessions: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn disconnect_queue(&self) -> &Arc<DisconnectQueue> {
        &self.disconnect_queue
    }

    /// Whether new sessions should still be accepted.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Track a new session. Called once per connection, before
    /// authentication.
    pub fn register_session(&self, session: &Arc<Session>) {
        self.sessions.insert(session.uid, session.clone());
        gauge!("gateway_active_connections").set(self.sessions.len() as f64);
    }

    /// Remove a session from the hub and the registry. Invoked exactly once
    /// per session, from its close path.
    pub fn unregister_session(&self, session: &Arc<Session>) {
        self.hub.unsubscribe_all(session);
        self.sessions.remove(&session.uid);
        gauge!("gateway_active_connections").set(self.sessions.len() as f64);
    }

    /// Authenticate a session via RPC connect and apply the verdict.
    pub async fn authenticate(&self, session: &Arc<Session>) -> Result<()> {
        let env = session.env_snapshot();

        let response = match self.rpc.connect(&env).await {
            Ok(response) => response,
            Err(e) => {
                counter!("gateway_rpc_errors_total").increment(1);
                warn!("RPC connect failed for {}: {}", session.uid, e);
                session.close("Auth error", close_code::INTERNAL_ERROR);
                return Err(e.into());
            }
        };

        session.apply_env(response.env);

        match response.status {
            Status::Success => {
                session.set_identifiers(response.identifiers);
                for transmission in response.transmissions {
                    session.send(transmission.into());
                }
                session.mark_connected();
                debug!("Session {} authenticated", session.uid);
            }
            Status::Failure => {
                // Application-level rejection: deliver the server's goodbye
                // payloads, then a clean close.
                for transmission in response.transmissions {
                    session.send(transmission.into());
                }
                debug!("Session {} rejected by application", session.uid);
                session.close("Auth failed", close_code::NORMAL);
            }
            Status::Error => {
                counter!("gateway_rpc_errors_total").increment(1);
                warn!(
                    "RPC connect returned error for {}: {}",
                    session.uid, response.error_msg
                );
                session.close("Auth error", close_code::INTERNAL_ERROR);
            }
        }

        Ok(())
    }

    /// Parse and dispatch one client frame. Unparseable frames and unknown
    /// commands are logged and the session carries on.
    pub async fn handle_command(&self, session: &Arc<Session>, raw: &str) -> Result<()> {
        counter!("gateway_commands_total").increment(1);

        let command: ClientCommand = match serde_json::from_str(raw) {
            Ok(command) => command,
            Err(e) => {
                debug!("Session {} sent an unknown frame: {}", session.uid, e);
                return Ok(());
            }
        };

        let identifier = command.identifier().to_string();
        let data = match &command {
            ClientCommand::Message { data, .. } => data.clone(),
            _ => String::new(),
        };

        let request = CommandRequest {
            command: command.name().to_string(),
            identifier: identifier.clone(),
            connection_identifiers: session.identifiers(),
            data,
            env: session.env_snapshot(),
        };

        let response = match self.rpc.command(&request).await {
            Ok(response) => response,
            Err(e) => {
                counter!("gateway_rpc_errors_total").increment(1);
                warn!("RPC command failed for {}: {}", session.uid, e);
                session.close("Command error", close_code::ABNORMAL);
                return Err(e.into());
            }
        };

        if response.status == Status::Success {
            match command {
                ClientCommand::Subscribe { .. } => session.add_subscription(&identifier),
                ClientCommand::Unsubscribe { .. } => session.remove_subscription(&identifier),
                ClientCommand::Message { .. } => {}
            }
        }

        self.apply_command_response(session, &identifier, response);
        Ok(())
    }

    /// Apply a command response: cstate first, then transmissions, then
    /// subscription changes and the disconnect verdict.
    fn apply_command_response(
        &self,
        session: &Arc<Session>,
        identifier: &str,
        response: CommandResponse,
    ) {
        session.apply_env(response.env);

        if response.status == Status::Error {
            counter!("gateway_rpc_errors_total").increment(1);
            warn!(
                "RPC command returned error for {}: {}",
                session.uid, response.error_msg
            );
            session.close("Command error", close_code::ABNORMAL);
            return;
        }

        for transmission in response.transmissions {
            session.send(transmission.into());
        }

        if response.stop_streams {
            self.hub.remove_stream_subscriptions(session, identifier);
        }

        for stream in &response.streams {
            self.hub.subscribe(session, identifier, stream);
        }

        if response.disconnect {
            session.disconnect("Remote disconnect", close_code::NORMAL);
        }
    }

    /// Enqueue the session for a rate-limited RPC disconnect notification.
    pub fn disconnect(&self, session: Arc<Session>) {
        self.disconnect_queue.enqueue(session);
    }

    /// Delegate a pub/sub payload to the hub.
    pub fn broadcast(&self, stream: &str, data: &str) {
        self.hub.broadcast(stream, data);
    }

    /// Stop accepting sessions, close every session with going-away, then
    /// drain the disconnect queue with whatever deadline remains.
    pub async fn shutdown(self: &Arc<Self>, deadline: Duration) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let started = Instant::now();
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        info!("Shutting down, closing {} sessions", sessions.len());
        for session in &sessions {
            session.disconnect("Server shutdown", close_code::GOING_AWAY);
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        self.disconnect_queue
            .shutdown(self.as_ref(), remaining)
            .await;
    }
}

#[async_trait]
impl Disconnector for Node {
    /// Perform the RPC disconnect notification immediately.
    async fn disconnect_now(&self, session: &Arc<Session>) -> Result<()> {
        let request = DisconnectRequest {
            identifiers: session.identifiers(),
            subscriptions: session.subscriptions(),
            env: session.env_snapshot(),
        };

        let response = self.rpc.disconnect(&request).await?;
        if response.status != Status::Success {
            debug!(
                "RPC disconnect for {} returned {:?}: {}",
                session.uid, response.status, response.error_msg
            );
        }

        Ok(())
    }
}
