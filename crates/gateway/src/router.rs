//! Broadcast router: pub/sub → WebSocket fan-out.
//!
//! Subscribes to the broadcast subject on NATS and hands each
//! `(stream, payload)` envelope to the Node for delivery to subscribed
//! sessions.

use crate::error::Result;
use crate::node::Node;
use crate::protocol::BroadcastMessage;
use futures::StreamExt;
use metrics::counter;
use nats_client::NatsClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Configuration for the broadcast router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// NATS subject carrying broadcast envelopes.
    pub subject: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            subject: "gateway.broadcast".to_string(),
        }
    }
}

/// Routes broadcast envelopes from NATS to WebSocket sessions.
pub struct BroadcastRouter {
    node: Arc<Node>,
    nats: Arc<NatsClient>,
    config: RouterConfig,
}

impl BroadcastRouter {
    pub fn new(node: Arc<Node>, nats: Arc<NatsClient>, config: RouterConfig) -> Self {
        Self { node, nats, config }
    }

    /// Run the router (blocking).
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!(
            "Starting BroadcastRouter, subscribing to '{}'",
            self.config.subject
        );

        let mut subscriber = self.nats.subscribe(&self.config.subject).await?;

        info!("BroadcastRouter running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("BroadcastRouter received shutdown signal");
                    break;
                }

                msg = subscriber.next() => {
                    match msg {
                        Some(nats_msg) => Self::handle_broadcast(&self.node, &nats_msg.payload),
                        None => {
                            warn!("NATS subscription ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!("BroadcastRouter stopped");
        Ok(())
    }

    /// Handle a single broadcast envelope from NATS.
    fn handle_broadcast(node: &Node, payload: &[u8]) {
        let envelope: BroadcastMessage = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                counter!("gateway_invalid_broadcasts_total").increment(1);
                warn!("Dropping malformed broadcast envelope: {}", e);
                return;
            }
        };

        debug!("Broadcast for stream {}", envelope.stream);
        node.broadcast(&envelope.stream, &envelope.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Frame;
    use crate::testing::{build_node, mock_session};

    #[tokio::test]
    async fn test_handle_broadcast_routes_to_subscribers() {
        let node = build_node();
        let (session, mut rx, _conn) = mock_session(&node);
        node.hub().subscribe(&session, "ch1", "stream_a");

        BroadcastRouter::handle_broadcast(&node, br#"{"stream":"stream_a","data":"hello"}"#);
        BroadcastRouter::handle_broadcast(&node, br#"not json"#);
        BroadcastRouter::handle_broadcast(&node, br#"{"stream":"stream_b","data":"other"}"#);

        match rx.try_recv() {
            Ok(Frame::Text(payload)) => assert_eq!(payload.as_str(), "hello"),
            other => panic!("expected text frame, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
