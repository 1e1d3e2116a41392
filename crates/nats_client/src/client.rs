//! NATS client implementation (core pub/sub, no persistence).

use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

/// Wrapper around the NATS client.
///
/// The gateway only needs core NATS: broadcasts are fire-and-forget, and a
/// gateway that was down simply missed them (no replay, no acknowledgment).
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;

        Ok(Self { client })
    }

    /// Subscribe to a subject using NATS Core (low-latency push).
    /// Messages are delivered immediately as they arrive - no polling.
    pub async fn subscribe(&self, subject: &str) -> Result<Subscriber> {
        info!("Subscribing to subject: {}", subject);
        let subscriber = self.client.subscribe(subject.to_string()).await?;
        Ok(subscriber)
    }

    /// Publish a message using NATS Core (fire-and-forget, lowest latency).
    pub async fn publish(&self, subject: &str, payload: bytes::Bytes) -> Result<()> {
        self.client.publish(subject.to_string(), payload).await?;
        Ok(())
    }
}
