//! Rate-limited queue of pending RPC disconnect notifications.
//!
//! When a gateway loses many clients at once (restart, network partition),
//! firing a disconnect RPC per session all at once stampedes the
//! application server. The queue drains at a fixed rate instead; shutdown
//! drains synchronously under one overall deadline because the process is
//! exiting and notification is best effort.

use crate::error::Result;
use crate::session::Session;
use async_trait::async_trait;
use metrics::gauge;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Performs the immediate RPC disconnect for one session. Implemented by
/// the Node; tests substitute a counting mock.
#[async_trait]
pub trait Disconnector: Send + Sync {
    async fn disconnect_now(&self, session: &Arc<Session>) -> Result<()>;
}

/// Configuration for the disconnect queue.
#[derive(Debug, Clone)]
pub struct DisconnectQueueConfig {
    /// Notifications per second.
    pub rate: u64,
}

impl Default for DisconnectQueueConfig {
    fn default() -> Self {
        Self { rate: 100 }
    }
}

/// FIFO queue of sessions awaiting their RPC disconnect notification.
pub struct DisconnectQueue {
    queue: Mutex<VecDeque<Arc<Session>>>,
    shut_down: AtomicBool,
    rate: u64,
}

impl DisconnectQueue {
    pub fn new(config: DisconnectQueueConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            shut_down: AtomicBool::new(false),
            rate: config.rate.max(1),
        }
    }

    /// Append a session. No-op once the queue has shut down.
    pub fn enqueue(&self, session: Arc<Session>) {
        if self.shut_down.load(Ordering::Acquire) {
            debug!(
                "Disconnect queue is shut down, dropping session {}",
                session.uid
            );
            return;
        }

        let mut queue = self.queue.lock().unwrap();
        queue.push_back(session);
        gauge!("gateway_disconnect_queue_size").set(queue.len() as f64);
    }

    pub fn size(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn pop(&self) -> Option<Arc<Session>> {
        let mut queue = self.queue.lock().unwrap();
        let session = queue.pop_front();
        gauge!("gateway_disconnect_queue_size").set(queue.len() as f64);
        session
    }

    /// Worker loop: one notification per tick at the configured rate.
    /// Returns once the queue has shut down and drained.
    pub async fn run(self: Arc<Self>, disconnector: Arc<dyn Disconnector>) {
        let period = Duration::from_millis((1000 / self.rate).max(1));
        let mut tick = tokio::time::interval(period);

        loop {
            tick.tick().await;

            match self.pop() {
                Some(session) => {
                    if let Err(e) = disconnector.disconnect_now(&session).await {
                        warn!("Disconnect notification for {} failed: {}", session.uid, e);
                    }
                }
                None if self.shut_down.load(Ordering::Acquire) => break,
                None => {}
            }
        }
    }

    /// Refuse further enqueues and drain the remaining sessions
    /// synchronously, bounded by `deadline`. Idempotent; only the first
    /// caller drains.
    pub async fn shutdown(&self, disconnector: &dyn Disconnector, deadline: Duration) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let pending = self.size();
        if pending == 0 {
            return;
        }
        info!("Draining {} pending disconnect notifications", pending);

        let drain = async {
            while let Some(session) = self.pop() {
                if let Err(e) = disconnector.disconnect_now(&session).await {
                    warn!("Disconnect notification for {} failed: {}", session.uid, e);
                }
            }
        };

        if tokio::time::timeout(deadline, drain).await.is_err() {
            let dropped = {
                let mut queue = self.queue.lock().unwrap();
                let dropped = queue.len();
                queue.clear();
                dropped
            };
            warn!(
                "Disconnect drain deadline reached, {} notifications dropped",
                dropped
            );
            gauge!("gateway_disconnect_queue_size").set(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{build_node, mock_session};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingDisconnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Disconnector for CountingDisconnector {
        async fn disconnect_now(&self, _session: &Arc<Session>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn new_queue() -> Arc<DisconnectQueue> {
        Arc::new(DisconnectQueue::new(DisconnectQueueConfig { rate: 1000 }))
    }

    #[tokio::test]
    async fn test_run_disconnects_sessions() {
        let node = build_node();
        let queue = new_queue();
        let disconnector = Arc::new(CountingDisconnector::default());

        let (session, _rx, _conn) = mock_session(&node);
        queue.enqueue(session);
        assert_eq!(queue.size(), 1);

        let worker = tokio::spawn(queue.clone().run(disconnector.clone()));

        while queue.size() > 0 {
            tokio::task::yield_now().await;
        }

        queue.shutdown(disconnector.as_ref(), Duration::from_secs(1)).await;
        worker.await.unwrap();
        assert_eq!(disconnector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let node = build_node();
        let queue = new_queue();
        let disconnector = CountingDisconnector::default();

        let (one, _rx1, _c1) = mock_session(&node);
        let (two, _rx2, _c2) = mock_session(&node);
        queue.enqueue(one);
        queue.enqueue(two);
        assert_eq!(queue.size(), 2);

        queue.shutdown(&disconnector, Duration::from_secs(1)).await;

        assert_eq!(queue.size(), 0);
        assert_eq!(disconnector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_allows_multiple_entering() {
        let queue = new_queue();
        let disconnector = CountingDisconnector::default();

        for _ in 0..10 {
            queue.shutdown(&disconnector, Duration::from_secs(1)).await;
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_noop() {
        let node = build_node();
        let queue = new_queue();
        let disconnector = CountingDisconnector::default();
        queue.shutdown(&disconnector, Duration::from_secs(1)).await;

        let (session, _rx, _conn) = mock_session(&node);
        queue.enqueue(session);

        assert_eq!(queue.size(), 0);
    }
}
