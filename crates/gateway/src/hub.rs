//! Subscription index and broadcast fan-out.
//!
//! Maps streams to subscribed sessions and back. The inverse direction is
//! kept at channel-identifier granularity so a `stop_streams` response can
//! drop exactly the streams one identifier owns. The whole index sits
//! behind a single mutex; broadcasts snapshot the subscriber set and fan
//! out after releasing it, so one slow session never blocks the others.

use crate::session::{Session, SessionId};
use axum::extract::ws::Utf8Bytes;
use metrics::{counter, gauge};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
struct HubIndex {
    /// stream → subscribed sessions.
    streams: HashMap<String, HashMap<SessionId, Arc<Session>>>,
    /// session → identifier → streams.
    sessions: HashMap<SessionId, HashMap<String, HashSet<String>>>,
}

impl HubIndex {
    /// Whether any identifier of this session still holds `stream`.
    fn holds_stream(&self, uid: &SessionId, stream: &str) -> bool {
        self.sessions
            .get(uid)
            .is_some_and(|idents| idents.values().any(|streams| streams.contains(stream)))
    }

    /// Drop `(stream, session)` from the forward map, garbage-collecting
    /// the stream entry when its last subscriber leaves.
    fn drop_forward(&mut self, uid: &SessionId, stream: &str) {
        if let Some(subscribers) = self.streams.get_mut(stream) {
            subscribers.remove(uid);
            if subscribers.is_empty() {
                self.streams.remove(stream);
            }
        }
    }
}

/// In-memory index of stream subscriptions across all sessions.
pub struct Hub {
    index: Mutex<HubIndex>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            index: Mutex::new(HubIndex::default()),
        }
    }

    /// Subscribe a session to a stream under a channel identifier.
    /// Idempotent.
    pub fn subscribe(&self, session: &Arc<Session>, identifier: &str, stream: &str) {
        let mut index = self.index.lock().unwrap();

        index
            .streams
            .entry(stream.to_string())
            .or_default()
            .insert(session.uid, session.clone());
        index
            .sessions
            .entry(session.uid)
            .or_default()
            .entry(identifier.to_string())
            .or_default()
            .insert(stream.to_string());

        gauge!("gateway_streams_active").set(index.streams.len() as f64);
        debug!(
            "Session {} subscribed to stream {} ({})",
            session.uid, stream, identifier
        );
    }

    /// Remove one `(identifier, stream)` subscription. Idempotent.
    pub fn unsubscribe(&self, session: &Arc<Session>, identifier: &str, stream: &str) {
        let mut index = self.index.lock().unwrap();

        if let Some(idents) = index.sessions.get_mut(&session.uid) {
            if let Some(streams) = idents.get_mut(identifier) {
                streams.remove(stream);
                if streams.is_empty() {
                    idents.remove(identifier);
                }
            }
            if idents.is_empty() {
                index.sessions.remove(&session.uid);
            }
        }

        // The same stream may still be held under another identifier.
        if !index.holds_stream(&session.uid, stream) {
            index.drop_forward(&session.uid, stream);
        }

        gauge!("gateway_streams_active").set(index.streams.len() as f64);
    }

    /// Remove every stream subscription held under one identifier.
    pub fn remove_stream_subscriptions(&self, session: &Arc<Session>, identifier: &str) {
        let mut index = self.index.lock().unwrap();

        let streams = match index
            .sessions
            .get_mut(&session.uid)
            .and_then(|idents| idents.remove(identifier))
        {
            Some(streams) => streams,
            None => return,
        };

        if index
            .sessions
            .get(&session.uid)
            .is_some_and(|idents| idents.is_empty())
        {
            index.sessions.remove(&session.uid);
        }

        for stream in streams {
            if !index.holds_stream(&session.uid, &stream) {
                index.drop_forward(&session.uid, &stream);
            }
        }

        gauge!("gateway_streams_active").set(index.streams.len() as f64);
        debug!(
            "Session {} dropped streams for identifier {}",
            session.uid, identifier
        );
    }

    /// Remove a session from every stream it appears in.
    pub fn unsubscribe_all(&self, session: &Arc<Session>) {
        let mut index = self.index.lock().unwrap();

        let idents = match index.sessions.remove(&session.uid) {
            Some(idents) => idents,
            None => return,
        };

        for streams in idents.values() {
            for stream in streams {
                index.drop_forward(&session.uid, stream);
            }
        }

        gauge!("gateway_streams_active").set(index.streams.len() as f64);
    }

    /// Deliver a payload to every session subscribed to `stream`.
    ///
    /// The subscriber set is snapshotted under the index lock and the
    /// enqueues happen outside it.
    pub fn broadcast(&self, stream: &str, data: &str) {
        let subscribers: Vec<Arc<Session>> = {
            let index = self.index.lock().unwrap();
            match index.streams.get(stream) {
                Some(subscribers) => subscribers.values().cloned().collect(),
                None => return,
            }
        };

        counter!("gateway_broadcasts_total").increment(1);
        debug!(
            "Broadcasting on stream {} to {} sessions",
            stream,
            subscribers.len()
        );

        // Serialize once, share the buffer across sessions.
        let payload = Utf8Bytes::from(data.to_string());
        for session in subscribers {
            session.send(payload.clone());
        }
    }

    /// Number of streams with at least one subscriber.
    pub fn stream_count(&self) -> usize {
        self.index.lock().unwrap().streams.len()
    }

    /// Number of sessions subscribed to a stream.
    pub fn subscriber_count(&self, stream: &str) -> usize {
        self.index
            .lock()
            .unwrap()
            .streams
            .get(stream)
            .map_or(0, |subscribers| subscribers.len())
    }

    /// All streams a session is subscribed to, across identifiers.
    pub fn session_streams(&self, uid: &SessionId) -> HashSet<String> {
        self.index
            .lock()
            .unwrap()
            .sessions
            .get(uid)
            .map(|idents| idents.values().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Frame;
    use crate::testing::{build_node, mock_session};

    #[tokio::test]
    async fn test_subscribe_updates_both_directions() {
        let node = build_node();
        let hub = Hub::new();
        let (session, _rx, _conn) = mock_session(&node);

        hub.subscribe(&session, "chat_1", "stream_a");

        assert_eq!(hub.subscriber_count("stream_a"), 1);
        assert!(hub.session_streams(&session.uid).contains("stream_a"));
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let node = build_node();
        let hub = Hub::new();
        let (session, _rx, _conn) = mock_session(&node);

        hub.subscribe(&session, "chat_1", "stream_a");
        hub.subscribe(&session, "chat_1", "stream_a");

        assert_eq!(hub.subscriber_count("stream_a"), 1);
        assert_eq!(hub.session_streams(&session.uid).len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_garbage_collects_empty_streams() {
        let node = build_node();
        let hub = Hub::new();
        let (session, _rx, _conn) = mock_session(&node);

        hub.subscribe(&session, "chat_1", "stream_a");
        hub.unsubscribe(&session, "chat_1", "stream_a");
        hub.unsubscribe(&session, "chat_1", "stream_a");

        assert_eq!(hub.stream_count(), 0);
        assert!(hub.session_streams(&session.uid).is_empty());
    }

    #[tokio::test]
    async fn test_stream_survives_when_held_by_another_identifier() {
        let node = build_node();
        let hub = Hub::new();
        let (session, _rx, _conn) = mock_session(&node);

        hub.subscribe(&session, "chat_1", "stream_a");
        hub.subscribe(&session, "chat_2", "stream_a");
        hub.unsubscribe(&session, "chat_1", "stream_a");

        assert_eq!(hub.subscriber_count("stream_a"), 1);

        hub.unsubscribe(&session, "chat_2", "stream_a");
        assert_eq!(hub.subscriber_count("stream_a"), 0);
    }

    #[tokio::test]
    async fn test_remove_stream_subscriptions_scoped_to_identifier() {
        let node = build_node();
        let hub = Hub::new();
        let (session, _rx, _conn) = mock_session(&node);

        hub.subscribe(&session, "chat_1", "stream_a");
        hub.subscribe(&session, "chat_1", "stream_b");
        hub.subscribe(&session, "presence_1", "stream_c");

        hub.remove_stream_subscriptions(&session, "chat_1");

        assert_eq!(hub.subscriber_count("stream_a"), 0);
        assert_eq!(hub.subscriber_count("stream_b"), 0);
        assert_eq!(hub.subscriber_count("stream_c"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_removes_every_stream() {
        let node = build_node();
        let hub = Hub::new();
        let (session, _rx, _conn) = mock_session(&node);
        let (other, _rx2, _conn2) = mock_session(&node);

        hub.subscribe(&session, "chat_1", "stream_a");
        hub.subscribe(&session, "presence_1", "stream_b");
        hub.subscribe(&other, "chat_1", "stream_a");

        hub.unsubscribe_all(&session);

        assert!(hub.session_streams(&session.uid).is_empty());
        assert_eq!(hub.subscriber_count("stream_a"), 1);
        assert_eq!(hub.subscriber_count("stream_b"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_subscribers() {
        let node = build_node();
        let hub = Hub::new();
        let (subscribed, mut sub_rx, _c1) = mock_session(&node);
        let (bystander, mut other_rx, _c2) = mock_session(&node);

        hub.subscribe(&subscribed, "chat_1", "stream_a");
        hub.subscribe(&bystander, "chat_1", "stream_b");

        hub.broadcast("stream_a", "hello");
        hub.broadcast("stream_missing", "nobody");

        match sub_rx.try_recv() {
            Ok(Frame::Text(payload)) => assert_eq!(payload.as_str(), "hello"),
            other => panic!("expected text frame, got {:?}", other),
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_preserves_per_stream_order() {
        let node = build_node();
        let hub = Hub::new();
        let (session, mut rx, _conn) = mock_session(&node);

        hub.subscribe(&session, "chat_1", "stream_a");
        for i in 0..5 {
            hub.broadcast("stream_a", &format!("msg {}", i));
        }

        for i in 0..5 {
            match rx.try_recv() {
                Ok(Frame::Text(payload)) => assert_eq!(payload.as_str(), format!("msg {}", i)),
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    }
}
