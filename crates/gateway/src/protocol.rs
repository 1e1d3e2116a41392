//! WebSocket protocol message types.
//!
//! Defines the JSON command envelope clients send, the server-generated
//! ping, and the close codes used across the gateway. Server-to-client
//! payloads are opaque strings produced by the application server and
//! forwarded verbatim, so there is no outbound message enum.

use serde::{Deserialize, Serialize};

/// WebSocket close codes used by the gateway.
pub mod close_code {
    /// Normal closure (clean reject, client-initiated close).
    pub const NORMAL: u16 = 1000;
    /// Server is shutting down or the browser navigated away.
    pub const GOING_AWAY: u16 = 1001;
    /// No status code was present in the close frame.
    pub const NO_STATUS: u16 = 1005;
    /// Abnormal closure (write failure, queue overflow, ping failure).
    pub const ABNORMAL: u16 = 1006;
    /// Internal server error (RPC returned ERROR or was unreachable).
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Close codes a peer may use for an orderly goodbye.
pub fn is_expected_close(code: u16) -> bool {
    matches!(
        code,
        close_code::NORMAL | close_code::GOING_AWAY | close_code::NO_STATUS
    )
}

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Command envelope sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Ask the application server to subscribe this channel identifier.
    Subscribe {
        /// Opaque channel identifier (e.g. a serialized channel descriptor).
        identifier: String,
    },
    /// Drop the subscription for this channel identifier.
    Unsubscribe { identifier: String },
    /// Perform an action on an already-subscribed channel.
    Message {
        identifier: String,
        /// Payload forwarded to the application server as-is.
        #[serde(default)]
        data: String,
    },
}

impl ClientCommand {
    /// The wire name of the command, as sent to the RPC backend.
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
            ClientCommand::Message { .. } => "message",
        }
    }

    /// The channel identifier this command targets.
    pub fn identifier(&self) -> &str {
        match self {
            ClientCommand::Subscribe { identifier }
            | ClientCommand::Unsubscribe { identifier }
            | ClientCommand::Message { identifier, .. } => identifier,
        }
    }
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Server-generated keepalive ping.
#[derive(Debug, Serialize)]
struct PingMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    message: i64,
}

/// Build the keepalive ping payload: `{"type":"ping","message":<unix_ts>}`.
pub fn ping_message(unix_ts: i64) -> String {
    serde_json::to_string(&PingMessage {
        kind: "ping",
        message: unix_ts,
    })
    // Struct of two scalar fields; serialization cannot fail.
    .unwrap_or_default()
}

// ============================================================================
// Pub/sub envelope
// ============================================================================

/// Broadcast envelope delivered by the pub/sub backend: names the stream
/// and carries the payload to forward verbatim to its subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub stream: String,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"command":"subscribe","identifier":"chat_1"}"#).unwrap();
        assert_eq!(cmd.name(), "subscribe");
        assert_eq!(cmd.identifier(), "chat_1");
    }

    #[test]
    fn test_parse_message_with_data() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"command":"message","identifier":"chat_1","data":"{\"action\":\"speak\"}"}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::Message { identifier, data } => {
                assert_eq!(identifier, "chat_1");
                assert_eq!(data, "{\"action\":\"speak\"}");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_message_data_defaults_empty() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"command":"message","identifier":"chat_1"}"#).unwrap();
        match cmd {
            ClientCommand::Message { data, .. } => assert!(data.is_empty()),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let result =
            serde_json::from_str::<ClientCommand>(r#"{"command":"dance","identifier":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_ping_message_shape() {
        assert_eq!(
            ping_message(1_700_000_000),
            r#"{"type":"ping","message":1700000000}"#
        );
    }

    #[test]
    fn test_expected_close_codes() {
        assert!(is_expected_close(close_code::NORMAL));
        assert!(is_expected_close(close_code::GOING_AWAY));
        assert!(is_expected_close(close_code::NO_STATUS));
        assert!(!is_expected_close(close_code::ABNORMAL));
        assert!(!is_expected_close(close_code::INTERNAL_ERROR));
    }

    #[test]
    fn test_broadcast_envelope_roundtrip() {
        let msg: BroadcastMessage =
            serde_json::from_str(r#"{"stream":"stream_a","data":"hello"}"#).unwrap();
        assert_eq!(msg.stream, "stream_a");
        assert_eq!(msg.data, "hello");
    }
}
