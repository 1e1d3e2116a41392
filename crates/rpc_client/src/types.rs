//! RPC wire types.
//!
//! Field names and the numeric `status` encoding are fixed by the
//! application-server contract; do not rename without coordinating a
//! protocol bump.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Call outcome reported by the application server.
///
/// Serialized as an integer on the wire: ERROR=0, SUCCESS=1, FAILURE=2.
/// FAILURE is an application-level rejection (e.g. bad credentials), not a
/// gateway error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Status {
    Error,
    Success,
    Failure,
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        match status {
            Status::Error => 0,
            Status::Success => 1,
            Status::Failure => 2,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(Status::Error),
            1 => Ok(Status::Success),
            2 => Ok(Status::Failure),
            other => Err(format!("unknown status value: {}", other)),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Error
    }
}

/// Connection-scoped environment passed on every RPC call.
///
/// `cstate` is an opaque key/value map owned by the application: every
/// response may carry a replacement map which the gateway applies to the
/// session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Env {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cstate: Option<HashMap<String, String>>,
}

impl Env {
    pub fn new(url: String, headers: HashMap<String, String>) -> Self {
        Self {
            url,
            headers,
            cstate: None,
        }
    }
}

/// Response to `connect`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectResponse {
    #[serde(default)]
    pub status: Status,
    /// Opaque authorization token echoed back on every subsequent call.
    #[serde(default)]
    pub identifiers: String,
    /// Payloads to forward verbatim to the client, in order.
    #[serde(default)]
    pub transmissions: Vec<String>,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub env: Option<Env>,
}

/// Request body for `command`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    pub command: String,
    pub identifier: String,
    pub connection_identifiers: String,
    pub data: String,
    pub env: Env,
}

/// Response to `command`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub status: Status,
    /// Close the session after applying this response.
    #[serde(default)]
    pub disconnect: bool,
    /// Remove every stream subscription held under this identifier before
    /// applying `streams`.
    #[serde(default)]
    pub stop_streams: bool,
    /// Streams to add to the session's subscriptions.
    #[serde(default)]
    pub streams: Vec<String>,
    #[serde(default)]
    pub transmissions: Vec<String>,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub env: Option<Env>,
}

/// Request body for `disconnect`.
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectRequest {
    pub identifiers: String,
    pub subscriptions: Vec<String>,
    pub env: Env,
}

/// Response to `disconnect`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisconnectResponse {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub error_msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        assert_eq!(serde_json::to_string(&Status::Error).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Status::Success).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Status::Failure).unwrap(), "2");

        let status: Status = serde_json::from_str("1").unwrap();
        assert_eq!(status, Status::Success);
        assert!(serde_json::from_str::<Status>("7").is_err());
    }

    #[test]
    fn test_connect_response_defaults() {
        let resp: ConnectResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(resp.status, Status::Error);
        assert!(resp.identifiers.is_empty());
        assert!(resp.transmissions.is_empty());
        assert!(resp.env.is_none());
    }

    #[test]
    fn test_command_response_full() {
        let json = r#"{
            "status": 1,
            "stop_streams": true,
            "streams": ["stream_a", "stream_b"],
            "transmissions": ["confirm"],
            "env": {"url": "", "cstate": {"u": "1"}}
        }"#;
        let resp: CommandResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, Status::Success);
        assert!(resp.stop_streams);
        assert!(!resp.disconnect);
        assert_eq!(resp.streams, vec!["stream_a", "stream_b"]);
        let env = resp.env.unwrap();
        assert_eq!(env.cstate.unwrap().get("u").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_env_serializes_without_empty_cstate() {
        let env = Env::new("ws://example.com/cable".into(), HashMap::new());
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("cstate"));
    }
}
