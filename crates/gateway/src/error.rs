//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// RPC call failed at the transport level.
    #[error("RPC error: {0}")]
    Rpc(#[from] rpc_client::RpcError),

    /// Anyhow error (for compatibility with nats_client).
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket write error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Socket write exceeded its deadline.
    #[error("Write deadline exceeded")]
    WriteTimeout,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
