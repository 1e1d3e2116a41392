//! RPC facade for the application server.
//!
//! The gateway delegates every application-layer decision (authentication,
//! subscription authorization, command handling, disconnect notification)
//! to an external application server over synchronous request/response
//! calls. This crate defines the wire types, the [`RpcClient`] trait the
//! gateway programs against, and an HTTP/JSON implementation.

pub mod client;
pub mod types;

pub use client::{HttpRpcClient, RpcConfig};
pub use types::{
    CommandRequest, CommandResponse, ConnectResponse, DisconnectRequest, DisconnectResponse, Env,
    Status,
};

use async_trait::async_trait;
use thiserror::Error;

/// RPC transport/protocol errors. Callers treat any of these as
/// `status = ERROR` for the session in question.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport-level failure (connection refused, timeout, bad status).
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a body we could not decode.
    #[error("RPC decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Synchronous request/response interface to the application server.
///
/// No streaming; connection pooling and retries are the transport's
/// concern. The gateway's Node holds this as a trait object so tests can
/// substitute a scripted implementation.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Authenticate a new connection.
    async fn connect(&self, env: &Env) -> Result<ConnectResponse>;

    /// Execute a client command (subscribe / unsubscribe / message).
    async fn command(&self, request: &CommandRequest) -> Result<CommandResponse>;

    /// Notify the application that a connection is gone.
    async fn disconnect(&self, request: &DisconnectRequest) -> Result<DisconnectResponse>;
}
