//! HTTP/JSON implementation of the RPC facade.

use crate::types::{
    CommandRequest, CommandResponse, ConnectResponse, DisconnectRequest, DisconnectResponse, Env,
};
use crate::{Result, RpcClient};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Configuration for the HTTP RPC client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base URL of the application server, e.g. `http://localhost:3000/rpc`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/rpc".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// RPC client posting JSON bodies to `{base}/connect`, `{base}/command`
/// and `{base}/disconnect`. Connection pooling is reqwest's.
pub struct HttpRpcClient {
    http: reqwest::Client,
    config: RpcConfig,
}

impl HttpRpcClient {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), method);
        debug!("RPC {} -> {}", method, url);

        let response = self
            .http
            .post(&url)
            .timeout(self.config.timeout)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Resp>()
            .await?;

        Ok(response)
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn connect(&self, env: &Env) -> Result<ConnectResponse> {
        self.call("connect", env).await
    }

    async fn command(&self, request: &CommandRequest) -> Result<CommandResponse> {
        self.call("command", request).await
    }

    async fn disconnect(&self, request: &DisconnectRequest) -> Result<DisconnectResponse> {
        self.call("disconnect", request).await
    }
}
