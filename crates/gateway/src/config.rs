//! Environment-driven configuration.

use std::env;
use std::time::Duration;

/// Gateway configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host for the WebSocket server.
    pub host: String,
    /// Bind port for the WebSocket server.
    pub port: u16,
    /// Port for the Prometheus metrics exporter.
    pub metrics_port: u16,
    /// Base URL of the application server RPC endpoint.
    pub rpc_url: String,
    /// Per-request RPC timeout.
    pub rpc_timeout: Duration,
    /// NATS server URL.
    pub nats_url: String,
    /// NATS subject carrying broadcast envelopes.
    pub nats_subject: String,
    /// Request headers (lowercase) forwarded into the RPC env.
    pub forward_headers: Vec<String>,
    /// DisconnectQueue drain rate, notifications per second.
    pub disconnect_rate: u64,
    /// Overall deadline for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_port: 9090,
            rpc_url: "http://localhost:3000/rpc".to_string(),
            rpc_timeout: Duration::from_secs(5),
            nats_url: "nats://localhost:4222".to_string(),
            nats_subject: "gateway.broadcast".to_string(),
            forward_headers: vec!["cookie".to_string(), "origin".to_string()],
            disconnect_rate: 100,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Read configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port),
            metrics_port: parse_var("METRICS_PORT", defaults.metrics_port),
            rpc_url: env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            rpc_timeout: Duration::from_millis(parse_var(
                "RPC_TIMEOUT_MS",
                defaults.rpc_timeout.as_millis() as u64,
            )),
            nats_url: env::var("NATS_URL").unwrap_or(defaults.nats_url),
            nats_subject: env::var("NATS_SUBJECT").unwrap_or(defaults.nats_subject),
            forward_headers: env::var("FORWARD_HEADERS")
                .map(|raw| {
                    raw.split(',')
                        .map(|h| h.trim().to_ascii_lowercase())
                        .filter(|h| !h.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.forward_headers),
            disconnect_rate: parse_var("DISCONNECT_RATE", defaults.disconnect_rate).max(1),
            shutdown_timeout: Duration::from_secs(parse_var(
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.disconnect_rate, 100);
        assert_eq!(config.forward_headers, vec!["cookie", "origin"]);
    }
}
