//! Gateway service entry point.
//!
//! WebSocket gateway delegating application decisions to an external
//! server over RPC.

use anyhow::Result;
use gateway::{
    create_router, AppState, BroadcastRouter, Config, DisconnectQueueConfig, Node, RouterConfig,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::NatsClient;
use rpc_client::{HttpRpcClient, RpcConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    let config = Config::from_env();

    info!("Configuration:");
    info!("  HOST: {}", config.host);
    info!("  PORT: {}", config.port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  RPC_URL: {}", config.rpc_url);
    info!("  NATS_URL: {}", config.nats_url);
    info!("  NATS_SUBJECT: {}", config.nats_subject);
    info!("  FORWARD_HEADERS: {:?}", config.forward_headers);
    info!("  DISCONNECT_RATE: {}", config.disconnect_rate);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!(
        "Prometheus metrics server started on port {}",
        config.metrics_port
    );

    // Connect to NATS
    let nats = Arc::new(NatsClient::connect(&config.nats_url).await?);
    info!("Connected to NATS");

    // RPC client for the application server
    let rpc = Arc::new(HttpRpcClient::new(RpcConfig {
        base_url: config.rpc_url.clone(),
        timeout: config.rpc_timeout,
    }));

    // Node: hub, session registry, disconnect queue
    let node = Node::new(
        rpc,
        DisconnectQueueConfig {
            rate: config.disconnect_rate,
        },
    );

    // Disconnect queue worker
    let queue_handle = tokio::spawn(
        node.disconnect_queue()
            .clone()
            .run(node.clone() as Arc<dyn gateway::Disconnector>),
    );

    // Broadcast router
    let router = Arc::new(BroadcastRouter::new(
        node.clone(),
        nats,
        RouterConfig {
            subject: config.nats_subject.clone(),
        },
    ));
    let (router_shutdown_tx, router_shutdown_rx) = mpsc::channel(1);
    let router_handle = tokio::spawn(async move {
        if let Err(e) = router.run(router_shutdown_rx).await {
            error!("Router error: {:?}", e);
        }
    });

    // HTTP server with the WebSocket endpoint
    let state = Arc::new(AppState {
        node: node.clone(),
        forward_headers: config.forward_headers.clone(),
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain sessions and pending disconnect notifications
    info!("Shutting down node...");
    node.shutdown(config.shutdown_timeout).await;

    info!("Shutting down router...");
    let _ = router_shutdown_tx.send(()).await;
    let _ = router_handle.await;
    let _ = queue_handle.await;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
