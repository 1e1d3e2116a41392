//! WebSocket server handler using Axum.

use crate::error::{GatewayError, Result};
use crate::node::Node;
use crate::protocol::{close_code, is_expected_close};
use crate::session::{Connection, Session};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use metrics::counter;
use rpc_client::Env;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub node: Arc<Node>,
    /// Request headers (lowercase) forwarded into the RPC env.
    pub forward_headers: Vec<String>,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cable", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.node.session_count();
    let streams = state.node.hub().stream_count();
    format!(
        r#"{{"status":"ok","sessions":{},"streams":{}}}"#,
        sessions, streams
    )
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> impl IntoResponse {
    if state.node.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let env = build_env(&headers, &uri, &state.forward_headers);
    ws.on_upgrade(|socket| handle_socket(socket, state, env))
        .into_response()
}

/// Build the RPC env for a new connection: the request URL plus the
/// configured header allowlist.
fn build_env(headers: &HeaderMap, uri: &Uri, forward_headers: &[String]) -> Env {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let url = format!("ws://{}{}", host, uri);

    let mut forwarded = HashMap::new();
    for name in forward_headers {
        if let Some(value) = headers.get(name.as_str()).and_then(|v| v.to_str().ok()) {
            forwarded.insert(name.clone(), value.to_string());
        }
    }

    Env::new(url, forwarded)
}

/// Write half of a live WebSocket.
struct WsConnection {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn write(&mut self, msg: Message) -> Result<()> {
        self.sink
            .send(msg)
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))
    }
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, env: Env) {
    let (sink, stream) = socket.split();

    let (session, rx) = Session::new(&state.node, Box::new(WsConnection { sink }), env);
    state.node.register_session(&session);

    counter!("gateway_connections_total").increment(1);
    info!("Session {} connected", session.uid);

    // The writer must be live before authenticate so welcome transmissions
    // (or the rejection close frame) reach the wire.
    let writer = tokio::spawn(session.clone().send_messages(rx));

    let _ = state.node.authenticate(&session).await;

    if session.is_connected() {
        session.start_ping();
        read_messages(&state, &session, stream).await;
    }

    let _ = writer.await;

    counter!("gateway_disconnections_total").increment(1);
    info!("Session {} disconnected", session.uid);
}

/// Read loop: consumes client frames until the connection ends, then
/// initiates disconnect with a close code matching how it ended.
async fn read_messages(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    mut stream: SplitStream<WebSocket>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = state.node.handle_command(session, text.as_str()).await {
                    warn!("Error handling command from {}: {}", session.uid, e);
                }
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    if let Err(e) = state.node.handle_command(session, text).await {
                        warn!("Error handling command from {}: {}", session.uid, e);
                    }
                }
                Err(_) => {
                    debug!("Session {} sent non-UTF8 binary frame", session.uid);
                }
            },
            Ok(Message::Close(frame)) => {
                let code = frame.map(|f| f.code).unwrap_or(close_code::NO_STATUS);
                if is_expected_close(code) {
                    debug!("Session {} closed by peer ({})", session.uid, code);
                    session.disconnect("Read closed", close_code::NORMAL);
                } else {
                    debug!("Session {} close error ({})", session.uid, code);
                    session.disconnect("Read failed", close_code::ABNORMAL);
                }
                return;
            }
            // Protocol-level ping/pong is answered by the framing layer.
            Ok(_) => {}
            Err(e) => {
                debug!("Session {} read error: {}", session.uid, e);
                session.disconnect("Read failed", close_code::ABNORMAL);
                return;
            }
        }
    }

    // Stream ended without a close frame.
    session.disconnect("Read failed", close_code::ABNORMAL);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_env_forwards_allowlisted_headers_only() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "gw.example.com".parse().unwrap());
        headers.insert("cookie", "sid=42".parse().unwrap());
        headers.insert("x-secret", "nope".parse().unwrap());
        let uri: Uri = "/cable?token=t1".parse().unwrap();

        let env = build_env(&headers, &uri, &["cookie".to_string()]);

        assert_eq!(env.url, "ws://gw.example.com/cable?token=t1");
        assert_eq!(env.headers.get("cookie").map(String::as_str), Some("sid=42"));
        assert!(!env.headers.contains_key("x-secret"));
    }
}
