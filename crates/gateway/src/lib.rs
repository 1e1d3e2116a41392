//! WebSocket gateway terminating client connections for an external
//! application server.
//!
//! This service:
//! - Accepts WebSocket connections and authenticates them over RPC
//! - Mediates client commands (subscribe/unsubscribe/message) through the
//!   application server and applies its verdicts
//! - Subscribes to broadcast envelopes via NATS
//! - Fans each broadcast out to the sessions subscribed to its stream
//!
//! ## Architecture
//!
//! ```text
//! NATS: gateway.broadcast
//!         ↓
//! BroadcastRouter (subscribes to NATS)
//!         ↓
//! Node → Hub (stream ↔ session index)
//!         ↓
//! Session (bounded queue, single writer, ping timer)
//!         ↓                         ↕ RPC connect/command/disconnect
//! WebSocket clients          application server
//! ```
//!
//! ## Load-Shedding Design
//!
//! - Bounded per-session send queues; an overflowing session is terminated
//!   rather than back-pressuring the broadcast path
//! - Broadcasts snapshot the subscriber set and enqueue outside the index
//!   lock
//! - Disconnect notifications drain through a rate-limited queue so mass
//!   disconnects cannot stampede the application server

pub mod config;
pub mod disconnect_queue;
pub mod error;
pub mod hub;
pub mod node;
pub mod protocol;
pub mod router;
pub mod session;
pub mod ws_server;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use disconnect_queue::{DisconnectQueue, DisconnectQueueConfig, Disconnector};
pub use error::{GatewayError, Result};
pub use hub::Hub;
pub use node::Node;
pub use protocol::{close_code, BroadcastMessage, ClientCommand};
pub use router::{BroadcastRouter, RouterConfig};
pub use session::{Connection, Frame, Session, SessionId};
pub use ws_server::{create_router, AppState};
