//! Status broadcaster: realtime WebSocket channel.
//!
//! Provides connection management, the wire protocol, heartbeat and cleanup
//! sweeps, and the HTTP upgrade handler used by the router.

mod handler;
mod heartbeat;
pub mod manager;
pub mod protocol;

pub use handler::ws_handler;
pub use heartbeat::{start_cleanup, start_heartbeat};
pub use manager::{close_code, ConnectionMetadata, ConnectionState, WsError, WsManager};
pub use protocol::{ClientMessage, ServerMessage};
