//! acs-rpc - JSON-RPC WebSocket server for the desktop companion
//!
//! Lets several UI clients share one engine instance: subscribe to
//! thread rooms, exchange streamed model and tool events, coordinate
//! which client drives a room through a TTL lease, and answer
//! tool-execution approvals raised from inside the engine.

pub mod approvals;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod rooms;
pub mod router;
pub mod server;
pub mod state;
pub mod turn;

pub use rooms::RoomSnapshot;
pub use router::MethodRouter;
pub use server::{app, serve, ServerError};
pub use state::{Server, ServerConfig};
pub use turn::{TurnError, TurnRequest};

/// Capacity of each client's outbound queue. Notifications beyond it
/// are dropped; clients reconcile through the cursor in `room/event`.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;
