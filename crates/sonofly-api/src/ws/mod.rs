//! Realtime wire protocol.
//!
//! One TLS socket per device-control session, promoted to a frame channel
//! by an HTTP Upgrade handshake and kept alive with cooperative ping
//! frames. Frames are exchanged in strict call order; callers needing
//! concurrent device operations use independent clients.

pub mod client;
pub mod frame;
pub mod handshake;
pub mod messages;

pub use client::{HeartbeatState, WsClient};
pub use frame::{Frame, Opcode};
pub use handshake::accept_key;
pub use messages::{OnlineMessage, QueryMessage, UpdateMessage};
