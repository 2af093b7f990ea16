//! Async client core for the eWeLink / CoolKit device cloud.
//!
//! This crate owns the transport mechanics of a device-cloud session:
//!
//! - **[`SessionManager`]** -- OAuth-style token lifecycle: authorization-code
//!   exchange, expiry tracking, silent single-flight refresh, invalidation.
//! - **[`CloudClient`]** -- signed and bearer-authenticated JSON requests
//!   against the region gateway, with the vendor `{error, msg, data}`
//!   envelope unwrapped and backend error codes mapped to typed failures.
//! - **[`WsClient`]** -- the realtime wire channel: dispatch endpoint
//!   resolution, TLS socket bootstrap, HTTP Upgrade handshake with accept-key
//!   verification, hybi-10 frame codec, and cooperative heartbeat.
//!
//! Domain logic (device snapshots, parameter reconciliation) lives in
//! `sonofly-core`, which builds on these primitives.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod region;
pub mod session;
pub mod sign;
pub mod store;
pub mod tls;
pub mod ws;

pub use client::CloudClient;
pub use config::AppCredentials;
pub use dispatch::DispatchEndpoint;
pub use error::Error;
pub use region::Region;
pub use session::{Session, SessionManager};
pub use store::{KvStore, MemoryStore};
pub use tls::TlsMode;
pub use ws::{Frame, Opcode, WsClient};
