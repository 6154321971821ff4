//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (passthrough port)
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id + active count for draining)
//!     → passthrough::PassthroughRouter (SNI sniff, splice)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - No TLS termination here; bytes are relayed untouched

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
