//! TLS passthrough subsystem.
//!
//! # Data Flow
//! ```text
//! Client TCP connection
//!     → net::Listener (bounded accept)
//!     → proxy.rs (read first TLS record, sniff timeout)
//!     → sni.rs (ClientHello server_name)
//!     → PassthroughTable lookup (hostname, else default, else drop)
//!     → dial target, optional PROXY v1 header, replay sniffed bytes
//!     → bidirectional copy until either side closes
//! ```
//!
//! # Design Decisions
//! - TLS is never terminated; the ClientHello is parsed read-only
//! - The hostname table is rebuilt after each applied sync and swapped
//!   atomically, so lookups never block a reconciliation tick
//! - The default target is the local proxy's TLS port with PROXY protocol,
//!   so the client address survives the extra hop

pub mod proxy;
pub mod sni;

pub use proxy::{PassthroughOptions, PassthroughRouter, PassthroughTable, PassthroughTarget};
