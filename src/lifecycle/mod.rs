//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → reconciler finishes its tick and exits
//!               → passthrough listener stops accepting
//!               → admission webhook stops serving
//!     main then stops the batcher and drains tracked connections
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes at spawn
//! - Draining has a deadline; connections still open after it are cut

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
