//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to the data plane fails:
//!     → backoff.rs (exponential delay with jitter)
//!     → caller sleeps, then retries until its attempt budget runs out
//! ```
//!
//! # Design Decisions
//! - Every retry loop has a finite attempt budget
//! - Jitter spreads retries from independent controllers apart

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
