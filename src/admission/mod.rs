//! Admission subsystem.
//!
//! # Data Flow
//! ```text
//! POST /validate (server.rs)
//!     → cheap per-declaration checks (settings, paths)
//!     → batcher.rs (append to pending batch, wait with deadline)
//!     → worker: swap out batch once the window has passed
//!     → validator.rs (admitted ∪ batch → synthesize → render + check)
//!     → one verdict fanned out to every waiter in the batch
//! ```
//!
//! # Design Decisions
//! - One synthesis per batch instead of one per request
//! - A bad batch rejects every member; callers retry individually
//! - Idle workers park on a notification instead of polling

pub mod batcher;
pub mod server;
pub mod validator;

pub use batcher::{AdmissionBatcher, BatchValidator, BatcherOptions};
pub use server::{admission_router, AdmissionResponse, AdmissionState};
pub use validator::DeclarationValidator;
