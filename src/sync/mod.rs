//! Synchronization subsystem.
//!
//! # Data Flow
//! ```text
//! store change / periodic resync
//!     → queue.rs (coalesce pending requests)
//!     → reconciler.rs (rate-limited tick)
//!         → routing::synthesize (candidate Configuration)
//!         → decision.rs (NoChange | DynamicOnly | FullReload)
//!         → DataPlane::publish_full (reload only)
//!         → publisher.rs (retrying backend push)
//!         → RunningConfig swap + metric cleanup + passthrough table swap
//! ```
//!
//! # Design Decisions
//! - Ticks are serialized on one task; no two ticks overlap
//! - The running configuration advances only after every step succeeded
//! - Dynamic-only ticks keep the checksum of the last full reload

pub mod decision;
pub mod publisher;
pub mod queue;
pub mod reconciler;

pub use decision::{checksum, decide, ChangeDecision};
pub use publisher::DynamicPublisher;
pub use queue::SyncQueue;
pub use reconciler::{Reconciler, ReconcilerOptions, RunningConfig};
