//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty for humans, JSON for log shippers)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event, no string-formatted context
//! - Metric helpers live here so names and labels are defined once
//! - Series for vanished hosts and backends are zeroed on every sync

pub mod logging;
pub mod metrics;

pub use logging::{init_tracing, LogFormat};
