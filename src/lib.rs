//! Ingress controller control plane.
//!
//! Turns routing declarations and cluster state into a data-plane
//! configuration, reloads the data plane only when it must, gates new
//! declarations through a batching admission check, and relays TLS
//! passthrough connections by SNI.

// Routing model
pub mod model;
pub mod routing;
pub mod store;

// Applying configuration
pub mod dataplane;
pub mod sync;

// Edges
pub mod admission;
pub mod passthrough;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::ControllerConfig;
pub use error::{ControllerError, Result};
pub use lifecycle::Shutdown;
