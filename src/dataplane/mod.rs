//! Data-plane collaborator.
//!
//! # Data Flow
//! ```text
//! Configuration
//!     → renderer.rs (JSON document + structural checks + optional test command)
//!     → http.rs
//!         publish_full: write rendered file → POST reload endpoint
//!         apply_dynamic_backends: POST backends JSON (expects 201)
//! ```
//!
//! # Design Decisions
//! - Every operation is idempotent; callers may retry freely
//! - Rendering and syntax checking are shared by admission and reloads so a
//!   configuration admitted once renders the same way when published

pub mod http;
pub mod renderer;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Backend, Configuration};

pub use http::HttpDataPlane;

#[async_trait]
pub trait DataPlane: Send + Sync {
    /// Write the configuration and reload the proxy.
    async fn publish_full(&self, config: &Configuration) -> Result<()>;

    /// Hot-swap backends without reloading.
    async fn apply_dynamic_backends(&self, backends: &[Backend]) -> Result<()>;

    /// Render and check the configuration without applying it.
    async fn render_and_syntax_check(&self, config: &Configuration) -> Result<Vec<u8>>;
}
