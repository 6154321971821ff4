//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, every error collected)
//!     → ControllerConfig (validated, immutable)
//!     → converted into per-subsystem option structs at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdmissionConfig, ControllerConfig, ControllerSection, DataPlaneConfig, DynamicConfig,
    ObservabilityConfig, PassthroughConfig, StoreConfig, StreamsConfig,
};
pub use validation::{validate_config, ValidationError};
