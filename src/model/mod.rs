//! Routing data model.
//!
//! # Data Flow
//! ```text
//! RoutingDeclaration (from the store)
//!     → settings.rs (annotations → typed Settings, pure)
//!     → ResolvedDeclaration
//!     → routing::ModelBuilder
//!     → Configuration { backends, servers, streams, passthrough }
//! ```
//!
//! # Design Decisions
//! - Everything is plain data with `serde` derives so it can be rendered,
//!   hashed and compared without extra glue
//! - Configuration equality ignores the checksum and treats endpoint and
//!   alternative-backend lists as sets
//! - Ordered containers only; the same inputs always produce the same bytes

pub mod declaration;
pub mod settings;
pub mod types;

pub use declaration::{
    BackendRef, DeclarationKey, HostRule, PathRule, PathType, RoutingDeclaration, ServicePort,
    TlsEntry,
};
pub use settings::{
    AffinityKind, CanaryAffinityBehavior, CanarySettings, CookieHash, ResolvedDeclaration,
    Settings, SettingsParser,
};
pub use types::{
    Backend, Configuration, Endpoint, L4Backend, L4Protocol, L4Service, Location,
    PassthroughBackend, Server, SessionAffinity, SslCert, TrafficShapingPolicy,
    DEFAULT_SERVER_NAME, DEFAULT_UPSTREAM_NAME, ROOT_LOCATION,
};
