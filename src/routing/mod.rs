//! Routing model synthesis subsystem.
//!
//! # Data Flow
//! ```text
//! ResolvedDeclaration[] + Candidates (keys under admission)
//!     → overlap.rs (reject conflicting candidates)
//!     → builder.rs (default upstream, upstreams, servers, TLS, locations)
//!     → locations.rs (prefix normalization, exact clones, ordering)
//!     → canary.rs (attach canary backends to primaries)
//!     → RoutingModel::validate
//!     → streams.rs (TCP/UDP stream services)
//!     → Configuration
//! ```
//!
//! # Design Decisions
//! - Synthesis is a pure function of declarations and store state, so the
//!   reconciler and the admission gate share it unchanged
//! - Missing services, endpoints and secrets degrade to the default backend
//!   or certificate instead of failing the whole model
//! - Canary backends never serve a location directly; they are only
//!   reachable as alternatives of a primary

pub mod builder;
pub mod canary;
pub mod locations;
pub mod overlap;
pub mod streams;
pub mod tls;

use std::collections::{BTreeMap, BTreeSet};

pub use builder::{BuilderOptions, ModelBuilder, RoutingModel};
pub use canary::CanaryMerger;
pub use overlap::{Candidates, OverlapPolicy};

use crate::error::Result;
use crate::model::{
    Configuration, L4Protocol, ResolvedDeclaration, RoutingDeclaration,
    SettingsParser,
};
use crate::store::ResourceStore;

/// Stream service mappings, `external port → namespace/service:port`.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub tcp: BTreeMap<String, String>,
    pub udp: BTreeMap<String, String>,
    pub reserved_ports: BTreeSet<u16>,
}

/// Everything synthesis needs besides declarations and the store.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    pub builder: BuilderOptions,
    pub streams: StreamOptions,
    pub parser: SettingsParser,
    pub strict_path_validation: bool,
}

/// Build, merge and validate a full configuration.
pub fn synthesize(
    store: &dyn ResourceStore,
    options: &SynthesisOptions,
    declarations: &[ResolvedDeclaration],
    candidates: &Candidates,
) -> Result<Configuration> {
    let mut model = ModelBuilder::new(store, &options.builder).build(declarations, candidates)?;
    CanaryMerger::merge(&mut model, declarations);
    model.validate()?;

    let streams_cfg = &options.streams;
    let reserved = &streams_cfg.reserved_ports;
    let tcp = streams::resolve_streams(&streams_cfg.tcp, L4Protocol::Tcp, reserved, store);
    let udp = streams::resolve_streams(&streams_cfg.udp, L4Protocol::Udp, reserved, store);
    Ok(model.into_configuration(tcp, udp))
}

/// Parse settings and check paths for one declaration.
pub fn resolve_declaration(
    declaration: RoutingDeclaration,
    parser: &SettingsParser,
    strict_paths: bool,
) -> Result<ResolvedDeclaration> {
    let resolved = ResolvedDeclaration::resolve(declaration, parser)?;
    resolved
        .declaration
        .validate_paths(strict_paths, resolved.settings.use_regex)?;
    Ok(resolved)
}

/// Resolve every declaration, skipping invalid ones with a warning.
pub fn resolve_all(
    declarations: Vec<RoutingDeclaration>,
    parser: &SettingsParser,
    strict_paths: bool,
) -> Vec<ResolvedDeclaration> {
    declarations
        .into_iter()
        .filter_map(|decl| {
            let key = decl.key();
            match resolve_declaration(decl, parser, strict_paths) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    tracing::warn!(declaration = %key, error = %e, "Skipping invalid declaration");
                    None
                }
            }
        })
        .collect()
}
