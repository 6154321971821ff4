//! Resource store: the controller's read-only view of cluster state.
//!
//! # Data Flow
//! ```text
//! snapshot file (TOML)
//!     → file.rs (parse, certificates via x509-parser)
//!     → ArcSwap<Snapshot> (atomic swap on reload)
//!     → cache.rs (read-through per-namespace endpoint index)
//!     → ResourceStore lookups from the builder
//!
//! On change:
//!     watcher.rs detects the file change
//!     → FileStore::reload (invalidates changed namespaces)
//!     → SyncQueue::enqueue
//! ```
//!
//! # Design Decisions
//! - Lookups are synchronous and side-effect free so the builder stays a
//!   pure function of store state
//! - The endpoint cache is owned by the store and invalidated explicitly;
//!   the all-namespaces entry is dropped together with any namespace

pub mod cache;
pub mod file;
pub mod watcher;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Endpoint, RoutingDeclaration, ServicePort, SslCert};

pub use cache::{EndpointCache, NamespaceScope};
pub use file::{ClusterSnapshot, EndpointPort, EndpointSet, FileStore, SecretSpec, StoreError};
pub use watcher::SnapshotWatcher;

/// A port exposed by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePortSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub port: u16,
    /// Port on the endpoints; defaults to `port`.
    #[serde(default)]
    pub target_port: Option<u16>,
}

impl ServicePortSpec {
    pub fn target(&self) -> u16 {
        self.target_port.unwrap_or(self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub cluster_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePortSpec>,
}

impl Service {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Find a port by number or by name.
    pub fn port(&self, port: &ServicePort) -> Option<&ServicePortSpec> {
        match port {
            ServicePort::Number(n) => self.ports.iter().find(|p| p.port == *n),
            ServicePort::Name(name) => self
                .ports
                .iter()
                .find(|p| p.name.as_deref() == Some(name.as_str())),
        }
    }
}

/// Read access to declarations, services, endpoints and certificates.
pub trait ResourceStore: Send + Sync {
    fn list_declarations(&self) -> Vec<RoutingDeclaration>;

    fn resolve_service(&self, namespace: &str, name: &str) -> Result<Service>;

    /// Ready endpoints of a service port. An endpoint set with no ready
    /// addresses yields an empty list; a service with no endpoint set at all
    /// is a `LookupMiss` of kind `Endpoints`.
    fn resolve_endpoints(
        &self,
        namespace: &str,
        service: &str,
        port: &ServicePort,
    ) -> Result<Vec<Endpoint>>;

    fn resolve_certificate(&self, namespace: &str, secret: &str) -> Result<SslCert>;
}
